use std::sync::Arc;

use vx_admission::{AdmissionController, Reconciler};
use vx_domain::config::Config;
use vx_pipeline::{CancelMap, ToolRegistry};
use vx_providers::ProviderRegistry;
use vx_sessions::{MemoryKv, SessionManager};

/// Shared application state passed to every handler.
///
/// Fields are grouped by concern:
/// - **Core services**: config, provider adapters
/// - **Session management**: session manager, per-session cancel tokens
/// - **Admission & billing**: controller, reconciler
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub providers: Arc<ProviderRegistry>,

    // ── Session management ────────────────────────────────────────────
    pub sessions: Arc<SessionManager>,
    pub cancel_map: Arc<CancelMap>,
    /// Concrete handle to the in-process store, for expiry sweeps.
    pub kv: Arc<MemoryKv>,

    // ── Admission & billing ───────────────────────────────────────────
    pub admission: Arc<AdmissionController>,
    pub reconciler: Arc<Reconciler>,

    // ── Agent tools ───────────────────────────────────────────────────
    pub tools: Arc<ToolRegistry>,
}
