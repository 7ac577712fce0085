use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vx_domain::config::{Config, ConfigSeverity};
use vx_gateway::cli::{Cli, Command, ConfigCommand};
use vx_gateway::{api, bootstrap};
use vx_sessions::KeyValueStore;

// Exit codes: 0 normal, 1 config error, 2 failed to bind, 3 session store
// unreachable at startup.
const EXIT_CONFIG: i32 = 1;
const EXIT_BIND: i32 = 2;
const EXIT_STORE: i32 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = match vx_gateway::cli::load_config() {
                Ok(loaded) => loaded,
                Err(e) => {
                    eprintln!("config: {e}");
                    std::process::exit(EXIT_CONFIG);
                }
            };
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = vx_gateway::cli::load_config()?;
            if !vx_gateway::cli::validate(&config, &path) {
                std::process::exit(EXIT_CONFIG);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = vx_gateway::cli::load_config()?;
            vx_gateway::cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("voxgate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the server.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vx_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("VoxGate starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        tracing::error!(
            errors = issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count(),
            "config validation failed"
        );
        std::process::exit(EXIT_CONFIG);
    }

    // ── App state ────────────────────────────────────────────────────
    let state = bootstrap::build_app_state(config.clone());

    // ── Session store reachability ───────────────────────────────────
    if let Err(e) = state.kv.ping().await {
        tracing::error!(error = %e, "session store unreachable");
        std::process::exit(EXIT_STORE);
    }

    // ── Background tasks ─────────────────────────────────────────────
    bootstrap::spawn_background_tasks(&state);

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_connections,
        ))
        .with_state(state.clone());

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind");
            std::process::exit(EXIT_BIND);
        }
    };

    if config.server.tls.enabled {
        tracing::info!(
            cert = config.server.tls.cert_path.as_deref().unwrap_or(""),
            "TLS material validated; termination is handled by the fronting proxy"
        );
    }
    tracing::info!(addr = %addr, "VoxGate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    tracing::info!("VoxGate stopped");
    Ok(())
}

/// Wait for ctrl-c, then cancel every live session so pipelines unwind,
/// slots release, and records finalize before the process exits.
async fn shutdown_signal(state: vx_gateway::state::AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "shutdown signal listener failed");
        return;
    }

    let live: Vec<String> = state
        .sessions
        .list()
        .into_iter()
        .filter(|s| !s.status.is_terminal())
        .map(|s| s.session_id)
        .collect();
    tracing::info!(sessions = live.len(), "shutdown requested, ending live sessions");
    for session_id in live {
        state.cancel_map.cancel(&session_id);
    }

    // Give supervisors a moment to finalize.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
}
