//! The VoxGate gateway: WebSocket call endpoint, REST observation surface,
//! app state, and bootstrap.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
pub mod teardown;
pub mod ws;
