//! trailgraph HTTP service: login, authenticated ingestion and the
//! background flush into the graph

pub mod auth;
pub mod config;
pub mod handlers;
pub mod issuer;
pub mod response;
pub mod server;
pub mod state;
pub mod worker;

pub use config::ServerConfig;
pub use handlers::handle_request;
pub use server::TrailServer;
pub use state::AppState;
pub use worker::{FlushReport, FlushWorker};
