//! RateCache Server
//!
//! HTTP front end for the rate cache: current rates, the access audit
//! trail, health and metrics. The API contract is served under `/api-docs`.

pub mod config;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod storage;

pub use config::ServerConfig;
pub use routes::router;
pub use scheduler::SyncScheduler;
pub use state::AppState;
pub use storage::Storage;
