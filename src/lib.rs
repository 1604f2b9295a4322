pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{AdmissionService, CheckOutcome, CheckRequest};
pub use types::Key;
