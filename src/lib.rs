pub mod auth;
pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod infrastructure;
pub mod outbound;
pub mod server;
pub mod telemetry;

pub use engine::Engine;
pub use error::WebhookError;
