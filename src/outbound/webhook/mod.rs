// Outbound webhook delivery
//
//   retry_strategy  – fixed backoff schedule
//   http_client     – reqwest wrapper, one POST per attempt
//   delivery_worker – claims an event, signs, sends, records the outcome
//   retry_scheduler – periodic sweep over FAILED events whose backoff elapsed
//   emitter         – façade: create events, trigger delivery, read projections

pub mod delivery_worker;
pub mod emitter;
pub mod http_client;
pub mod retry_scheduler;
pub mod retry_strategy;
pub mod schemas;

// Re-export commonly used types
pub use delivery_worker::DeliveryWorker;
pub use emitter::{EmitRequest, EventEmitter};
pub use http_client::{HttpClientError, WebhookHttpClient};
pub use retry_scheduler::{RetryScheduler, SweepReport};
pub use retry_strategy::RetryStrategy;
pub use schemas::DeliveryAck;
