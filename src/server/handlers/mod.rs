pub mod events;
pub mod health;
pub mod partners;
pub mod webhooks;
