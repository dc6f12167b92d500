//! Domain types shared by every imagegen crate.
//!
//! Holds the task and provider-configuration records, the push-channel
//! message shapes, the model resolver, and the storage ports implemented
//! by `imagegen-db`. No I/O lives here.

pub mod error;
pub mod messages;
pub mod model_resolution;
pub mod ports;
pub mod provider_config;
pub mod task;
pub mod types;
