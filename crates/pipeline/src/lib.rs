//! Generation task execution.
//!
//! The [`Dispatcher`] admits tasks into a bounded FIFO queue and runs them
//! on a fixed number of worker slots. Each [`Worker`] streams images from a
//! provider, stores them through the [`ArtifactStore`], advances the task
//! record, and reports every lifecycle event to a [`TaskNotifier`].

pub mod artifacts;
pub mod dispatcher;
pub mod notifier;
pub mod queue;
pub mod worker;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use dispatcher::{
    parse_reference_image, Dispatcher, DispatcherConfig, NewGeneration, RecoverySummary,
    SubmitError, CANCELLED_MESSAGE, INTERRUPTED_MESSAGE,
};
pub use notifier::{NoopNotifier, TaskNotifier};
pub use queue::{AdmissionError, AdmissionQueue};
pub use worker::Worker;
