//! Generation providers and the live provider registry.
//!
//! A [`Provider`] turns a [`GenerationRequest`] into a stream of images.
//! The [`ProviderRegistry`] holds the set of providers built from the
//! enabled rows of the provider configuration store and rebuilds it on
//! demand (boot, SIGHUP).

pub mod factory;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod settings;

pub use factory::{ProviderFactory, BUILTIN_PROVIDERS};
pub use provider::{GeneratedImage, GenerationRequest, ImageStream, Provider, ProviderError};
pub use registry::{ProviderRegistry, ProviderRegistryError, ReloadSummary};
pub use settings::{ProviderSettings, ProvidersConfig};
