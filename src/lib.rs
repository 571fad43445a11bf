//! The Rust SDK for Flagsmith, an open-source feature flagging and remote configuration service.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that resolves [`Flags`] for an environment or for an
//! identity, where each identity has a unique identifier and key-value traits associated with
//! it. A [`Flag`] carries whether the feature is enabled and its value.
//!
//! Flags are resolved in one of two ways:
//!
//! - **Remote evaluation** (default). Every call requests flags from the Flagsmith API.
//! - **Local evaluation**. The client holds a copy of the environment document and evaluates
//!   flags in-process. The document is refreshed by a background thread, either by polling or by
//!   following real-time update events.
//!
//! A [`DefaultFlagHandler`] provides flags for features that cannot be resolved, and an
//! [`OfflineHandler`] provides an environment document when the API cannot be reached (or
//! must not be contacted at all, see [`ClientConfig::offline`]).
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Failures of background threads (environment refreshes, analytics reports) are logged and never
//! surface to the caller. Errors are only returned from client construction and from flag
//! resolution when no fallback is configured.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages, with the `flagsmith` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `flagsmith` crate repository.

#![warn(rustdoc::missing_crate_level_docs)]

mod analytics;
mod client;
mod config;
mod environment;
mod environment_store;
mod error;
mod evaluator;
mod handlers;
mod models;
mod poller;
mod refresher;
mod resolver;
mod sse;
mod stream;
mod transport;
pub mod webhooks;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use config::ClientConfig;
pub use environment::{
    Environment, Feature, FeatureState, IdentityOverride, MultivariateFeatureOption,
    MultivariateFeatureStateValue, Project, SegmentModel,
};
pub use error::{Error, Result};
pub use evaluator::{Evaluator, LocalEvaluator};
pub use handlers::{DefaultFlagHandler, LocalFileHandler, OfflineHandler};
pub use models::{
    DefaultFlag, FeatureResult, FeatureValue, Flag, Flags, IdentityContext, Segment, TraitValue,
    Traits,
};
pub use stream::StreamEvent;
pub use transport::{EventStream, HttpTransport, HttpTransportConfig, Transport};
