//! A deterministic experiment and feature-flag decision engine.
//!
//! # Overview
//!
//! Given a datafile (a JSON description of experiments, audiences, mutually exclusive groups,
//! feature flags and their rollouts), the engine decides which variation a user sees. The same
//! user, attributes, and datafile always produce the same decision on any machine: users are
//! bucketed by hashing their id with MurmurHash3 ([`sharder`]) and walking the traffic
//! allocation ([`bucketer`]).
//!
//! [`ProjectConfig`](config::ProjectConfig) is the parsed, indexed, immutable datafile. A
//! [`ConfigurationStore`](configuration_store::ConfigurationStore) holds the active snapshot and
//! hands it out to readers, so a datafile update never affects a decision in progress.
//!
//! [`DecisionService`](decision::DecisionService) implements the decision flow: experiment
//! status, forced variations, whitelists, group exclusion, sticky decisions from a
//! [`UserProfileService`], audience targeting ([`conditions`]), and bucketing. Feature flags are
//! decided by trying their feature tests first and then the rollout rules.
//!
//! [`Client`] is a thin facade over both that works with keys instead of config objects and
//! reports every decision to a [`DecisionListener`].
//!
//! # Error Handling
//!
//! Normal outcomes (experiment not running, user not in the audience, traffic miss) are not
//! errors: they produce "no variation". Invalid input and datafile inconsistencies are logged
//! and then passed to the configured [`ErrorHandler`], which either swallows them (the default)
//! or turns them into an [`Error`]. User profile service failures are logged and never surface.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with structured key-values
//! under the `experiment_engine` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into decisions.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod bucketer;
pub mod conditions;
pub mod config;
pub mod configuration_store;
pub mod decision;
pub mod events;
pub mod lru_cache;
pub mod sharder;

mod attributes;
mod client;
mod client_config;
mod decision_listener;
mod error;
mod error_handler;
#[cfg(test)]
mod test_support;

pub use attributes::{AttributeValue, Attributes, BUCKETING_ID_ATTRIBUTE};
pub use client::Client;
pub use client_config::ClientConfig;
pub use decision::{InMemoryUserProfileService, UserProfile, UserProfileService};
pub use decision_listener::DecisionListener;
pub use error::{DecisionError, EntityKind, Error, Result};
pub use error_handler::{ErrorHandler, NoopErrorHandler, RaiseErrorHandler};
pub use events::DecisionNotification;
