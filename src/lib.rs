//! Hemmer Provider Waiter
//!
//! Waiting, retrying and not-found handling for Hemmer provider resources.
//! Remote APIs are eventually consistent: objects take time to be created,
//! change state asynchronously, and may briefly vanish or linger after
//! deletion. This crate gives CRUD handlers one consistent way to deal with
//! that.
//!
//! # Overview
//!
//! - **Classifier** ([`classify`]): decides which remote errors mean "the
//!   object does not exist" and turns them into a typed [`NotFoundError`]
//! - **Finders** ([`finder`]): single-shot lookups of one object with a
//!   uniform found / not-found / failed contract
//! - **Status functions** ([`status`]): adapters from a finder to what the
//!   poller calls on each tick
//! - **Poller** ([`poller`]): waits for an object to reach a target status,
//!   with timeouts, backoff, not-found tolerance and cancellation
//! - **Retry helpers** ([`retry`]): retry single calls through propagation
//!   delays
//! - **Lifecycle glue** ([`lifecycle`]): error context and the read/delete
//!   absence policies
//! - **Timeouts** ([`timeouts`]): per-operation timeouts from configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use hemmer_provider_waiter::{
//!     poll, refresh_from, read_outcome, Operation, PollSpec, ProviderError, ResourceRef,
//! };
//!
//! async fn create(
//!     client: &DevEnvironmentClient,
//!     config: serde_json::Value,
//! ) -> Result<serde_json::Value, ProviderError> {
//!     let id = client.create_dev_environment(&config).await?;
//!     let env = ResourceRef::new("Dev Environment", &id);
//!
//!     let spec = PollSpec::new(
//!         [DevEnvironmentStatus::Pending, DevEnvironmentStatus::Starting],
//!         [DevEnvironmentStatus::Running],
//!         Duration::from_secs(20 * 60),
//!     );
//!     let finder = DevEnvironmentFinder::new(client);
//!     env.context(Operation::Create, poll(&spec, refresh_from(&finder, id.as_str())).await)?;
//!
//!     read(client, &id, true).await
//! }
//! ```
//!
//! Every wait can be observed with `RUST_LOG=hemmer_provider_waiter=trace`
//! once [`init_logging`] has been called.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod error;
pub mod finder;
pub mod lifecycle;
pub mod logging;
pub mod poller;
pub mod retry;
pub mod status;
pub mod testing;
pub mod timeouts;

// Re-export main types at crate root
pub use classify::{classify, classify_result, AbsenceRegistry, AbsenceRule, RemoteError};
pub use error::{ApiError, NotFoundError, NotFoundKind, ProviderError};
pub use finder::{FindError, Finder};
pub use lifecycle::{delete_outcome, read_outcome, Operation, ResourceRef};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use poller::{poll, poll_with_cancel, PollOutcome, PollSpec, WaitError};
pub use retry::{
    retry_until_not_found, retry_when, retry_when_new_resource_not_found, retry_when_not_found,
    RetryError, RetryOptions,
};
pub use status::{refresh_from, refresh_until_gone, Observation, RemoteObject};
pub use timeouts::Timeouts;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tokio_util::sync::CancellationToken;
pub use tonic;
pub use tracing;
