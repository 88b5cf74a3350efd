//! Skein: the client-side synchronization engine for a content-addressed
//! code host.
//!
//! A local workspace keeps causals, namespaces, terms, types, patches and
//! byte blobs in a content-addressed SQLite store; this crate transfers
//! connected sub-DAGs of those entities between the local store and a remote
//! Share instance over HTTP.
//!
//! Three entry points:
//!
//! - [`push::push_check_and_set`]: atomically replace the remote head,
//!   uploading whatever dependencies the server demands;
//! - [`push::push_fast_forward`]: advance the remote head along a known
//!   causal chain;
//! - [`pull::pull`]: download a remote causal and everything it transitively
//!   requires, staging partial sub-DAGs in a temp table until their
//!   dependencies land.

#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(
  clippy::await_holding_lock,
  clippy::empty_enum,
  clippy::enum_glob_use,
  clippy::inefficient_to_string,
  clippy::mem_forget,
  clippy::needless_continue
)]

pub use skein_client as client;

pub mod progress;
pub mod pull;
pub mod push;
pub mod spine;
pub mod store;
pub mod transport;
mod upload;

pub use progress::{PullProgress, PushProgress};
pub use pull::{PullError, pull};
pub use push::{CheckAndSetPushError, FastForwardPushError, push_check_and_set, push_fast_forward};
pub use spine::causal_spine_between;
pub use transport::SyncServer;

/// How many download workers a pull runs at once.
pub const MAX_SIMULTANEOUS_PULL_DOWNLOADERS: usize = 10;

/// Opens a fresh, exclusive store connection. The engine calls this once per
/// long-lived worker; the push path uses a single connection.
pub type ConnectFn = dyn Fn() -> Result<store::Store, store::Error> + Send + Sync;
