//! Offline-first synchronization and caching engine for the OnDeck client.
//!
//! Two cooperating halves:
//! - response caching with per-resource-class strategies and a versioned
//!   cache-set lifecycle ([`cache`]),
//! - a durable write queue drained against the remote service when
//!   connectivity returns ([`queue`], [`sync`]).
//!
//! Mutations are durable the instant they are enqueued and leave the queue
//! only after the remote two-phase write succeeded. [`app::Engine`] wires
//! everything together with an explicit init/run/stop lifecycle.

pub mod app;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod event;
pub mod fetch;
pub mod queue;
pub mod remote;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use app::Engine;
pub use config::Config;
