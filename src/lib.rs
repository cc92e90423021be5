//! cachewarden - versioned request-interception cache
//!
//! Sits between an application's outbound requests and the network. Each
//! request is cache-busted with the running version's token, classified, and
//! served by a caching strategy against that version's cache generations. A
//! lifecycle controller installs (pre-warms) new versions all-or-nothing and
//! garbage-collects old generations when a version activates.

pub mod busting;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod http;
pub mod intercept;
pub mod lifecycle;
pub mod notify;
pub mod retry;
pub mod strategy;
pub mod version;

pub use cache::{CacheStore, DiskStore, MemoryStore};
pub use config::Config;
pub use fetch::{Fetcher, HttpFetcher};
pub use http::{Destination, Request, Response};
pub use lifecycle::{ControllerHandle, Event, Instance, LifecycleController, LifecycleState, Scope};
pub use version::VersionToken;
