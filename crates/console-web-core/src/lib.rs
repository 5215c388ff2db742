//! console-web-core: reconstruction engine for live tokio console feeds
//!
//! Consumes the update stream of an instrumented tokio process and keeps an
//! always-current model of its tasks, resources and async operations.
//!
//! # Architecture
//!
//! ```text
//! Connector → Session driver → Metadata / clock / reconcilers → Stores
//!                                                ↓
//!                                  Retention sweep → Lint engine → status
//! ```
//!
//! # Modules
//!
//! - `time`: server-relative timestamps and durations, the server clock
//! - `ids`: remote span ids and session-stable ids
//! - `store`: per-entity-class record store with its identity map
//! - `wire`: structured update records as received
//! - `metadata`, `field`: callsite metadata and decoded fields
//! - `task`, `resource`, `async_op`: entity records and derived views
//! - `reconcile`: merges update batches into the stores
//! - `retention`: evicts completed entities after a grace period
//! - `lint`: per-task diagnostics with deferred rechecks
//! - `session`: the model plus the reconnecting subscription loop
//! - `details`: per-task histogram stream
//! - `transport`: connector seam and a JSON-lines TCP connector
//! - `config`, `logging`, `retry`, `error`: ambient plumbing

pub mod async_op;
pub mod config;
pub mod details;
pub mod error;
pub mod field;
pub mod ids;
pub mod lint;
pub mod logging;
pub mod metadata;
pub mod reconcile;
pub mod resource;
pub mod retention;
pub mod retry;
pub mod session;
pub mod store;
pub mod task;
pub mod time;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use ids::{SpanId, StableId};
pub use session::{Session, SessionState, SessionStatus};
pub use time::{Duration, Timestamp};
