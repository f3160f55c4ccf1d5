//! # Tillpoint Core
//!
//! Startup orchestration for point-of-sale terminals.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            StartupController                │
//! │  not-started → in-progress → done | error   │
//! ├─────────────────────────────────────────────┤
//! │  Combinators        │  TaskExecutor         │
//! │  - all              │  - resolve (Resolver) │
//! │  - one_of           │  - normalize output   │
//! │  - optional         │  - time + trace       │
//! │  - with_splash_msg  │                       │
//! ├─────────────────────────────────────────────┤
//! │  SplashScreen       │  KeyValueStorage      │
//! │  - LIFO by handle   │  - memory / file      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! A startup sequence is a static tree of [`TaskRef`]s. Leaves name tasks that
//! a [`Resolver`] turns into [`Task`] instances; inner nodes are
//! [`Combinator`]s deciding order and failure propagation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod combinator;
pub mod controller;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod splash;
pub mod storage;
pub mod task;

pub use combinator::{all, one_of, optional, with_splash_message, Combinator, CombinatorKind};
pub use controller::{StartupController, StartupStatus};
pub use error::{StartupError, StartupResult};
pub use executor::{Resolver, TaskExecutor, TaskRegistry};
pub use splash::{SplashMessage, SplashScreen};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use task::{FnTask, Task, TaskContext, TaskId, TaskOutput, TaskRef};

/// Tillpoint core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
