//! Core of a compositor status bar: a per-module state store with change notification, and the manager of
//! the background workers feeding it.

pub mod cache;
pub mod config;
pub mod error;
pub mod modules;
pub mod paths;
pub mod payload;
pub mod registry;
pub mod store;
pub mod util;
pub mod worker_handler;

pub use barstate_shared_util::{ModuleKey, ModuleType};
pub use store::{Consumer, StateStore, SubscriptionId};
pub use worker_handler::{Fetch, Listen, Publisher, Worker, WorkerManager};
