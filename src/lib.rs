//! IPv4 network discovery engine. Composes a staged per-host probe
//! pipeline, a CIDR-bounded network scanner, a task scheduler, and a
//! generic worker pool behind a small external `Storage` collaborator
//! contract.

pub mod cancel;
pub mod cidr;
pub mod error;
pub mod model;
pub mod options;
pub mod oui;
pub mod scanner;
pub mod scheduler;
pub mod storage;

#[cfg(test)]
pub mod test_utils;

pub use cancel::CancelToken;
pub use error::{EngineError, Result};
pub use options::EngineOptions;
pub use scanner::network::scan_network;
pub use scheduler::Scheduler;
pub use scheduler::pool::WorkerPool;
pub use storage::{Storage, UpdateCallback};
