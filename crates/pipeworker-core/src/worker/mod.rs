//! Persistent engine workers.
//!
//! A [`Worker`] owns one engine process, its working directory and the pair
//! of named pipes used to talk to it. [`WorkerPool`](crate::pool::WorkerPool)
//! fans batches out over several of them.

mod cache;
mod launcher;
mod process;
mod request;
mod results;
mod startup;

pub use cache::RestartCache;
pub use launcher::{CommandLauncher, ENV_ENGINE_PATH, EngineLauncher};
pub use process::Worker;
pub use request::{EvaluateOptions, OptimizerOptions, Properties, RequestArg, Task};
pub use results::ResultRecord;
