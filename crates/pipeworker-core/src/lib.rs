//! Core library for driving persistent computation engines.
//!
//! This crate provides:
//! - Length-prefixed framing and the CBOR message codec of the pipe protocol
//! - The array flatten/unflatten transform used on the wire
//! - A call channel that keeps one call in flight at a time
//! - Worker supervision with startup watchdog and automatic restart
//! - The restart cache of results kept alive inside the engine
//! - A worker pool that evaluates batches in parallel

pub mod config;
pub mod error;
pub mod geometry;
pub mod ipc;
pub mod pool;
pub mod units;
pub mod worker;

pub use config::{PoolConfig, WorkerConfig};
pub use error::{CapturedOutput, Error, Result};
pub use geometry::Geometry;
pub use pool::{PoolTask, WorkerPool};
pub use units::Unit;
pub use worker::{
    CommandLauncher, EngineLauncher, EvaluateOptions, OptimizerOptions, Properties, RequestArg,
    ResultRecord, Task, Worker,
};
