//! Engine launcher and worker configuration from command line options.

use std::sync::Arc;

use anyhow::Context;
use pipeworker_core::{CommandLauncher, EngineLauncher, WorkerConfig};

use crate::EngineArgs;

/// Name of the engine looked up when `--engine` is not given.
const DEFAULT_ENGINE: &str = "pipeworker-engine";

pub fn launcher(args: &EngineArgs) -> anyhow::Result<Arc<dyn EngineLauncher>> {
    let program = match &args.engine {
        Some(path) => path.clone(),
        None => CommandLauncher::find_engine(DEFAULT_ENGINE)?,
    };
    let input = match &args.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine input {}", path.display()))?,
        None => String::new(),
    };
    tracing::debug!(engine = %program.display(), "Using engine");
    Ok(Arc::new(CommandLauncher::new(program).input(input)))
}

pub fn worker_config(args: &EngineArgs) -> anyhow::Result<WorkerConfig> {
    let config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}
