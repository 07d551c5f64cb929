//! Parse-input command implementation.

use std::path::Path;

use anyhow::Context;
use pipeworker_core::Worker;

use crate::EngineArgs;
use crate::engine;

/// Have one worker parse `file` and print the JSON it returns.
pub fn execute(file: &Path, program: &str, args: &EngineArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut worker = Worker::new(engine::launcher(args)?, engine::worker_config(args)?)?;
    let json = worker.parse_input(program, &text)?;
    worker.stop();

    println!("{}", json);
    Ok(())
}
