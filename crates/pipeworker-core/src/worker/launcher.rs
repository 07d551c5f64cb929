//! How an engine process is launched.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable pointing at the engine executable.
pub const ENV_ENGINE_PATH: &str = "PIPEWORKER_ENGINE_PATH";

/// Produces the input script and run script for an engine process.
///
/// The worker writes both into its working directory and runs the run script
/// with `sh`, feeding the input script to the engine's standard input. The
/// engine is expected to open `call_pipe` for reading and `reply_pipe` for
/// writing, both relative to its working directory.
pub trait EngineLauncher: Send + Sync {
    /// Text bound to the engine's standard input.
    fn input_text(&self) -> String;

    /// Shell script that starts the engine.
    fn run_script(&self) -> String;
}

/// Launches a single executable with fixed arguments and input text.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
    input: String,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            input: String::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Locate an engine executable by name.
    ///
    /// Looks in the following order:
    /// 1. `PIPEWORKER_ENGINE_PATH` environment variable
    /// 2. Same directory as the current executable
    /// 3. System PATH
    pub fn find_engine(name: &str) -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_ENGINE_PATH) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let candidate = exe_dir.join(name);
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }

        if let Ok(path) = which::which(name) {
            return Ok(path);
        }

        Err(Error::Config(format!(
            "Could not find engine binary '{}'. Set {} or ensure it's in PATH.",
            name, ENV_ENGINE_PATH
        )))
    }
}

impl EngineLauncher for CommandLauncher {
    fn input_text(&self) -> String {
        self.input.clone()
    }

    fn run_script(&self) -> String {
        let mut script = String::from("#!/bin/sh\nexec ");
        script.push_str(&shell_quote(&self.program.to_string_lossy()));
        for arg in &self.args {
            script.push(' ');
            script.push_str(&shell_quote(arg));
        }
        script.push('\n');
        script
    }
}

/// Single-quote a word for `sh`.
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}
