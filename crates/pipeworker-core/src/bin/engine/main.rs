//! Reference engine speaking the pipe protocol.
//!
//! Reads its input (`key value` lines) from stdin, then opens `call_pipe` and
//! `reply_pipe` in the current directory and serves calls until `Exit`.
//! Computes energies of a Lennard-Jones pair potential.

mod model;
mod server;

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read};
use std::process::ExitCode;

use tracing::{error, info, warn};

use server::Server;

/// Settings read from the input script.
#[derive(Debug, Clone)]
pub struct EngineInput {
    /// Well depth in hartree.
    pub epsilon: f64,
    /// Zero crossing of the potential in bohr.
    pub sigma: f64,
    /// Sleep before every Solve / Optimize.
    pub delay_ms: u64,
    /// Sleep before opening the pipes.
    pub start_delay_ms: u64,
    /// Fail right after startup, before opening the pipes.
    pub exit_on_start: bool,
}

impl Default for EngineInput {
    fn default() -> Self {
        Self {
            epsilon: 0.001,
            sigma: 3.0,
            delay_ms: 0,
            start_delay_ms: 0,
            exit_on_start: false,
        }
    }
}

impl EngineInput {
    fn parse(text: &str) -> Result<Self, String> {
        let mut input = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let value = value.trim();
            let bad = |e: &dyn std::fmt::Display| format!("invalid value '{}' for {}: {}", value, key, e);
            match key.to_ascii_lowercase().as_str() {
                "epsilon" => input.epsilon = value.parse::<f64>().map_err(|e| bad(&e))?,
                "sigma" => input.sigma = value.parse::<f64>().map_err(|e| bad(&e))?,
                "delay_ms" => input.delay_ms = value.parse::<u64>().map_err(|e| bad(&e))?,
                "start_delay_ms" => {
                    input.start_delay_ms = value.parse::<u64>().map_err(|e| bad(&e))?
                }
                "exit_on_start" => {
                    input.exit_on_start = parse_flag(value).ok_or_else(|| bad(&"expected a boolean"))?
                }
                other => warn!("Ignoring unknown input key {}", other),
            }
        }
        Ok(input)
    }
}

/// A bare key switches a flag on.
fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PIPEWORKER_ENGINE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    let mut text = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut text) {
        eprintln!("ERROR: cannot read input: {}", e);
        return ExitCode::from(2);
    }
    let input = match EngineInput::parse(&text) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::from(2);
        }
    };

    println!(
        "pipeworker-engine {} (epsilon {}, sigma {})",
        env!("CARGO_PKG_VERSION"),
        input.epsilon,
        input.sigma
    );
    if input.exit_on_start {
        eprintln!("ERROR: engine configured to exit on start");
        return ExitCode::from(3);
    }

    if input.start_delay_ms > 0 {
        std::thread::sleep(std::time::Duration::from_millis(input.start_delay_ms));
    }

    let call = match File::open("call_pipe") {
        Ok(file) => file,
        Err(e) => {
            eprintln!("ERROR: cannot open call_pipe: {}", e);
            return ExitCode::from(2);
        }
    };
    let reply = match OpenOptions::new().write(true).open("reply_pipe") {
        Ok(file) => file,
        Err(e) => {
            eprintln!("ERROR: cannot open reply_pipe: {}", e);
            return ExitCode::from(2);
        }
    };
    info!("Pipes open, serving calls");

    let mut server = Server::new(input);
    match server.run(&mut BufReader::new(call), &mut BufWriter::new(reply)) {
        Ok(()) => {
            println!("pipeworker-engine finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Pipe failure: {}", e);
            eprintln!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}
