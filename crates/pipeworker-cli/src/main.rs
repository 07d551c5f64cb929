//! pipeworker CLI - drive persistent engine workers from the command line.

mod engine;
mod parse;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pipeworker")]
#[command(about = "Run calculations on persistent engine workers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Options shared by every command that starts engines.
#[derive(clap::Args)]
struct EngineArgs {
    /// Engine executable (default: pipeworker-engine, searched like PIPEWORKER_ENGINE_PATH)
    #[arg(long)]
    engine: Option<PathBuf>,

    /// File fed to the engine's standard input
    #[arg(long)]
    input: Option<PathBuf>,

    /// Worker configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate XYZ geometries on a pool of workers
    Run {
        /// Geometry files in XYZ format
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Number of workers (default: one per CPU, at most one per file)
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Optimize the geometries instead of computing single points
        #[arg(long)]
        optimize: bool,

        /// Also compute nuclear gradients
        #[arg(long)]
        gradients: bool,

        /// Maximum number of optimizer iterations
        #[arg(long)]
        max_iterations: Option<i64>,

        /// Energy unit of the report (au, ev, kcal/mol, kj/mol)
        #[arg(long, default_value = "au")]
        unit: String,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Let the engine parse an input file and print it as JSON
    ParseInput {
        /// Input file to parse
        file: PathBuf,

        /// Program the input belongs to
        #[arg(long, default_value = "engine")]
        program: String,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Attach the engine's stderr to core errors
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<pipeworker_core::Error>()
            && core_err.output().is_some()
        {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            files,
            workers,
            optimize,
            gradients,
            max_iterations,
            unit,
            json,
            engine,
        } => {
            let request = run::Request {
                files,
                workers,
                optimize,
                gradients,
                max_iterations,
                unit,
                json,
            };
            run::execute(&request, &engine).map_err(format_error)?;
        }

        Commands::ParseInput {
            file,
            program,
            engine,
        } => {
            parse::execute(&file, &program, &engine).map_err(format_error)?;
        }
    }

    Ok(())
}
