//! Run command implementation.
//!
//! Reads XYZ geometries, evaluates them on a worker pool and prints a report.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, bail};
use pipeworker_core::{
    EvaluateOptions, Geometry, PoolConfig, PoolTask, ResultRecord, Unit, WorkerPool,
};
use serde_json::json;

use crate::EngineArgs;
use crate::engine;

/// What to compute, as given on the command line.
pub struct Request {
    pub files: Vec<PathBuf>,
    pub workers: Option<usize>,
    pub optimize: bool,
    pub gradients: bool,
    pub max_iterations: Option<i64>,
    pub unit: String,
    pub json: bool,
}

impl Request {
    fn options(&self) -> EvaluateOptions {
        let mut options = if self.optimize {
            EvaluateOptions::geometry_optimization()
        } else {
            EvaluateOptions::single_point()
        };
        options.properties.gradients = self.gradients;
        options.optimizer.max_iterations = self.max_iterations;
        options
    }
}

/// Evaluate every file and report; fails if any calculation failed.
pub fn execute(request: &Request, args: &EngineArgs) -> anyhow::Result<()> {
    let start = Instant::now();
    let unit: Unit = request.unit.parse()?;
    let options = request.options();
    options.validate()?;

    let mut tasks = Vec::with_capacity(request.files.len());
    for path in &request.files {
        let geometry = Geometry::from_xyz_file(path)
            .with_context(|| format!("Failed to read geometry {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        tasks.push(PoolTask::new(name, geometry, options.clone()));
    }

    let defaults = PoolConfig::default();
    let num_workers = request
        .workers
        .unwrap_or(defaults.num_workers)
        .min(tasks.len())
        .max(1);
    let mut worker = engine::worker_config(args)?;
    if args.config.is_none() {
        worker.workdir_prefix = defaults.worker.workdir_prefix;
    }
    let config = PoolConfig {
        num_workers,
        worker,
    };

    let mut pool = WorkerPool::new(engine::launcher(args)?, config)?;
    let records = pool.submit(tasks)?;
    pool.stop();

    if request.json {
        print_json(&records, unit)?;
    } else {
        print_report(&records, unit, request.optimize);
    }

    let failed = records.iter().filter(|r| !r.ok()).count();
    if !request.json {
        println!(
            "\nCompleted {} calculations on {} workers in {:.2}s",
            records.len(),
            num_workers,
            start.elapsed().as_secs_f64()
        );
    }
    if failed > 0 {
        bail!("{} of {} calculations failed", failed, records.len());
    }
    Ok(())
}

fn print_report(records: &[ResultRecord], unit: Unit, optimize: bool) {
    let width = records.iter().map(|r| r.name().len()).max().unwrap_or(4).max(4);
    println!("{:<width$}  {:>20}", "name", format!("energy [{}]", unit));
    println!("{}", "-".repeat(width + 22));

    for record in records {
        if !record.ok() {
            let message = record.error_message().unwrap_or_default();
            println!("{:<width$}  FAILED: {}", record.name(), message);
            continue;
        }
        match record.energy(unit) {
            Ok(energy) => println!("{:<width$}  {:>20.10}", record.name(), energy),
            Err(e) => println!("{:<width$}  no energy: {}", record.name(), e),
        }
        if let Ok(gradients) = record.gradients(Unit::Hartree, Unit::Bohr)
            && let Some(values) = gradients.to_f64_vec()
        {
            let max = values.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));
            println!("{:<width$}  max gradient {:.3e} hartree/bohr", "", max);
        }
        if optimize && let Ok(main) = record.main_geometry() {
            for (symbol, xyz) in main.symbols.iter().zip(&main.coords) {
                println!(
                    "{:<width$}  {:<3} {:>12.6} {:>12.6} {:>12.6}",
                    "", symbol, xyz[0], xyz[1], xyz[2]
                );
            }
        }
    }
}

fn print_json(records: &[ResultRecord], unit: Unit) -> anyhow::Result<()> {
    let entries: Vec<serde_json::Value> = records
        .iter()
        .map(|record| {
            if !record.ok() {
                return json!({
                    "name": record.name(),
                    "ok": false,
                    "error": record.error_message(),
                });
            }
            let mut entry = json!({
                "name": record.name(),
                "ok": true,
                "energy": record.energy(unit).ok(),
                "unit": unit.to_string(),
            });
            if let Ok(gradients) = record.gradients(Unit::Hartree, Unit::Bohr) {
                entry["gradients"] = json!(gradients.to_rows());
            }
            if let Ok(main) = record.main_geometry() {
                entry["symbols"] = json!(main.symbols);
                entry["coords"] = json!(main.coords);
            }
            entry
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
