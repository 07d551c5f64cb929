//! Shared fixtures for tests driving the reference engine.

#![allow(dead_code)]

use std::sync::Arc;

use pipeworker_core::{CommandLauncher, EngineLauncher, Geometry, WorkerConfig};

/// Launcher for the reference engine with the given input script.
pub fn engine(input: &str) -> Arc<dyn EngineLauncher> {
    Arc::new(CommandLauncher::new(env!("CARGO_BIN_EXE_pipeworker-engine")).input(input))
}

pub fn config() -> WorkerConfig {
    WorkerConfig {
        workdir_prefix: "pipeworker_test".to_string(),
        ..WorkerConfig::default()
    }
}

/// Two atoms `r` angstrom apart along x.
pub fn dimer(r: f64) -> Geometry {
    Geometry::new(
        vec!["Ar".to_string(), "Ar".to_string()],
        vec![[0.0, 0.0, 0.0], [r, 0.0, 0.0]],
    )
    .unwrap()
}

pub fn trimer() -> Geometry {
    Geometry::new(
        vec!["Ar".to_string(), "Ar".to_string(), "Ar".to_string()],
        vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 1.8, 0.0]],
    )
    .unwrap()
}

/// Distance between the first two atoms.
pub fn bond_length(geometry: &Geometry) -> f64 {
    let [a, b] = [geometry.coords[0], geometry.coords[1]];
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Equilibrium distance of the engine's default pair potential, in angstrom.
pub fn equilibrium_distance() -> f64 {
    2.0_f64.powf(1.0 / 6.0) * 3.0 * pipeworker_core::units::BOHR_IN_ANGSTROM
}
