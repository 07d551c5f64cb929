//! Unit conversion between the engine's atomic units and caller-facing units.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Length of one bohr in angstrom.
pub const BOHR_IN_ANGSTROM: f64 = 0.529_177_210_903;

/// Units accepted by the result accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Hartree,
    ElectronVolt,
    KcalPerMol,
    KjPerMol,
    Bohr,
    Angstrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantity {
    Energy,
    Length,
}

impl Unit {
    fn quantity(self) -> Quantity {
        match self {
            Unit::Hartree | Unit::ElectronVolt | Unit::KcalPerMol | Unit::KjPerMol => {
                Quantity::Energy
            }
            Unit::Bohr | Unit::Angstrom => Quantity::Length,
        }
    }

    /// Size of one of this unit expressed in atomic units.
    fn in_atomic_units(self) -> f64 {
        match self {
            Unit::Hartree | Unit::Bohr => 1.0,
            Unit::ElectronVolt => 1.0 / 27.211_386_245_988,
            Unit::KcalPerMol => 1.0 / 627.509_474_063_1,
            Unit::KjPerMol => 1.0 / 2_625.499_639_479_8,
            Unit::Angstrom => 1.0 / BOHR_IN_ANGSTROM,
        }
    }
}

/// Factor that converts a value in `from` into a value in `to`.
pub fn conversion_ratio(from: Unit, to: Unit) -> Result<f64> {
    if from.quantity() != to.quantity() {
        return Err(Error::InvalidOperation(format!(
            "cannot convert {} to {}",
            from, to
        )));
    }
    Ok(from.in_atomic_units() / to.in_atomic_units())
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Unit::Hartree => "hartree",
            Unit::ElectronVolt => "eV",
            Unit::KcalPerMol => "kcal/mol",
            Unit::KjPerMol => "kJ/mol",
            Unit::Bohr => "bohr",
            Unit::Angstrom => "angstrom",
        })
    }
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "au" | "hartree" | "ha" => Ok(Unit::Hartree),
            "ev" => Ok(Unit::ElectronVolt),
            "kcal/mol" => Ok(Unit::KcalPerMol),
            "kj/mol" => Ok(Unit::KjPerMol),
            "bohr" | "a0" => Ok(Unit::Bohr),
            "angstrom" | "a" => Ok(Unit::Angstrom),
            other => Err(Error::InvalidOperation(format!("unknown unit '{}'", other))),
        }
    }
}
