//! Molecular geometry handed to the engine.

use std::path::Path;

use crate::error::{Error, Result};

/// Atoms, coordinates and optional lattice of a system.
///
/// Coordinates and lattice vectors are in angstrom.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Geometry {
    pub symbols: Vec<String>,
    pub coords: Vec<[f64; 3]>,
    /// Zero to three lattice vectors.
    pub lattice: Vec<[f64; 3]>,
    pub charge: f64,
}

impl Geometry {
    pub fn new(symbols: Vec<String>, coords: Vec<[f64; 3]>) -> Result<Self> {
        if symbols.len() != coords.len() {
            return Err(Error::InvalidOperation(format!(
                "{} atom symbols but {} coordinates",
                symbols.len(),
                coords.len()
            )));
        }
        Ok(Self {
            symbols,
            coords,
            lattice: Vec::new(),
            charge: 0.0,
        })
    }

    pub fn with_lattice(mut self, lattice: Vec<[f64; 3]>) -> Result<Self> {
        if lattice.len() > 3 {
            return Err(Error::InvalidOperation(format!(
                "at most 3 lattice vectors allowed, got {}",
                lattice.len()
            )));
        }
        self.lattice = lattice;
        Ok(self)
    }

    pub fn with_charge(mut self, charge: f64) -> Self {
        self.charge = charge;
        self
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn is_periodic(&self) -> bool {
        !self.lattice.is_empty()
    }

    /// Parse the XYZ format.
    ///
    /// The first line holds the atom count, the second a comment, followed by
    /// `symbol x y z` lines. Extra `VEC1`..`VEC3` lines define the lattice.
    pub fn from_xyz_str(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let count: usize = lines
            .next()
            .map(str::trim)
            .ok_or_else(|| Error::InvalidOperation("empty XYZ input".into()))?
            .parse()
            .map_err(|e| Error::InvalidOperation(format!("bad atom count in XYZ input: {}", e)))?;
        lines.next();

        let mut symbols = Vec::with_capacity(count);
        let mut coords = Vec::with_capacity(count);
        let mut lattice = Vec::new();
        for line in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() < 4 {
                return Err(Error::InvalidOperation(format!(
                    "malformed XYZ line: '{}'",
                    line
                )));
            }
            let mut xyz = [0.0; 3];
            for (slot, field) in xyz.iter_mut().zip(&fields[1..4]) {
                *slot = field.parse().map_err(|e| {
                    Error::InvalidOperation(format!("bad coordinate '{}': {}", field, e))
                })?;
            }
            if fields[0].to_ascii_uppercase().starts_with("VEC") {
                lattice.push(xyz);
            } else {
                symbols.push(fields[0].to_string());
                coords.push(xyz);
            }
        }

        if symbols.len() != count {
            return Err(Error::InvalidOperation(format!(
                "XYZ header announces {} atoms, found {}",
                count,
                symbols.len()
            )));
        }
        Geometry::new(symbols, coords)?.with_lattice(lattice)
    }

    pub fn from_xyz_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_xyz_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WATER: &str = "3
water
O  0.000  0.000  0.119
H  0.000  0.763 -0.477
H  0.000 -0.763 -0.477
";

    #[test]
    fn test_parse_xyz() {
        let geometry = Geometry::from_xyz_str(WATER).unwrap();
        assert_eq!(geometry.len(), 3);
        assert_eq!(geometry.symbols, vec!["O", "H", "H"]);
        assert_eq!(geometry.coords[1], [0.0, 0.763, -0.477]);
        assert!(!geometry.is_periodic());
    }

    #[test]
    fn test_parse_xyz_with_lattice() {
        let text = "1\nchain\nC 0 0 0\nVEC1 2.5 0 0\n";
        let geometry = Geometry::from_xyz_str(text).unwrap();
        assert_eq!(geometry.lattice, vec![[2.5, 0.0, 0.0]]);
    }

    #[test]
    fn test_count_mismatch() {
        assert!(Geometry::from_xyz_str("2\n\nH 0 0 0\n").is_err());
        assert!(Geometry::new(vec!["H".into()], vec![]).is_err());
    }
}
