//! Results of one evaluation.

use crate::error::{CapturedOutput, Error, Result};
use crate::geometry::Geometry;
use crate::ipc::{Map, NdArray, Value};
use crate::units::{Unit, conversion_ratio};

/// Outcome of one named evaluation, successful or not.
///
/// Records are immutable. When the worker kept the results for warm starts,
/// hand the name back through `Worker::release` once the record is no longer
/// needed.
#[derive(Debug)]
pub struct ResultRecord {
    name: String,
    input: Geometry,
    outcome: std::result::Result<Success, Error>,
}

#[derive(Debug)]
struct Success {
    results: Map,
    main: Geometry,
}

impl ResultRecord {
    /// Build a record from the unflattened `results` map of a reply.
    ///
    /// Final coordinates (`xyzAtoms`, `latticeVectors`) are moved out of the
    /// map into the main geometry, converted from bohr to angstrom.
    pub fn success(name: impl Into<String>, input: Geometry, mut results: Map) -> Result<Self> {
        let mut main = input.clone();
        if let Some(value) = results.remove("xyzAtoms") {
            let to_angstrom = conversion_ratio(Unit::Bohr, Unit::Angstrom)?;
            main.coords = coordinate_rows(&value, "xyzAtoms", to_angstrom)?;
            if main.coords.len() != main.symbols.len() {
                return Err(Error::Deserialization(format!(
                    "xyzAtoms holds {} atoms, input has {}",
                    main.coords.len(),
                    main.symbols.len()
                )));
            }
            if let Some(value) = results.remove("latticeVectors") {
                main.lattice = coordinate_rows(&value, "latticeVectors", to_angstrom)?;
            }
        }
        Ok(Self {
            name: name.into(),
            input,
            outcome: Ok(Success { results, main }),
        })
    }

    pub fn failure(name: impl Into<String>, input: Geometry, error: Error) -> Self {
        Self {
            name: name.into(),
            input,
            outcome: Err(error),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }

    /// Worker output captured while recovering from a transport failure.
    pub fn output(&self) -> Option<&CapturedOutput> {
        self.error().and_then(Error::output)
    }

    /// Most specific error line of a failed record.
    pub fn error_message(&self) -> Option<String> {
        self.error().map(Error::error_message)
    }

    /// Geometry the calculation was started from; available on failed records too.
    pub fn input_geometry(&self) -> &Geometry {
        &self.input
    }

    /// Final geometry: optimized coordinates if the engine sent any.
    pub fn main_geometry(&self) -> Result<&Geometry> {
        Ok(&self.success_ref()?.main)
    }

    /// The whole unflattened results map.
    pub fn raw(&self) -> Result<&Map> {
        Ok(&self.success_ref()?.results)
    }

    pub fn energy(&self, unit: Unit) -> Result<f64> {
        let value = self.field("energy")?;
        let energy = value.as_f64().ok_or_else(|| {
            Error::Deserialization(format!("energy is a {}, expected a number", value.kind()))
        })?;
        Ok(energy * conversion_ratio(Unit::Hartree, unit)?)
    }

    /// Nuclear gradients in `energy_unit` / `dist_unit`.
    pub fn gradients(&self, energy_unit: Unit, dist_unit: Unit) -> Result<NdArray> {
        let factor = conversion_ratio(Unit::Hartree, energy_unit)?
            / conversion_ratio(Unit::Bohr, dist_unit)?;
        let gradients = self.array("gradients")?;
        gradients.scaled(factor).ok_or_else(|| {
            Error::Deserialization("gradients are not numeric".to_string())
        })
    }

    pub fn stress_tensor(&self) -> Result<&NdArray> {
        self.array("stressTensor")
    }

    pub fn hessian(&self) -> Result<&NdArray> {
        self.array("hessian")
    }

    pub fn elastic_tensor(&self) -> Result<&NdArray> {
        self.array("elasticTensor")
    }

    pub fn charges(&self) -> Result<&NdArray> {
        self.array("charges")
    }

    pub fn dipole_moment(&self) -> Result<&NdArray> {
        self.array("dipoleMoment")
    }

    /// A `3 * atoms x 3` matrix.
    pub fn dipole_gradients(&self) -> Result<&NdArray> {
        self.array("dipoleGradients")
    }

    fn success_ref(&self) -> Result<&Success> {
        self.outcome.as_ref().map_err(|e| {
            Error::InvalidOperation(format!(
                "results of failed calculation {} are not available: {}",
                self.name,
                e.error_message()
            ))
        })
    }

    fn field(&self, key: &str) -> Result<&Value> {
        self.success_ref()?.results.get(key).ok_or_else(|| {
            Error::InvalidOperation(format!("{} was not computed for {}", key, self.name))
        })
    }

    fn array(&self, key: &str) -> Result<&NdArray> {
        let value = self.field(key)?;
        value.as_array().ok_or_else(|| {
            Error::Deserialization(format!("{} is a {}, expected an array", key, value.kind()))
        })
    }
}

fn coordinate_rows(value: &Value, key: &str, factor: f64) -> Result<Vec<[f64; 3]>> {
    value
        .as_array()
        .and_then(|a| a.scaled(factor))
        .and_then(|a| a.to_rows())
        .ok_or_else(|| Error::Deserialization(format!("{} is not an n x 3 array", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::PipeError;
    use crate::units::BOHR_IN_ANGSTROM;

    fn h2() -> Geometry {
        Geometry::new(
            vec!["H".into(), "H".into()],
            vec![[0.0, 0.0, 0.0], [0.74, 0.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_success_accessors() {
        let mut results = Map::new();
        results.insert("energy".into(), Value::Float(-1.0));
        results.insert(
            "gradients".into(),
            NdArray::from_rows(&[[0.1, 0.0, 0.0], [-0.1, 0.0, 0.0]]).into(),
        );
        let record = ResultRecord::success("h2", h2(), results).unwrap();

        assert!(record.ok());
        assert!(record.error_message().is_none());
        assert_eq!(record.energy(Unit::Hartree).unwrap(), -1.0);
        assert!((record.energy(Unit::ElectronVolt).unwrap() + 27.211_386).abs() < 1e-5);

        let per_angstrom = record.gradients(Unit::Hartree, Unit::Angstrom).unwrap();
        let rows = per_angstrom.to_rows().unwrap();
        assert!((rows[0][0] - 0.1 / BOHR_IN_ANGSTROM).abs() < 1e-12);

        assert!(matches!(record.charges(), Err(Error::InvalidOperation(_))));
        assert_eq!(record.main_geometry().unwrap(), &h2());
    }

    #[test]
    fn test_main_geometry_from_optimized_coordinates() {
        let mut results = Map::new();
        results.insert("energy".into(), Value::Float(-1.1));
        results.insert(
            "xyzAtoms".into(),
            NdArray::from_rows(&[[0.0, 0.0, 0.0], [1.4, 0.0, 0.0]]).into(),
        );
        let record = ResultRecord::success("opt", h2(), results).unwrap();

        let main = record.main_geometry().unwrap();
        assert!((main.coords[1][0] - 1.4 * BOHR_IN_ANGSTROM).abs() < 1e-12);
        assert_eq!(record.input_geometry().coords[1][0], 0.74);
        assert!(!record.raw().unwrap().contains_key("xyzAtoms"));
    }

    #[test]
    fn test_failed_record() {
        let mut ret = Map::new();
        ret.insert("status".into(), Value::Int(3));
        ret.insert("message".into(), Value::from("ERROR: optimization did not converge"));
        let error = Error::Pipe(PipeError::from_return(&ret));
        let record = ResultRecord::failure("bad", h2(), error);

        assert!(!record.ok());
        assert_eq!(
            record.error_message().as_deref(),
            Some("optimization did not converge")
        );
        assert!(record.output().is_none());
        assert!(matches!(
            record.energy(Unit::Hartree),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(record.input_geometry().len(), 2);
    }
}
