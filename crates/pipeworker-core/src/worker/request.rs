//! Evaluation options and their translation into engine requests.
//!
//! Options can also be built from flattened settings entries (a path of
//! keys plus a value) through the static [`RequestArg`] table.

use crate::error::{Error, Result};
use crate::geometry::Geometry;
use crate::ipc::{Map, Method, NdArray, Value};
use crate::units::{Unit, conversion_ratio};

/// Kind of calculation requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Task {
    #[default]
    SinglePoint,
    GeometryOptimization,
}

impl Task {
    fn parse(value: &str) -> Option<Task> {
        match value.to_ascii_lowercase().as_str() {
            "singlepoint" => Some(Task::SinglePoint),
            "geometryoptimization" => Some(Task::GeometryOptimization),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Task::SinglePoint => "SinglePoint",
            Task::GeometryOptimization => "GeometryOptimization",
        }
    }
}

/// Properties computed in addition to the energy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub gradients: bool,
    pub stress_tensor: bool,
    pub hessian: bool,
    pub elastic_tensor: bool,
    pub charges: bool,
    pub dipole_moment: bool,
    pub dipole_gradients: bool,
}

/// Geometry optimizer controls; only valid for [`Task::GeometryOptimization`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerOptions {
    pub method: Option<String>,
    pub coordinate_type: Option<String>,
    pub use_symmetry: Option<bool>,
    pub optimize_lattice: bool,
    pub max_iterations: Option<i64>,
    /// Treat a non-converged optimization as successful.
    pub pretend_converged: bool,
    /// Energy criterion in hartree.
    pub conv_energy: Option<f64>,
    /// Gradient criterion in hartree/bohr.
    pub conv_gradients: Option<f64>,
    /// Step criterion in bohr.
    pub conv_step: Option<f64>,
    pub conv_stress_energy_per_atom: Option<f64>,
}

/// Options of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluateOptions {
    pub task: Task,
    /// Name of an earlier result to warm-start from.
    pub prev_result: Option<String>,
    pub quiet: bool,
    pub properties: Properties,
    pub optimizer: OptimizerOptions,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            task: Task::SinglePoint,
            prev_result: None,
            quiet: true,
            properties: Properties::default(),
            optimizer: OptimizerOptions::default(),
        }
    }
}

impl EvaluateOptions {
    pub fn single_point() -> Self {
        Self::default()
    }

    pub fn geometry_optimization() -> Self {
        Self {
            task: Task::GeometryOptimization,
            ..Self::default()
        }
    }

    pub fn with_gradients(mut self) -> Self {
        self.properties.gradients = true;
        self
    }

    pub fn with_prev_result(mut self, name: impl Into<String>) -> Self {
        self.prev_result = Some(name.into());
        self
    }

    /// Reject combinations the engine cannot act on.
    pub fn validate(&self) -> Result<()> {
        if self.task == Task::SinglePoint && self.optimizer != OptimizerOptions::default() {
            return Err(Error::InvalidOperation(
                "optimizer options require a GeometryOptimization task".to_string(),
            ));
        }
        if let Some(n) = self.optimizer.max_iterations {
            if n < 0 {
                return Err(Error::InvalidOperation(format!(
                    "max_iterations must not be negative, got {}",
                    n
                )));
            }
        }
        Ok(())
    }

    /// Translate flattened settings entries into options.
    pub fn from_settings<I, P>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, Value)>,
        P: AsRef<[String]>,
    {
        let mut options = Self::default();
        let mut has_task = false;
        for (path, value) in entries {
            let path = path.as_ref();
            let arg = RequestArg::from_settings_path(path).ok_or_else(|| {
                Error::UnsupportedSettings(format!("Unexpected key {}", path.join(".")))
            })?;
            has_task |= arg == RequestArg::Task;
            options.apply(arg, value)?;
        }
        if !has_task {
            return Err(Error::UnsupportedSettings(
                "No input.ams.task found".to_string(),
            ));
        }
        Ok(options)
    }

    /// Whether the settings entries can be evaluated by a worker.
    pub fn supports<I, P>(entries: I) -> bool
    where
        I: IntoIterator<Item = (P, Value)>,
        P: AsRef<[String]>,
    {
        Self::from_settings(entries).is_ok()
    }

    /// Flattened settings entries equivalent to these options.
    pub fn to_settings(&self) -> Vec<(Vec<String>, Value)> {
        let mut entries = vec![(RequestArg::Task, Value::from(self.task.name()))];
        let flag = |entries: &mut Vec<(RequestArg, Value)>, arg, on: bool| {
            if on {
                entries.push((arg, Value::Bool(true)));
            }
        };
        if let Some(prev) = &self.prev_result {
            entries.push((RequestArg::PrevResults, Value::from(prev.as_str())));
        }
        if !self.quiet {
            entries.push((RequestArg::Quiet, Value::Bool(false)));
        }
        let p = &self.properties;
        flag(&mut entries, RequestArg::Gradients, p.gradients);
        flag(&mut entries, RequestArg::StressTensor, p.stress_tensor);
        flag(&mut entries, RequestArg::Hessian, p.hessian);
        flag(&mut entries, RequestArg::ElasticTensor, p.elastic_tensor);
        flag(&mut entries, RequestArg::Charges, p.charges);
        flag(&mut entries, RequestArg::DipoleMoment, p.dipole_moment);
        flag(&mut entries, RequestArg::DipoleGradients, p.dipole_gradients);

        let o = &self.optimizer;
        if let Some(method) = &o.method {
            entries.push((RequestArg::Method, Value::from(method.as_str())));
        }
        if let Some(ct) = &o.coordinate_type {
            entries.push((RequestArg::CoordinateType, Value::from(ct.as_str())));
        }
        if let Some(sym) = o.use_symmetry {
            entries.push((RequestArg::UseSymmetry, Value::Bool(sym)));
        }
        flag(&mut entries, RequestArg::OptimizeLattice, o.optimize_lattice);
        if let Some(n) = o.max_iterations {
            entries.push((RequestArg::MaxIterations, Value::Int(n)));
        }
        flag(&mut entries, RequestArg::PretendConverged, o.pretend_converged);
        for (arg, value) in [
            (RequestArg::ConvEnergy, o.conv_energy),
            (RequestArg::ConvGradients, o.conv_gradients),
            (RequestArg::ConvStep, o.conv_step),
            (RequestArg::ConvStressEnergyPerAtom, o.conv_stress_energy_per_atom),
        ] {
            if let Some(v) = value {
                entries.push((arg, Value::Float(v)));
            }
        }

        entries
            .into_iter()
            .map(|(arg, value)| {
                let path = arg.settings_path().iter().map(|s| s.to_string()).collect();
                (path, value)
            })
            .collect()
    }

    fn apply(&mut self, arg: RequestArg, value: Value) -> Result<()> {
        let boolean = |value: &Value| value.as_bool().ok_or_else(|| wrong_type(arg, "a bool", value));
        let number = |value: &Value| value.as_f64().ok_or_else(|| wrong_type(arg, "a number", value));
        let text = |value: &Value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| wrong_type(arg, "a string", value))
        };

        match arg {
            RequestArg::PrevResults => self.prev_result = Some(text(&value)?),
            RequestArg::Quiet => self.quiet = boolean(&value)?,
            RequestArg::Gradients => self.properties.gradients = boolean(&value)?,
            RequestArg::StressTensor => self.properties.stress_tensor = boolean(&value)?,
            RequestArg::Hessian => self.properties.hessian = boolean(&value)?,
            RequestArg::ElasticTensor => self.properties.elastic_tensor = boolean(&value)?,
            RequestArg::Charges => self.properties.charges = boolean(&value)?,
            RequestArg::DipoleMoment => self.properties.dipole_moment = boolean(&value)?,
            RequestArg::DipoleGradients => self.properties.dipole_gradients = boolean(&value)?,
            RequestArg::CoordinateType => self.optimizer.coordinate_type = Some(text(&value)?),
            RequestArg::OptimizeLattice => self.optimizer.optimize_lattice = boolean(&value)?,
            RequestArg::MaxIterations => {
                self.optimizer.max_iterations =
                    Some(value.as_i64().ok_or_else(|| wrong_type(arg, "an integer", &value))?)
            }
            RequestArg::PretendConverged => self.optimizer.pretend_converged = boolean(&value)?,
            RequestArg::ConvEnergy => self.optimizer.conv_energy = Some(number(&value)?),
            RequestArg::ConvGradients => self.optimizer.conv_gradients = Some(number(&value)?),
            RequestArg::ConvStep => self.optimizer.conv_step = Some(number(&value)?),
            RequestArg::ConvStressEnergyPerAtom => {
                self.optimizer.conv_stress_energy_per_atom = Some(number(&value)?)
            }
            RequestArg::UseSymmetry => self.optimizer.use_symmetry = Some(boolean(&value)?),
            RequestArg::Method => self.optimizer.method = Some(text(&value)?),
            RequestArg::Task => {
                let name = text(&value)?;
                self.task = Task::parse(&name).ok_or_else(|| {
                    Error::UnsupportedSettings(format!("Unexpected task {}", name))
                })?;
            }
        }
        Ok(())
    }
}

fn wrong_type(arg: RequestArg, expected: &str, value: &Value) -> Error {
    Error::UnsupportedSettings(format!(
        "{} expects {}, got {}",
        arg.name(),
        expected,
        value.kind()
    ))
}

/// Request arguments and the settings paths they correspond to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestArg {
    PrevResults,
    Quiet,
    Gradients,
    StressTensor,
    Hessian,
    ElasticTensor,
    Charges,
    DipoleMoment,
    DipoleGradients,
    CoordinateType,
    OptimizeLattice,
    MaxIterations,
    PretendConverged,
    ConvEnergy,
    ConvGradients,
    ConvStep,
    ConvStressEnergyPerAtom,
    Task,
    UseSymmetry,
    Method,
}

impl RequestArg {
    pub const ALL: [RequestArg; 20] = [
        RequestArg::PrevResults,
        RequestArg::Quiet,
        RequestArg::Gradients,
        RequestArg::StressTensor,
        RequestArg::Hessian,
        RequestArg::ElasticTensor,
        RequestArg::Charges,
        RequestArg::DipoleMoment,
        RequestArg::DipoleGradients,
        RequestArg::CoordinateType,
        RequestArg::OptimizeLattice,
        RequestArg::MaxIterations,
        RequestArg::PretendConverged,
        RequestArg::ConvEnergy,
        RequestArg::ConvGradients,
        RequestArg::ConvStep,
        RequestArg::ConvStressEnergyPerAtom,
        RequestArg::Task,
        RequestArg::UseSymmetry,
        RequestArg::Method,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RequestArg::PrevResults => "prev_results",
            RequestArg::Quiet => "quiet",
            RequestArg::Gradients => "gradients",
            RequestArg::StressTensor => "stresstensor",
            RequestArg::Hessian => "hessian",
            RequestArg::ElasticTensor => "elastictensor",
            RequestArg::Charges => "charges",
            RequestArg::DipoleMoment => "dipolemoment",
            RequestArg::DipoleGradients => "dipolegradients",
            RequestArg::CoordinateType => "coordinatetype",
            RequestArg::OptimizeLattice => "optimizelattice",
            RequestArg::MaxIterations => "maxiterations",
            RequestArg::PretendConverged => "pretendconverged",
            RequestArg::ConvEnergy => "convenergy",
            RequestArg::ConvGradients => "convgradients",
            RequestArg::ConvStep => "convstep",
            RequestArg::ConvStressEnergyPerAtom => "convstressenergyperatom",
            RequestArg::Task => "task",
            RequestArg::UseSymmetry => "usesymmetry",
            RequestArg::Method => "method",
        }
    }

    /// Lower-case settings path of this argument.
    pub fn settings_path(self) -> &'static [&'static str] {
        const PROPS: [&str; 3] = ["input", "ams", "properties"];
        match self {
            RequestArg::PrevResults => &["amsworker", "prev_results"],
            RequestArg::Quiet => &["amsworker", "quiet"],
            RequestArg::Gradients => &[PROPS[0], PROPS[1], PROPS[2], "gradients"],
            RequestArg::StressTensor => &[PROPS[0], PROPS[1], PROPS[2], "stresstensor"],
            RequestArg::Hessian => &[PROPS[0], PROPS[1], PROPS[2], "hessian"],
            RequestArg::ElasticTensor => &[PROPS[0], PROPS[1], PROPS[2], "elastictensor"],
            RequestArg::Charges => &[PROPS[0], PROPS[1], PROPS[2], "charges"],
            RequestArg::DipoleMoment => &[PROPS[0], PROPS[1], PROPS[2], "dipolemoment"],
            RequestArg::DipoleGradients => &[PROPS[0], PROPS[1], PROPS[2], "dipolegradients"],
            RequestArg::CoordinateType => &["input", "ams", "geometryoptimization", "coordinatetype"],
            RequestArg::OptimizeLattice => &["input", "ams", "geometryoptimization", "optimizelattice"],
            RequestArg::MaxIterations => &["input", "ams", "geometryoptimization", "maxiterations"],
            RequestArg::PretendConverged => &["input", "ams", "geometryoptimization", "pretendconverged"],
            RequestArg::ConvEnergy => &["input", "ams", "geometryoptimization", "convergence", "energy"],
            RequestArg::ConvGradients => &["input", "ams", "geometryoptimization", "convergence", "gradients"],
            RequestArg::ConvStep => &["input", "ams", "geometryoptimization", "convergence", "step"],
            RequestArg::ConvStressEnergyPerAtom => &[
                "input",
                "ams",
                "geometryoptimization",
                "convergence",
                "stressenergyperatom",
            ],
            RequestArg::Task => &["input", "ams", "task"],
            RequestArg::UseSymmetry => &["input", "ams", "usesymmetry"],
            RequestArg::Method => &["input", "ams", "geometryoptimization", "method"],
        }
    }

    /// Argument stored at a settings path, compared case-insensitively.
    pub fn from_settings_path<S: AsRef<str>>(path: &[S]) -> Option<RequestArg> {
        RequestArg::ALL.into_iter().find(|arg| {
            let expected = arg.settings_path();
            expected.len() == path.len()
                && expected
                    .iter()
                    .zip(path)
                    .all(|(e, p)| e.eq_ignore_ascii_case(p.as_ref()))
        })
    }
}

/// Arguments of the `SetSystem` call; coordinates go out in bohr.
pub(crate) fn system_args(geometry: &Geometry) -> Result<Map> {
    let to_bohr = conversion_ratio(Unit::Angstrom, Unit::Bohr)?;
    let coords: Vec<[f64; 3]> = geometry
        .coords
        .iter()
        .map(|c| [c[0] * to_bohr, c[1] * to_bohr, c[2] * to_bohr])
        .collect();

    let mut args = Map::new();
    args.insert(
        "atomSymbols".into(),
        NdArray::from_strings(geometry.symbols.clone()).into(),
    );
    args.insert("coords".into(), NdArray::from_rows(&coords).into());
    args.insert("totalCharge".into(), Value::Float(geometry.charge));
    Ok(args)
}

/// Arguments of the `SetLattice` call; empty for molecular systems.
pub(crate) fn lattice_args(geometry: &Geometry) -> Result<Map> {
    let mut args = Map::new();
    if geometry.is_periodic() {
        let to_bohr = conversion_ratio(Unit::Angstrom, Unit::Bohr)?;
        let vectors: Vec<[f64; 3]> = geometry
            .lattice
            .iter()
            .map(|v| [v[0] * to_bohr, v[1] * to_bohr, v[2] * to_bohr])
            .collect();
        args.insert("vectors".into(), NdArray::from_rows(&vectors).into());
    }
    Ok(args)
}

/// Method and arguments of the main `Solve` / `Optimize` call.
pub(crate) fn solve_call(
    name: &str,
    options: &EvaluateOptions,
    keep_results: bool,
    prev_title: Option<&str>,
) -> (Method, Map) {
    let mut request = Map::new();
    request.insert("title".into(), Value::from(name));
    let p = &options.properties;
    for (key, on) in [
        ("quiet", options.quiet),
        ("gradients", p.gradients),
        ("stressTensor", p.stress_tensor),
        ("hessian", p.hessian),
        ("elasticTensor", p.elastic_tensor),
        ("charges", p.charges),
        ("dipoleMoment", p.dipole_moment),
        ("dipoleGradients", p.dipole_gradients),
    ] {
        if on {
            request.insert(key.into(), Value::Bool(true));
        }
    }

    let mut args = Map::new();
    args.insert("request".into(), Value::Map(request));
    args.insert("keepResults".into(), Value::Bool(keep_results));
    if let Some(prev) = prev_title {
        args.insert("prevTitle".into(), Value::from(prev));
    }

    if options.task == Task::SinglePoint {
        return (Method::Solve, args);
    }

    let o = &options.optimizer;
    if let Some(method) = &o.method {
        args.insert("method".into(), Value::from(method.as_str()));
    }
    if let Some(ct) = &o.coordinate_type {
        args.insert("coordinateType".into(), Value::from(ct.as_str()));
    }
    if let Some(sym) = o.use_symmetry {
        args.insert("useSymmetry".into(), Value::Bool(sym));
    }
    if o.optimize_lattice {
        args.insert("optimizeLattice".into(), Value::Bool(true));
    }
    if let Some(n) = o.max_iterations {
        args.insert("maxIterations".into(), Value::Int(n));
    }
    if o.pretend_converged {
        args.insert("pretendConverged".into(), Value::Bool(true));
    }
    for (key, value) in [
        ("convEnergy", o.conv_energy),
        ("convGradients", o.conv_gradients),
        ("convStep", o.conv_step),
        ("convStressEnergyPerAtom", o.conv_stress_energy_per_atom),
    ] {
        if let Some(v) = value {
            args.insert(key.into(), Value::Float(v));
        }
    }
    (Method::Optimize, args)
}
