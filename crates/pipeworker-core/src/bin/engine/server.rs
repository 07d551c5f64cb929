//! Request loop of the reference engine.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::Duration;

use pipeworker_core::ipc::message::{decode, encode};
use pipeworker_core::ipc::{
    ArrayData, Map, Method, NdArray, PipeError, PipeStatus, RETURN_KEY, ReplyKind, Value, flatten,
    read_frame, unflatten, write_frame,
};
use pipeworker_core::{Error, Result};
use tracing::{debug, info, warn};

use crate::EngineInput;
use crate::model::{Convergence, PairPotential};

/// A failed call, answered with a nonzero status.
#[derive(Debug)]
struct Failure {
    status: PipeStatus,
    message: String,
    argument: Option<String>,
}

impl Failure {
    fn new(status: PipeStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            argument: None,
        }
    }

    fn argument(status: PipeStatus, argument: &str, message: impl Into<String>) -> Self {
        Self {
            argument: Some(argument.to_string()),
            ..Self::new(status, message)
        }
    }

    fn into_pipe_error(self, method: &str) -> PipeError {
        PipeError {
            status: self.status,
            message: Some(format!("ERROR: {}", self.message)),
            method: Some(method.to_string()),
            argument: self.argument,
        }
    }
}

type CallResult = std::result::Result<Vec<Map>, Failure>;

#[derive(Default)]
struct System {
    coords: Vec<[f64; 3]>,
    lattice: Vec<[f64; 3]>,
}

pub struct Server {
    input: EngineInput,
    model: PairPotential,
    system: Option<System>,
    /// Energies of results kept under their title.
    kept: BTreeMap<String, f64>,
    /// First failure of a call that is not answered, reported on the next one.
    deferred: Option<(String, Failure)>,
}

impl Server {
    pub fn new(input: EngineInput) -> Self {
        let model = PairPotential {
            epsilon: input.epsilon,
            sigma: input.sigma,
        };
        Self {
            input,
            model,
            system: None,
            kept: BTreeMap::new(),
            deferred: None,
        }
    }

    /// Serve calls until `Exit` or until the caller closes the call pipe.
    pub fn run<R: Read, W: Write>(&mut self, reader: &mut R, writer: &mut W) -> Result<()> {
        loop {
            let frame = match read_frame(reader) {
                Ok(frame) => frame,
                Err(Error::TruncatedMessage { received: 0, .. }) => {
                    info!("Call pipe closed, shutting down");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let (name, args) = match parse_call(&frame) {
                Ok(call) => call,
                Err(failure) => {
                    warn!("Rejecting undecodable call: {}", failure.message);
                    self.finish(writer, "unknown", Err(failure))?;
                    continue;
                }
            };
            let Some(method) = Method::from_name(&name) else {
                let failure = Failure::new(PipeStatus::UnknownMethod, format!("unknown method {}", name));
                self.finish(writer, &name, Err(failure))?;
                continue;
            };
            debug!(method = %method, "Received call");

            match method.reply_kind() {
                ReplyKind::NoReply => {
                    info!("Exit requested");
                    return Ok(());
                }
                ReplyKind::Deferred => {
                    if let Err(failure) = self.handle_deferred(method, &args) {
                        warn!(method = %method, "Deferred failure: {}", failure.message);
                        if self.deferred.is_none() {
                            self.deferred = Some((method.name().to_string(), failure));
                        }
                    }
                }
                ReplyKind::Status | ReplyKind::Stream => {
                    if let Some((origin, failure)) = self.deferred.take() {
                        self.finish(writer, &origin, Err(failure))?;
                        continue;
                    }
                    let result = self.handle(method, &args);
                    self.finish(writer, method.name(), result)?;
                }
            }
        }
    }

    fn finish<W: Write>(&mut self, writer: &mut W, method: &str, result: CallResult) -> Result<()> {
        let ret = match result {
            Ok(messages) => {
                for message in messages {
                    send(writer, &flatten(&message))?;
                }
                let mut ret = Map::new();
                ret.insert("status".into(), Value::Int(PipeStatus::Success.code()));
                ret
            }
            Err(failure) => failure.into_pipe_error(method).to_return(),
        };
        let mut terminal = Map::new();
        terminal.insert(RETURN_KEY.into(), Value::Map(ret));
        send(writer, &terminal)?;
        writer
            .flush()
            .map_err(|e| Error::Ipc(format!("Failed to flush reply pipe: {}", e)))
    }

    fn handle_deferred(&mut self, method: Method, args: &Map) -> std::result::Result<(), Failure> {
        match method {
            Method::SetSystem => {
                let symbols = args
                    .get("atomSymbols")
                    .and_then(Value::as_array)
                    .ok_or_else(|| missing("atomSymbols"))?;
                let coords = rows(args, "coords")?;
                if symbols.len() != coords.len() {
                    return Err(Failure::argument(
                        PipeStatus::InvalidArgument,
                        "coords",
                        format!("{} symbols but {} coordinates", symbols.len(), coords.len()),
                    ));
                }
                self.system = Some(System {
                    coords,
                    lattice: Vec::new(),
                });
                Ok(())
            }
            Method::SetLattice => {
                let system = self
                    .system
                    .as_mut()
                    .ok_or_else(|| Failure::new(PipeStatus::LogicError, "SetLattice before SetSystem"))?;
                system.lattice = if args.contains_key("vectors") {
                    rows(args, "vectors")?
                } else {
                    Vec::new()
                };
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle(&mut self, method: Method, args: &Map) -> CallResult {
        match method {
            Method::Hello => {
                let version = args.get("version").and_then(Value::as_i64);
                if version != Some(1) {
                    return Err(Failure::argument(
                        PipeStatus::UnknownVersion,
                        "version",
                        format!("unsupported protocol version {:?}", version),
                    ));
                }
                Ok(Vec::new())
            }
            Method::Solve | Method::Optimize => self.solve(method, args),
            Method::DeleteResults => {
                let title = text(args, "title")?;
                if self.kept.remove(title).is_none() {
                    return Err(Failure::argument(
                        PipeStatus::LogicError,
                        "title",
                        format!("no results stored under {}", title),
                    ));
                }
                debug!(title, "Deleted kept results");
                Ok(Vec::new())
            }
            Method::ParseInput => {
                let program = text(args, "programName")?;
                let input = text(args, "textInput")?;
                let json = parse_input(program, input)?;
                let mut parsed = Map::new();
                parsed.insert("jsonInput".into(), Value::from(json));
                let mut reply = Map::new();
                reply.insert("parsedInput".into(), Value::Map(parsed));
                Ok(vec![reply])
            }
            _ => Err(Failure::new(
                PipeStatus::LogicError,
                format!("{} does not expect a reply", method),
            )),
        }
    }

    fn solve(&mut self, method: Method, args: &Map) -> CallResult {
        let system = self
            .system
            .as_ref()
            .ok_or_else(|| Failure::new(PipeStatus::LogicError, "no system has been set"))?;
        let request = args
            .get("request")
            .and_then(Value::as_map)
            .ok_or_else(|| missing("request"))?;
        let title = text(request, "title")?.to_string();
        let flag = |key: &str| request.get(key).and_then(Value::as_bool).unwrap_or(false);
        let keep = args.get("keepResults").and_then(Value::as_bool).unwrap_or(false);

        if keep && self.kept.contains_key(&title) {
            return Err(Failure::argument(
                PipeStatus::LogicError,
                "title",
                format!("results named {} already exist", title),
            ));
        }
        if let Some(prev) = args.get("prevTitle").and_then(Value::as_str) {
            if self.kept.contains_key(prev) {
                debug!(title = %title, prev, "Warm start from kept results");
            } else {
                warn!(prev, "Unknown prevTitle, starting cold");
            }
        }
        for unsupported in ["stressTensor", "elasticTensor", "dipoleGradients"] {
            if flag(unsupported) {
                return Err(Failure::argument(
                    PipeStatus::InvalidArgument,
                    unsupported,
                    format!("{} is not available for a pair potential", unsupported),
                ));
            }
        }
        if self.input.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.input.delay_ms));
        }

        let quiet = flag("quiet");
        let mut results = Map::new();
        let (coords, energy, gradients) = if method == Method::Optimize {
            let conv = convergence(args)?;
            let pretend = args.get("pretendConverged").and_then(Value::as_bool).unwrap_or(false);
            let optimized = self
                .model
                .optimize(&system.coords, &conv, |step, energy, gmax| {
                    if !quiet {
                        println!("{}: step {} energy {:.10} max gradient {:.3e}", title, step, energy, gmax);
                    }
                })
                .map_err(|e| Failure::new(PipeStatus::RuntimeError, e))?;
            if !optimized.converged && !pretend {
                return Err(Failure::new(
                    PipeStatus::RuntimeError,
                    format!(
                        "geometry optimization did not converge within {} iterations",
                        optimized.iterations
                    ),
                ));
            }
            results.insert("xyzAtoms".into(), NdArray::from_rows(&optimized.coords).into());
            if !system.lattice.is_empty() {
                results.insert("latticeVectors".into(), NdArray::from_rows(&system.lattice).into());
            }
            (optimized.coords, optimized.energy, optimized.gradients)
        } else {
            let (energy, gradients) = self
                .model
                .evaluate(&system.coords)
                .map_err(|e| Failure::new(PipeStatus::RuntimeError, e))?;
            (system.coords.clone(), energy, gradients)
        };

        results.insert("energy".into(), Value::Float(energy));
        if flag("gradients") {
            results.insert("gradients".into(), NdArray::from_rows(&gradients).into());
        }
        if flag("hessian") {
            let n = coords.len() * 3;
            let hessian = self
                .model
                .hessian(&coords)
                .map_err(|e| Failure::new(PipeStatus::RuntimeError, e))?;
            let hessian = NdArray::new(vec![n, n], ArrayData::Float(hessian))
                .map_err(|e| Failure::new(PipeStatus::RuntimeError, e.to_string()))?;
            results.insert("hessian".into(), hessian.into());
        }
        if flag("charges") {
            results.insert("charges".into(), NdArray::from_f64(vec![0.0; coords.len()]).into());
        }
        if flag("dipoleMoment") {
            results.insert("dipoleMoment".into(), NdArray::from_f64(vec![0.0; 3]).into());
        }
        if !quiet {
            println!("{}: energy {:.10}", title, energy);
        }

        if keep {
            self.kept.insert(title, energy);
        }
        let mut reply = Map::new();
        reply.insert("results".into(), Value::Map(results));
        Ok(vec![reply])
    }
}

fn send<W: Write>(writer: &mut W, message: &Map) -> Result<()> {
    let bytes = encode(message)?;
    write_frame(writer, &bytes)
}

fn parse_call(frame: &[u8]) -> std::result::Result<(String, Map), Failure> {
    let message = decode(frame).map_err(|e| Failure::new(PipeStatus::DecodeError, e.to_string()))?;
    let mut entries = message.into_iter();
    let (Some((name, args)), None) = (entries.next(), entries.next()) else {
        return Err(Failure::new(
            PipeStatus::DecodeError,
            "a call must hold exactly one method",
        ));
    };
    let Value::Map(args) = args else {
        return Err(Failure::new(PipeStatus::DecodeError, "call arguments must be a map"));
    };
    let args = unflatten(args).map_err(|e| Failure::new(PipeStatus::DecodeError, e.to_string()))?;
    Ok((name, args))
}

fn missing(argument: &str) -> Failure {
    Failure::argument(
        PipeStatus::InvalidArgument,
        argument,
        format!("missing or malformed {}", argument),
    )
}

fn text<'a>(args: &'a Map, key: &str) -> std::result::Result<&'a str, Failure> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| missing(key))
}

fn rows(args: &Map, key: &str) -> std::result::Result<Vec<[f64; 3]>, Failure> {
    args.get(key)
        .and_then(Value::as_array)
        .and_then(NdArray::to_rows)
        .ok_or_else(|| missing(key))
}

fn convergence(args: &Map) -> std::result::Result<Convergence, Failure> {
    let mut conv = Convergence::default();
    if let Some(value) = args.get("maxIterations") {
        let n = value.as_i64().filter(|n| *n >= 0).ok_or_else(|| missing("maxIterations"))?;
        conv.max_iterations = n as usize;
    }
    for (key, slot) in [
        ("convEnergy", &mut conv.energy),
        ("convGradients", &mut conv.gradients),
        ("convStep", &mut conv.step),
    ] {
        if let Some(value) = args.get(key) {
            *slot = value.as_f64().ok_or_else(|| missing(key))?;
        }
    }
    Ok(conv)
}

/// Parse `key value` lines into a JSON object.
fn parse_input(program: &str, text: &str) -> std::result::Result<String, Failure> {
    let mut input = serde_json::Map::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (line, ""),
        };
        if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Failure::argument(
                PipeStatus::InvalidArgument,
                "textInput",
                format!("line {}: invalid key '{}'", number + 1, key),
            ));
        }
        let value = if value.is_empty() {
            serde_json::Value::Bool(true)
        } else if let Ok(int) = value.parse::<i64>() {
            int.into()
        } else if let Ok(float) = value.parse::<f64>() {
            float.into()
        } else {
            value.into()
        };
        input.insert(key.to_string(), value);
    }
    let document = serde_json::json!({ "program": program, "input": input });
    serde_json::to_string(&document).map_err(|e| Failure::new(PipeStatus::RuntimeError, e.to_string()))
}
