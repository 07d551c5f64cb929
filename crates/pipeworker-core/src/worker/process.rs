//! Supervision of one engine process.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::cache::RestartCache;
use super::launcher::EngineLauncher;
use super::request::{EvaluateOptions, OptimizerOptions, Properties, lattice_args, solve_call, system_args};
use super::results::ResultRecord;
use super::startup::{make_fifo, open_endpoints};
use crate::config::WorkerConfig;
use crate::error::{CapturedOutput, Error, Result};
use crate::geometry::Geometry;
use crate::ipc::{CallChannel, Map, Method, Value, unflatten};

const INPUT_FILE: &str = "worker.in";
const RUN_FILE: &str = "worker.run";
const STDOUT_FILE: &str = "worker.out";
const STDERR_FILE: &str = "worker.err";
const CALL_PIPE: &str = "call_pipe";
const REPLY_PIPE: &str = "reply_pipe";

type Channel = CallChannel<BufWriter<File>, BufReader<File>>;

/// A running engine process and its call channel.
struct Session {
    child: Child,
    channel: Channel,
}

impl Session {
    /// Turn a process that died since the last call into a transport error.
    fn check_alive(&mut self) -> Result<()> {
        match self.child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(Error::Ipc(format!("Engine process exited ({})", status))),
            Err(e) => Err(Error::Ipc(format!("Failed to poll engine process: {}", e))),
        }
    }
}

enum State {
    Ready(Box<Session>),
    /// The process died and could not be restarted yet.
    Crashed,
    /// Stopped on request.
    Stopped,
}

/// A persistent engine process driven over a pair of named pipes.
///
/// Calls are strictly serialized: every operation takes `&mut self`. A
/// transport failure during an evaluation is recovered from by restarting
/// the process; the evaluation itself comes back as a failed record carrying
/// the output of the dead process.
pub struct Worker {
    launcher: Arc<dyn EngineLauncher>,
    config: WorkerConfig,
    workdir: TempDir,
    state: State,
    cache: RestartCache,
    restart_count: usize,
}

impl Worker {
    /// Create the working directory and start the engine.
    pub fn new(launcher: Arc<dyn EngineLauncher>, config: WorkerConfig) -> Result<Self> {
        let prefix = format!("{}_", config.workdir_prefix);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let workdir = match &config.workdir_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let mut worker = Self {
            launcher,
            config,
            workdir,
            state: State::Stopped,
            cache: RestartCache::new(),
            restart_count: 0,
        };
        worker.start()?;
        Ok(worker)
    }

    /// Launch the engine and perform the handshake.
    ///
    /// Does nothing if the engine is already running. On failure the worker is
    /// left crashed and the error carries whatever the engine printed.
    pub fn start(&mut self) -> Result<()> {
        if matches!(self.state, State::Ready(_)) {
            return Ok(());
        }
        match self.launch() {
            Ok(session) => {
                info!(
                    pid = session.child.id(),
                    workdir = %self.workdir.path().display(),
                    "Worker started"
                );
                self.state = State::Ready(session);
                Ok(())
            }
            Err(message) => {
                // Tear down whatever got started; the launch left it in `state`.
                let output = self.shutdown();
                self.state = State::Crashed;
                warn!("Worker failed to start: {}", message);
                Err(Error::Startup { message, output })
            }
        }
    }

    fn launch(&mut self) -> std::result::Result<Box<Session>, String> {
        let dir = self.workdir.path().to_path_buf();
        let io_err = |what: &str, e: std::io::Error| format!("Failed to {}: {}", what, e);

        fs::write(dir.join(INPUT_FILE), self.launcher.input_text())
            .map_err(|e| io_err("write engine input", e))?;
        fs::write(dir.join(RUN_FILE), self.launcher.run_script())
            .map_err(|e| io_err("write run script", e))?;

        let call_path = dir.join(CALL_PIPE);
        let reply_path = dir.join(REPLY_PIPE);
        make_fifo(&call_path).map_err(|e| e.to_string())?;
        make_fifo(&reply_path).map_err(|e| e.to_string())?;

        let stdin = File::open(dir.join(INPUT_FILE)).map_err(|e| io_err("open engine input", e))?;
        let stdout = File::create(dir.join(STDOUT_FILE)).map_err(|e| io_err("create stdout file", e))?;
        let stderr = File::create(dir.join(STDERR_FILE)).map_err(|e| io_err("create stderr file", e))?;

        let mut child = Command::new("sh")
            .arg(RUN_FILE)
            .current_dir(&dir)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| io_err("spawn engine process", e))?;
        debug!(pid = child.id(), "Engine process spawned");

        let endpoints = open_endpoints(
            &mut child,
            &call_path,
            &reply_path,
            self.config.watchdog_interval(),
        );
        let (call, reply) = match endpoints {
            Ok(pair) => pair,
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(e.to_string());
            }
        };

        let channel = CallChannel::new(BufWriter::new(call), BufReader::new(reply))
            .with_max_frame(self.config.max_frame_bytes);
        let mut session = Box::new(Session { child, channel });

        if let Err(e) = session.check_alive() {
            self.state = State::Ready(session);
            return Err(format!("Engine exited before the handshake: {}", e));
        }

        let mut hello = Map::new();
        hello.insert("version".into(), Value::Int(self.config.protocol_version));
        if let Err(e) = session.channel.call(Method::Hello, &hello) {
            self.state = State::Ready(session);
            return Err(format!("Handshake failed: {}", e));
        }
        Ok(session)
    }

    /// Stop the engine and return everything it printed.
    ///
    /// Calling this on a stopped worker is a no-op returning empty output.
    pub fn stop(&mut self) -> CapturedOutput {
        let output = self.shutdown();
        self.state = State::Stopped;
        output
    }

    /// Tear down the process, pipes, cache and working directory contents.
    fn shutdown(&mut self) -> CapturedOutput {
        self.cache.clear();
        let State::Ready(session) = std::mem::replace(&mut self.state, State::Crashed) else {
            // A launch that failed early may still have left files behind.
            return self.collect_output();
        };
        let Session { mut child, mut channel } = *session;
        let pid = child.id();

        let exited = if matches!(child.try_wait(), Ok(None)) {
            let farewell = channel.call(Method::Exit, &Map::new());
            drop(channel);
            farewell.is_ok() && wait_with_timeout(&mut child, &self.config)
        } else {
            drop(channel);
            false
        };
        if !exited {
            kill_and_reap(&mut child);
        }

        let output = self.collect_output();
        info!(pid, graceful = exited, "Worker stopped");
        output
    }

    /// Read back the engine's output files, then empty the working directory.
    fn collect_output(&self) -> CapturedOutput {
        let dir = self.workdir.path();
        let output = CapturedOutput {
            stdout: read_lines(&dir.join(STDOUT_FILE)),
            stderr: read_lines(&dir.join(STDERR_FILE)),
        };
        clear_dir(dir);
        output
    }

    /// Evaluate `geometry` under `name`.
    ///
    /// Engine-reported failures and recovered transport failures both come
    /// back as a failed [`ResultRecord`]. `Err` is reserved for caller misuse
    /// and for a restart that did not succeed.
    pub fn evaluate(
        &mut self,
        name: &str,
        geometry: &Geometry,
        options: &EvaluateOptions,
    ) -> Result<ResultRecord> {
        options.validate()?;
        if self.config.use_restart_cache && self.cache.is_retained(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        self.ensure_running()?;

        let use_cache = self.config.use_restart_cache;
        let State::Ready(session) = &mut self.state else {
            return Err(Error::InvalidOperation("worker is not running".to_string()));
        };
        let outcome = evaluate_on(session, &mut self.cache, use_cache, name, geometry, options);

        match outcome {
            Ok(record) => {
                if use_cache {
                    self.cache.insert(name);
                }
                Ok(record)
            }
            Err(e @ Error::Pipe(_)) => {
                debug!(name, "Engine reported a failure: {}", e);
                Ok(ResultRecord::failure(name, geometry.clone(), e))
            }
            Err(e) if e.is_transport() => {
                let error = self.recover(e)?;
                Ok(ResultRecord::failure(name, geometry.clone(), error))
            }
            Err(e) => Err(e),
        }
    }

    /// Single point calculation computing `properties` besides the energy.
    pub fn single_point(
        &mut self,
        name: &str,
        geometry: &Geometry,
        properties: Properties,
    ) -> Result<ResultRecord> {
        let options = EvaluateOptions {
            properties,
            ..EvaluateOptions::single_point()
        };
        self.evaluate(name, geometry, &options)
    }

    /// Geometry optimization; the optimized geometry is the record's main geometry.
    pub fn geometry_optimization(
        &mut self,
        name: &str,
        geometry: &Geometry,
        properties: Properties,
        optimizer: OptimizerOptions,
    ) -> Result<ResultRecord> {
        let options = EvaluateOptions {
            properties,
            optimizer,
            ..EvaluateOptions::geometry_optimization()
        };
        self.evaluate(name, geometry, &options)
    }

    /// Let the engine forget the results kept under `name`.
    ///
    /// The deletion is sent at the start of the next evaluation. Returns false
    /// if nothing was kept under that name.
    pub fn release(&mut self, name: &str) -> bool {
        self.cache.mark_deletable(name)
    }

    /// Have the engine parse `text` as input of `program`, returning JSON.
    pub fn parse_input(&mut self, program: &str, text: &str) -> Result<String> {
        self.ensure_running()?;
        let State::Ready(session) = &mut self.state else {
            return Err(Error::InvalidOperation("worker is not running".to_string()));
        };

        let mut args = Map::new();
        args.insert("programName".into(), Value::from(program));
        args.insert("textInput".into(), Value::from(text));
        let reply = session
            .check_alive()
            .and_then(|()| session.channel.call(Method::ParseInput, &args))
            .and_then(parsed_json);

        match reply {
            Err(e) if e.is_transport() => Err(self.recover(e)?),
            other => other,
        }
    }

    /// Restart after a transport failure, attaching the dead process's output.
    ///
    /// If the restart fails too, the startup error names the original failure
    /// and carries the output of both processes, the crashed one first.
    fn recover(&mut self, error: Error) -> Result<Error> {
        warn!("Worker failed, restarting: {}", error);
        let mut output = self.shutdown();
        self.restart_count += 1;
        match self.start() {
            Ok(()) => Ok(error.recovered(output)),
            Err(Error::Startup {
                message,
                output: startup_output,
            }) => {
                output.append(startup_output);
                Err(Error::Startup {
                    message: format!("restart after \"{}\" failed: {}", error, message),
                    output,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_running(&mut self) -> Result<()> {
        match self.state {
            State::Ready(_) => Ok(()),
            State::Crashed => {
                info!("Restarting crashed worker");
                self.restart_count += 1;
                self.start()
            }
            State::Stopped => Err(Error::InvalidOperation(
                "worker has been stopped".to_string(),
            )),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            State::Ready(session) => Some(session.child.id()),
            _ => None,
        }
    }

    pub fn is_running(&mut self) -> bool {
        match &mut self.state {
            State::Ready(session) => session.check_alive().is_ok(),
            _ => false,
        }
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Number of times the engine was restarted after a failure.
    pub fn restart_count(&self) -> usize {
        self.restart_count
    }

    /// Number of named results the engine currently keeps.
    pub fn retained_results(&self) -> usize {
        self.cache.retained_len()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if matches!(self.state, State::Ready(_)) {
            self.stop();
        }
    }
}

fn evaluate_on(
    session: &mut Session,
    cache: &mut RestartCache,
    use_cache: bool,
    name: &str,
    geometry: &Geometry,
    options: &EvaluateOptions,
) -> Result<ResultRecord> {
    session.check_alive()?;
    flush_deletions(session, cache)?;

    session.channel.call(Method::SetSystem, &system_args(geometry)?)?;
    session.channel.call(Method::SetLattice, &lattice_args(geometry)?)?;

    let prev_title = options
        .prev_result
        .as_deref()
        .filter(|prev| use_cache && cache.is_retained(prev));
    let (method, args) = solve_call(name, options, use_cache, prev_title);
    let replies = session.channel.call(method, &args)?;

    let results = replies
        .into_iter()
        .next()
        .and_then(|mut reply| reply.remove("results"))
        .ok_or_else(|| Error::Ipc(format!("Reply to {} carries no results", method)))?;
    let Value::Map(results) = results else {
        return Err(Error::Ipc(format!(
            "Results of {} are a {}, expected a map",
            method,
            results.kind()
        )));
    };
    ResultRecord::success(name, geometry.clone(), unflatten(results)?)
}

/// Delete released results in the engine, one call per name.
fn flush_deletions(session: &mut Session, cache: &mut RestartCache) -> Result<()> {
    if !cache.has_pending() {
        return Ok(());
    }
    let pending: Vec<String> = cache.pending().map(str::to_string).collect();
    for name in pending {
        let mut args = Map::new();
        args.insert("title".into(), Value::from(name.as_str()));
        match session.channel.call(Method::DeleteResults, &args) {
            Ok(_) => {}
            Err(Error::Pipe(e)) => warn!(name = %name, "Engine could not delete results: {}", e),
            Err(e) => return Err(e),
        }
        cache.confirm_deleted(&name);
    }
    Ok(())
}

fn parsed_json(replies: Vec<Map>) -> Result<String> {
    let json = replies
        .first()
        .and_then(|reply| reply.get("parsedInput"))
        .and_then(Value::as_map)
        .and_then(|parsed| parsed.get("jsonInput"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Ipc("Reply to ParseInput carries no parsedInput.jsonInput".into()))?;
    Ok(json.to_string())
}

fn wait_with_timeout(child: &mut Child, config: &WorkerConfig) -> bool {
    let start = Instant::now();
    while start.elapsed() < config.exit_timeout() {
        if let Ok(Some(_)) = child.try_wait() {
            return true;
        }
        std::thread::sleep(config.watchdog_interval());
    }
    false
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        // Already exited.
        if e.kind() != std::io::ErrorKind::InvalidInput {
            warn!("Failed to kill engine process: {}", e);
        }
    }
    let _ = child.wait();
}

fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(text) => text.lines().map(str::to_string).collect(),
        Err(e) => {
            debug!("No output at {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn clear_dir(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
