//! Integration tests for transparent restart after the engine dies.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pipeworker_core::{CommandLauncher, EngineLauncher, Error, Properties, Worker};

use common::{config, dimer, engine};

/// Starts the engine normally once, then makes every later start fail.
struct FailsAfterFirstLaunch {
    engine: CommandLauncher,
    launches: AtomicUsize,
}

impl EngineLauncher for FailsAfterFirstLaunch {
    fn input_text(&self) -> String {
        if self.launches.fetch_add(1, Ordering::SeqCst) == 0 {
            String::new()
        } else {
            "exit_on_start true\n".to_string()
        }
    }

    fn run_script(&self) -> String {
        self.engine.run_script()
    }
}

fn kill(pid: u32) {
    // SAFETY: plain signal delivery to a child process we own.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    assert_eq!(rc, 0, "failed to kill engine {}", pid);
}

#[test]
fn test_killed_mid_call_recovers() {
    let mut worker = Worker::new(engine("delay_ms 1000\n"), config()).unwrap();
    let pid = worker.pid().unwrap();

    let killer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        kill(pid);
    });

    let start = Instant::now();
    let record = worker
        .single_point("doomed", &dimer(2.0), Properties::default())
        .unwrap();
    killer.join().unwrap();

    assert!(!record.ok());
    let error = record.error().unwrap();
    assert!(error.is_transport(), "unexpected error: {:?}", error);
    let output = record.output().unwrap();
    assert!(!output.is_empty());
    assert!(output.stdout.iter().any(|line| line.starts_with("pipeworker-engine")));
    // The kill cut the computation short.
    assert!(start.elapsed() < Duration::from_millis(1000));

    assert_eq!(worker.restart_count(), 1);
    assert!(worker.is_running());
    assert_ne!(worker.pid(), Some(pid));

    let record = worker
        .single_point("survivor", &dimer(2.0), Properties::default())
        .unwrap();
    assert!(record.ok(), "{:?}", record.error());
}

#[test]
fn test_dead_engine_detected_before_call() {
    let mut worker = Worker::new(engine(""), config()).unwrap();
    assert!(
        worker
            .single_point("kept", &dimer(2.0), Properties::default())
            .unwrap()
            .ok()
    );
    let pid = worker.pid().unwrap();
    kill(pid);

    let deadline = Instant::now() + Duration::from_secs(5);
    while worker.is_running() {
        assert!(Instant::now() < deadline, "engine did not die");
        thread::sleep(Duration::from_millis(10));
    }

    let record = worker
        .single_point("next", &dimer(2.0), Properties::default())
        .unwrap();
    assert!(!record.ok());
    assert!(record.error().unwrap().is_transport());
    assert_eq!(worker.restart_count(), 1);

    // Kept results died with the process, so the name is free again.
    assert_eq!(worker.retained_results(), 0);
    let record = worker
        .single_point("kept", &dimer(2.0), Properties::default())
        .unwrap();
    assert!(record.ok(), "{:?}", record.error());
}

#[test]
fn test_failed_restart_keeps_crash_output() {
    let launcher = Arc::new(FailsAfterFirstLaunch {
        engine: CommandLauncher::new(env!("CARGO_BIN_EXE_pipeworker-engine")),
        launches: AtomicUsize::new(0),
    });
    let mut worker = Worker::new(launcher, config()).unwrap();
    kill(worker.pid().unwrap());
    while worker.is_running() {
        thread::sleep(Duration::from_millis(10));
    }

    let err = worker
        .single_point("lost", &dimer(2.0), Properties::default())
        .unwrap_err();
    match &err {
        Error::Startup { message, output } => {
            assert!(message.contains("restart after"), "{}", message);
            assert!(message.contains("Engine process exited"), "{}", message);
            // One banner from the killed engine, one from the failed restart.
            let banners = output
                .stdout
                .iter()
                .filter(|line| line.starts_with("pipeworker-engine"))
                .count();
            assert_eq!(banners, 2, "{:?}", output);
        }
        other => panic!("expected a startup error, got {:?}", other),
    }
    assert_eq!(err.error_message(), "engine configured to exit on start");
    assert_eq!(worker.restart_count(), 1);
    assert!(!worker.is_running());
}
