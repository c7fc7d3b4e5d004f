//! End-to-end scenarios: a real supervisor loop driving real processes
//! through real pseudo-terminals.
//!
//! Each test builds the supervisor inside a dedicated thread (the runtime is
//! deliberately single-threaded and not `Send`), hands a shutdown handle and
//! an event recorder back to the test, and interacts purely through the
//! published terminal links — the same way external clients do.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, sleep, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use ptyherd::{
    CommandSpec, Config, Event, EventKind, Subscribe, Supervisor, WakeHandle,
};

/// Collects every event with its arrival time.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(Instant, Event)>>,
}

impl Subscribe for Recorder {
    fn on_event(&self, event: &Event) {
        self.events
            .lock()
            .expect("recorder lock")
            .push((Instant::now(), event.clone()));
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

impl Recorder {
    fn snapshot(&self) -> Vec<(Instant, Event)> {
        self.events.lock().expect("recorder lock").clone()
    }

    /// Waits until an event matching `pred` exists, returning all matches.
    fn wait_for(
        &self,
        timeout: Duration,
        pred: impl Fn(&Event) -> bool,
    ) -> Vec<(Instant, Event)> {
        let deadline = Instant::now() + timeout;
        loop {
            let hits: Vec<(Instant, Event)> = self
                .snapshot()
                .into_iter()
                .filter(|(_, e)| pred(e))
                .collect();
            if !hits.is_empty() {
                return hits;
            }
            if Instant::now() >= deadline {
                return Vec::new();
            }
            sleep(Duration::from_millis(20));
        }
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.snapshot().iter().filter(|(_, e)| pred(e)).count()
    }
}

struct Harness {
    recorder: Arc<Recorder>,
    shutdown: WakeHandle,
    thread: Option<JoinHandle<()>>,
    dir: tempfile::TempDir,
}

impl Harness {
    /// Builds and runs a supervisor over the given specs in its own thread.
    /// `dir` must be the directory the specs publish their links under; the
    /// broadcast link goes there too.
    fn launch(dir: tempfile::TempDir, mut cfg: Config, specs: Vec<CommandSpec>) -> Self {
        cfg.broadcast_link = dir.path().join("btty");

        let recorder = Arc::new(Recorder::default());
        let subscriber = Arc::clone(&recorder) as Arc<dyn Subscribe>;
        let (tx, rx) = mpsc::channel();

        let thread = thread::spawn(move || {
            let mut sup = Supervisor::new(cfg, vec![subscriber]).expect("supervisor setup");
            for spec in specs {
                sup.add(spec).expect("add command");
            }
            tx.send(sup.shutdown_handle()).expect("handle channel");
            sup.run().expect("supervisor run");
        });

        let shutdown = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("supervisor did not come up");

        Self {
            recorder,
            shutdown,
            thread: Some(thread),
            dir,
        }
    }

    fn link(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn broadcast_link(&self) -> PathBuf {
        self.link("btty")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.wake();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn open_terminal(path: &Path) -> File {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .unwrap_or_else(|e| panic!("open {path:?}: {e}"))
}

/// Reads whatever is available until `want` bytes arrived or the timeout
/// passed.
fn read_until(file: &mut File, want: usize, timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    let mut buf = [0u8; 256];
    while collected.len() < want && Instant::now() < deadline {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("terminal read failed: {e}"),
        }
    }
    collected
}

fn spec(harness_dir: &Path, name: &str, cmdline: &str) -> CommandSpec {
    CommandSpec::new(name, cmdline).with_link(harness_dir.join(name))
}

fn alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Waits until the spawned process has its terminal attached as stdin, i.e.
/// its open of the slave side has happened and precedes anything the test
/// does next.
fn wait_stdin_on_pty(pid: i32, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let path = format!("/proc/{pid}/fd/0");
    while Instant::now() < deadline {
        if let Ok(target) = std::fs::read_link(&path) {
            if target.to_string_lossy().contains("/dev/pts/") {
                return;
            }
        }
        sleep(Duration::from_millis(10));
    }
    panic!("process {pid} never attached its terminal");
}

// ---------------------------------------------------------------------------
// Scenario: broadcast fan-out and line-buffered, prefixed fan-in.
// ---------------------------------------------------------------------------

#[test]
fn test_broadcast_roundtrip_with_prefixed_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = Config::default();
    cfg.line_buffered = true;
    cfg.prefix_broadcast = true;
    cfg.restart.enabled = false;

    let specs = vec![spec(dir.path(), "a", "cat"), spec(dir.path(), "b", "cat")];
    let harness = Harness::launch(dir, cfg, specs);
    let rec = &harness.recorder;

    let deadline = Instant::now() + Duration::from_secs(5);
    while rec.count(|e| e.kind == EventKind::CommandStarted) < 2 {
        assert!(Instant::now() < deadline, "both commands must start");
        sleep(Duration::from_millis(20));
    }
    let started = rec.wait_for(Duration::from_secs(1), |e| {
        e.kind == EventKind::CommandStarted
    });
    for (_, e) in &started {
        wait_stdin_on_pty(e.pid.expect("pid"), Duration::from_secs(5));
    }

    let mut bcast = open_terminal(&harness.broadcast_link());
    assert!(
        !rec.wait_for(Duration::from_secs(5), |e| e.kind == EventKind::BroadcastOpened)
            .is_empty(),
        "broadcast open must be accounted"
    );

    nix::unistd::write(&bcast, b"hi\n").expect("broadcast write");

    let want = b"a: hi\nb: hi\n".len();
    let collected = read_until(&mut bcast, want, Duration::from_secs(10));
    let text = String::from_utf8_lossy(&collected).into_owned();

    assert!(
        text == "a: hi\nb: hi\n" || text == "b: hi\na: hi\n",
        "unexpected broadcast output: {text:?}"
    );
}

// ---------------------------------------------------------------------------
// Scenario: a failing command respawns only after the failure delay.
// ---------------------------------------------------------------------------

#[test]
fn test_failure_restart_waits_the_failure_delay() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = Config::default();
    cfg.restart.enabled = true;
    cfg.restart.success_delay = Duration::from_secs(30);
    cfg.restart.failure_delay = Duration::from_secs(1);

    let specs = vec![spec(dir.path(), "f", "exit 1")];
    let harness = Harness::launch(dir, cfg, specs);
    let rec = &harness.recorder;

    // Initial run plus at least two delayed respawns.
    let deadline = Instant::now() + Duration::from_secs(15);
    while rec.count(|e| e.kind == EventKind::CommandExited) < 3 {
        assert!(Instant::now() < deadline, "expected three exits");
        sleep(Duration::from_millis(30));
    }

    let exits = rec.wait_for(Duration::from_secs(1), |e| {
        e.kind == EventKind::CommandExited
    });
    assert!(exits.len() >= 3);
    for (_, e) in &exits {
        assert_eq!(e.status, Some(1));
    }

    // Respawn happens in the child after the failure delay, so consecutive
    // exits are at least the delay apart (within scheduling slack).
    for pair in exits.windows(2) {
        let gap = pair[1].0.duration_since(pair[0].0);
        assert!(
            gap >= Duration::from_millis(950),
            "respawn came too early: {gap:?}"
        );
        assert!(
            gap <= Duration::from_secs(5),
            "respawn came far too late: {gap:?}"
        );
    }

    let scheduled = rec.wait_for(Duration::from_secs(1), |e| {
        e.kind == EventKind::RestartScheduled
    });
    assert!(!scheduled.is_empty());
    for (_, e) in &scheduled {
        assert_eq!(e.delay_ms, Some(1000), "failure delay must be selected");
    }
}

// ---------------------------------------------------------------------------
// Scenario: non-forced stop is refused while anyone still watches.
// ---------------------------------------------------------------------------

#[test]
fn test_stop_refused_until_last_watcher_closes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = Config::default();
    cfg.restart.enabled = false;

    let specs = vec![spec(dir.path(), "s", "sleep 600")];
    let harness = Harness::launch(dir, cfg, specs);
    let rec = &harness.recorder;

    let started = rec.wait_for(Duration::from_secs(5), |e| {
        e.kind == EventKind::CommandStarted
    });
    let pid = started
        .first()
        .and_then(|(_, e)| e.pid)
        .expect("started event with pid");
    assert!(alive(pid));

    // A broadcast watcher and a client watcher.
    let bcast = open_terminal(&harness.broadcast_link());
    assert!(!rec
        .wait_for(Duration::from_secs(5), |e| e.kind == EventKind::BroadcastOpened)
        .is_empty());

    let client = open_terminal(&harness.link("s"));
    assert!(!rec
        .wait_for(Duration::from_secs(5), |e| e.kind == EventKind::ClientOpened)
        .is_empty());

    // Closing the client attempts a stop, but the broadcast watcher blocks it.
    drop(client);
    assert!(!rec
        .wait_for(Duration::from_secs(5), |e| {
            e.kind == EventKind::ClientClosed && e.opens == Some(0)
        })
        .is_empty());
    sleep(Duration::from_millis(300));
    assert_eq!(rec.count(|e| e.kind == EventKind::CommandStopped), 0);
    assert!(alive(pid), "stop must be refused while broadcast is watched");

    // Drop the broadcast watcher too, then cycle the client once more: the
    // close now finds nobody watching and the stop goes through.
    drop(bcast);
    assert!(!rec
        .wait_for(Duration::from_secs(5), |e| {
            e.kind == EventKind::BroadcastClosed && e.opens == Some(0)
        })
        .is_empty());

    let client = open_terminal(&harness.link("s"));
    assert!(!rec
        .wait_for(Duration::from_secs(5), |e| {
            e.kind == EventKind::ClientOpened && e.opens == Some(1)
        })
        .is_empty());
    drop(client);

    let stopped = rec.wait_for(Duration::from_secs(5), |e| {
        e.kind == EventKind::CommandStopped
    });
    assert!(!stopped.is_empty(), "stop must succeed once nobody watches");

    let deadline = Instant::now() + Duration::from_secs(2);
    while alive(pid) && Instant::now() < deadline {
        sleep(Duration::from_millis(20));
    }
    assert!(!alive(pid), "process must be gone after a successful stop");
}

// ---------------------------------------------------------------------------
// Client relay: bytes written to the published link reach the command and
// its output mirrors back.
// ---------------------------------------------------------------------------

#[test]
fn test_client_terminal_relays_both_directions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = Config::default();
    cfg.restart.enabled = false;

    let specs = vec![spec(dir.path(), "e", "cat")];
    let harness = Harness::launch(dir, cfg, specs);
    let rec = &harness.recorder;

    let started = rec.wait_for(Duration::from_secs(5), |e| {
        e.kind == EventKind::CommandStarted
    });
    let pid = started.first().and_then(|(_, e)| e.pid).expect("pid");
    wait_stdin_on_pty(pid, Duration::from_secs(5));

    let mut client = open_terminal(&harness.link("e"));
    assert!(!rec
        .wait_for(Duration::from_secs(5), |e| e.kind == EventKind::ClientOpened)
        .is_empty());

    nix::unistd::write(&client, b"ping\n").expect("client write");
    let echoed = read_until(&mut client, 5, Duration::from_secs(5));
    assert_eq!(echoed, b"ping\n");
}

// ---------------------------------------------------------------------------
// Pacing: a per-command write delay spaces out relayed bytes.
// ---------------------------------------------------------------------------

#[test]
fn test_write_delay_paces_client_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = Config::default();
    cfg.restart.enabled = false;

    let paced = spec(dir.path(), "p", "cat").with_delay(Duration::from_millis(200));
    let harness = Harness::launch(dir, cfg, vec![paced]);
    let rec = &harness.recorder;

    let started = rec.wait_for(Duration::from_secs(5), |e| {
        e.kind == EventKind::CommandStarted
    });
    let pid = started.first().and_then(|(_, e)| e.pid).expect("pid");
    wait_stdin_on_pty(pid, Duration::from_secs(5));

    let mut client = open_terminal(&harness.link("p"));
    assert!(!rec
        .wait_for(Duration::from_secs(5), |e| e.kind == EventKind::ClientOpened)
        .is_empty());

    // Three bytes: the first goes straight through, the second and third
    // each wait out the 200ms inter-byte delay.
    let t0 = Instant::now();
    nix::unistd::write(&client, b"ab\n").expect("client write");
    let echoed = read_until(&mut client, 3, Duration::from_secs(5));
    let elapsed = t0.elapsed();

    assert_eq!(echoed, b"ab\n");
    assert!(
        elapsed >= Duration::from_millis(350),
        "relay finished too fast for the configured delay: {elapsed:?}"
    );
}
