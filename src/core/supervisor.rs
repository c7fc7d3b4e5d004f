//! # Supervisor: owns the registry, the wait set, and the broadcast relay.
//!
//! The [`Supervisor`] is the single owner of all runtime state: the
//! [`Config`], the name-keyed [`Registry`] of commands, the
//! [`Dispatcher`] wait set, the shared broadcast [`Channel`], and the
//! [`SubscriberSet`] receiving lifecycle events.
//!
//! ## High-level architecture
//! ```text
//! clients ──► client tty ──► ClientIn ────► command process tty
//! process ──► process tty ─► ProcessOut ─► ring buffer ─► client tty mirror
//!                                             │ (line-buffered or raw)
//!                                             ▼
//! broadcast tty ◄───────────────── "name: " prefix + line
//!       │
//!       └──► BroadcastIn ──► every command's process tty (paced by the
//!                            slowest command)
//!
//! inotify watches ──► ClientNotify/BroadcastNotify ──► opens accounting,
//!                     lazy start on open, stop attempt on close
//! pidfd ──► ProcessExit ──► delete-on-exit │ restart with status-keyed delay
//! signalfd / wake handle ──► orderly shutdown
//! ```
//!
//! [`Supervisor::run`] drives the dispatcher loop; every handler executes to
//! completion on this one thread. The stop sequence (stop string pacing and
//! the SIGTERM/SIGKILL escalation) intentionally blocks the loop — no other
//! command's I/O or exit detection progresses while one command is being
//! stopped.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use ptyherd::{CommandSpec, Config, LogWriter, Supervisor};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.line_buffered = true;
//!     cfg.prefix_broadcast = true;
//!
//!     let mut sup = Supervisor::new(cfg, vec![Arc::new(LogWriter)])?;
//!     sup.add(CommandSpec::parse("a,,,,ssh host-a")?)?;
//!     sup.add(CommandSpec::parse("b,,,,ssh host-b")?)?;
//!     sup.run()?;
//!     Ok(())
//! }
//! ```

use std::os::fd::AsRawFd;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use nix::sys::signalfd::{SfdFlags, SigSet, SignalFd};
use tracing::{debug, trace, warn};

use crate::channel::{Channel, NotifyEvent, ReadOutcome};
use crate::command::{Command, CommandSpec};
use crate::config::Config;
use crate::core::dispatcher::{Action, Dispatcher, ReadyMask, WakeHandle};
use crate::core::registry::{CommandListing, CommandRef, Registry};
use crate::error::{ChannelError, RuntimeError, SetupError};
use crate::events::{Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Maximum bytes a single relay handler drains before yielding back to the
/// dispatcher so one flooding source cannot starve the rest; the handler
/// reschedules itself with an immediate deadline.
const DRAIN_BUDGET: usize = 1024;

/// Event source bindings dispatched by the wait set.
#[derive(Clone)]
enum Binding {
    /// The wake handle fired: orderly shutdown.
    Shutdown,
    /// A termination signal arrived on the signalfd.
    Signal,
    /// Input from broadcast clients is ready to fan out.
    BroadcastIn,
    /// Open/close notification on the broadcast terminal.
    BroadcastNotify,
    /// A command produced output.
    ProcessOut(CommandRef),
    /// Open/close notification on a command's process terminal.
    ProcessNotify(CommandRef),
    /// A client wrote input for a command.
    ClientIn(CommandRef),
    /// Open/close notification on a command's client terminal.
    ClientNotify(CommandRef),
    /// A command's process exited.
    ProcessExit(CommandRef),
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process was stopped; carries the exit status.
    Stopped(i32),
    /// Somebody still watches the command (client or broadcast terminal);
    /// a non-forced stop was refused.
    Refused,
    /// The command had no running process.
    NotRunning,
}

/// Coordinates command lifecycle, byte relay, broadcast fan-out, and
/// orderly shutdown.
pub struct Supervisor {
    cfg: Config,
    registry: Registry,
    dispatcher: Dispatcher<Binding>,
    broadcast: Channel,
    subs: SubscriberSet,
    signals: Option<SignalFd>,
    cleaned_up: bool,
}

impl Supervisor {
    /// Creates the supervisor: wait set, broadcast channel (published under
    /// `cfg.broadcast_link`), and the subscriber fan-out.
    pub fn new(cfg: Config, subscribers: Vec<Arc<dyn Subscribe>>) -> Result<Self, RuntimeError> {
        let mut dispatcher = Dispatcher::new(Binding::Shutdown)?;
        let broadcast = Channel::create(Some(&cfg.broadcast_link), cfg.raw_mode)?;

        if let Some(fd) = broadcast.hub_fd() {
            dispatcher.register(fd, Binding::BroadcastIn)?;
        }
        if let Some(fd) = broadcast.notify_fd() {
            dispatcher.register(fd, Binding::BroadcastNotify)?;
        }

        Ok(Self {
            cfg,
            registry: Registry::new(),
            dispatcher,
            broadcast,
            subs: SubscriberSet::new(subscribers),
            signals: None,
            cleaned_up: false,
        })
    }

    /// Creates a command from its specification and starts it.
    ///
    /// Setup failures are fully unwound: no partial command survives in the
    /// registry and the error only affects this specification. A
    /// [`RuntimeError::Dispatch`] is fatal to the supervisor.
    pub fn add(&mut self, spec: CommandSpec) -> Result<(), RuntimeError> {
        if self.registry.contains(spec.name()) {
            return Err(SetupError::DuplicateName {
                name: spec.name().to_string(),
            }
            .into());
        }

        let mut command = Command::create(&spec, &self.cfg)?;
        command.start(self.cfg.raw_mode, Duration::ZERO)?;
        let name = command.name.clone();
        let pid = command.pid().unwrap_or(-1);

        let handle = self.registry.insert(command)?;
        self.register_command(&handle)?;

        self.emit(Event::new(EventKind::CommandAdded).with_name(name.clone()));
        self.emit(
            Event::new(EventKind::CommandStarted)
                .with_name(name)
                .with_pid(pid)
                .with_restarts(0),
        );
        Ok(())
    }

    /// Force-stops, cleans up and removes a command.
    ///
    /// Returns `false` if no command has that name.
    pub fn remove(&mut self, name: &str) -> Result<bool, RuntimeError> {
        let Some(handle) = self.registry.remove(name) else {
            return Ok(false);
        };
        self.deregister_command(&handle)?;
        let global_stop = self.cfg.stop.stop_string.clone();
        let grace = self.cfg.stop.effective_grace();
        handle.borrow_mut().cleanup(global_stop.as_deref(), grace);
        self.emit(Event::new(EventKind::CommandRemoved).with_name(name.to_string()));
        Ok(true)
    }

    /// Starts a command by name if it is idle. Returns `false` when it was
    /// already running or no such command exists.
    pub fn start(&mut self, name: &str) -> Result<bool, RuntimeError> {
        match self.registry.get(name) {
            Some(handle) => self.start_command(&handle, Duration::ZERO),
            None => Ok(false),
        }
    }

    /// Stops a command by name.
    ///
    /// A non-forced stop is refused while anyone holds the command's client
    /// terminal or the broadcast terminal open.
    pub fn stop(&mut self, name: &str, force: bool) -> Result<StopOutcome, RuntimeError> {
        match self.registry.get(name) {
            Some(handle) => self.stop_command(&handle, force),
            None => Ok(StopOutcome::NotRunning),
        }
    }

    /// Sorted names of all registered commands.
    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Long listing `(name, link, pid, command line, restarts)` sorted by
    /// name.
    pub fn listings(&self) -> Vec<CommandListing> {
        self.registry.listings()
    }

    /// Device path of the broadcast terminal.
    pub fn broadcast_path(&self) -> &Path {
        self.broadcast.path()
    }

    /// Current runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Toggles line-buffered broadcast output.
    pub fn set_line_buffered(&mut self, on: bool) {
        self.cfg.line_buffered = on;
    }

    /// Toggles the `"<name>: "` prefix on broadcast lines.
    pub fn set_prefix_broadcast(&mut self, on: bool) {
        self.cfg.prefix_broadcast = on;
    }

    /// Toggles broadcast mirroring entirely.
    pub fn set_broadcast_enabled(&mut self, on: bool) {
        self.cfg.broadcast_enabled = on;
    }

    /// Toggles the global restart policy.
    pub fn set_restart_enabled(&mut self, on: bool) {
        self.cfg.restart.enabled = on;
    }

    /// Returns a handle that makes [`Supervisor::run`] exit cleanly; safe to
    /// fire from any thread.
    pub fn shutdown_handle(&self) -> WakeHandle {
        self.dispatcher.wake_handle()
    }

    /// Runs the event loop until a termination signal, the shutdown handle,
    /// or an idle exit. All commands and the broadcast channel are cleaned
    /// up before returning, also on error.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.install_signals()?;

        let mut fired: Vec<(Binding, ReadyMask)> = Vec::new();
        let result = 'outer: loop {
            fired.clear();
            if let Err(e) = self.dispatcher.poll(&mut fired) {
                break 'outer Err(RuntimeError::from(e));
            }
            for (binding, mask) in fired.drain(..) {
                match self.dispatch(binding, mask) {
                    Ok(Action::Continue) => {}
                    Ok(Action::Exit) => break 'outer Ok(()),
                    Err(e) => break 'outer Err(e),
                }
            }
        };

        self.cleanup_all();
        result
    }

    // ---------------------------
    // Dispatch
    // ---------------------------

    fn dispatch(&mut self, binding: Binding, mask: ReadyMask) -> Result<Action, RuntimeError> {
        match binding {
            Binding::Shutdown => {
                self.emit(
                    Event::new(EventKind::ShutdownRequested).with_reason("shutdown handle"),
                );
                Ok(Action::Exit)
            }
            Binding::Signal => {
                let reason = self.drain_signals();
                self.emit(Event::new(EventKind::ShutdownRequested).with_reason(reason));
                Ok(Action::Exit)
            }
            Binding::BroadcastIn => {
                self.relay_broadcast_input();
                Ok(Action::Continue)
            }
            Binding::BroadcastNotify => self.handle_broadcast_notify(),
            Binding::ProcessOut(handle) => {
                self.relay_process_output(&handle);
                Ok(Action::Continue)
            }
            Binding::ProcessNotify(handle) => {
                self.handle_process_notify(&handle);
                Ok(Action::Continue)
            }
            Binding::ClientIn(handle) => {
                self.relay_client_input(&handle);
                Ok(Action::Continue)
            }
            Binding::ClientNotify(handle) => self.handle_client_notify(&handle),
            Binding::ProcessExit(handle) => {
                trace!(mask = ?mask, "process exit notification");
                self.handle_process_exit(&handle)
            }
        }
    }

    /// Output from a command: ring buffer, client mirror, and — per the
    /// broadcast policy — raw per-byte mirroring or line-buffered flushing.
    fn relay_process_output(&mut self, handle: &CommandRef) {
        let mut cmd = handle.borrow_mut();
        if cmd.is_destroyed() {
            return;
        }

        for _ in 0..DRAIN_BUDGET {
            match cmd.process.read_byte(None) {
                Ok(ReadOutcome::Byte(byte)) => {
                    let status = cmd.absorb_output(byte);
                    let broadcasting = self.cfg.broadcast_enabled && self.cfg.line_buffered;

                    if status.overflowed && broadcasting {
                        self.emit(
                            Event::new(EventKind::LineOverflowed).with_name(cmd.name.clone()),
                        );
                    }
                    if self.cfg.broadcast_enabled && !self.cfg.line_buffered {
                        self.write_broadcast(&[byte]);
                    }
                    if status.newline {
                        if broadcasting {
                            self.flush_broadcast_line(&mut cmd);
                        } else {
                            // Keep the line marker aligned so a later switch
                            // to line buffering starts clean.
                            cmd.ring.consume_line();
                        }
                    }
                }
                Err(ChannelError::WouldBlock) => return,
                Ok(ReadOutcome::Closed) => {
                    trace!(command = %cmd.name, "process endpoint closed");
                    return;
                }
                Ok(ReadOutcome::Deferred(_)) => return,
                Err(e) => {
                    warn!(command = %cmd.name, error = %e, "process output read failed");
                    return;
                }
            }
        }

        // Budget exhausted: yield to the rest of the batch, come right back.
        self.dispatcher
            .schedule(Instant::now(), Binding::ProcessOut(Rc::clone(handle)));
    }

    /// Input from a command's client terminal, paced by the command's write
    /// delay.
    fn relay_client_input(&mut self, handle: &CommandRef) {
        let mut cmd = handle.borrow_mut();
        if cmd.is_destroyed() {
            return;
        }

        for _ in 0..DRAIN_BUDGET {
            let pacer = cmd.pacer();
            match cmd.client.read_byte(pacer) {
                Ok(ReadOutcome::Byte(byte)) => match cmd.write_byte(byte) {
                    Ok(_) => {}
                    Err(ChannelError::WouldBlock) => cmd.process.note_backpressure(),
                    Err(e) => {
                        warn!(command = %cmd.name, error = %e, "client relay write failed")
                    }
                },
                Ok(ReadOutcome::Deferred(remaining)) => {
                    self.dispatcher
                        .schedule(Instant::now() + remaining, Binding::ClientIn(Rc::clone(handle)));
                    return;
                }
                Err(ChannelError::WouldBlock) => return,
                Ok(ReadOutcome::Closed) => return,
                Err(e) => {
                    warn!(command = %cmd.name, error = %e, "client input read failed");
                    return;
                }
            }
        }

        self.dispatcher
            .schedule(Instant::now(), Binding::ClientIn(Rc::clone(handle)));
    }

    /// Input from broadcast clients fans out to every command. Reads are
    /// paced against the slowest command so no command's terminal buffer is
    /// outrun; the data queues in the kernel until the pace allows it.
    fn relay_broadcast_input(&mut self) {
        for _ in 0..DRAIN_BUDGET {
            let pacer = self
                .registry
                .slowest()
                .and_then(|handle| handle.borrow().pacer());

            match self.broadcast.read_byte(pacer) {
                Ok(ReadOutcome::Byte(byte)) => {
                    for handle in self.registry.handles() {
                        let mut cmd = handle.borrow_mut();
                        if cmd.is_destroyed() {
                            continue;
                        }
                        match cmd.write_byte(byte) {
                            Ok(_) => {}
                            Err(ChannelError::WouldBlock) => cmd.process.note_backpressure(),
                            Err(e) => {
                                warn!(command = %cmd.name, error = %e, "broadcast fan-out failed")
                            }
                        }
                    }
                }
                Ok(ReadOutcome::Deferred(remaining)) => {
                    self.dispatcher
                        .schedule(Instant::now() + remaining, Binding::BroadcastIn);
                    return;
                }
                Err(ChannelError::WouldBlock) => return,
                Ok(ReadOutcome::Closed) => return,
                Err(e) => {
                    warn!(error = %e, "broadcast input read failed");
                    return;
                }
            }
        }

        self.dispatcher
            .schedule(Instant::now(), Binding::BroadcastIn);
    }

    /// Open/close accounting on a command's client terminal: opens lazily
    /// start the command, the last close attempts a non-forced stop.
    fn handle_client_notify(&mut self, handle: &CommandRef) -> Result<Action, RuntimeError> {
        if handle.borrow().is_destroyed() {
            return Ok(Action::Continue);
        }
        let (name, events) = {
            let mut cmd = handle.borrow_mut();
            let events = match cmd.client.drain_notify() {
                Ok(events) => events,
                Err(e) => {
                    warn!(command = %cmd.name, error = %e, "client notify drain failed");
                    return Ok(Action::Continue);
                }
            };
            (cmd.name.clone(), events)
        };

        for event in events {
            match event {
                NotifyEvent::Opened(opens) => {
                    self.emit(
                        Event::new(EventKind::ClientOpened)
                            .with_name(name.clone())
                            .with_opens(opens),
                    );
                    self.start_command(handle, Duration::ZERO)?;
                }
                NotifyEvent::Closed(opens) => {
                    self.emit(
                        Event::new(EventKind::ClientClosed)
                            .with_name(name.clone())
                            .with_opens(opens),
                    );
                    // The stop itself re-checks both open counts and
                    // refuses while anyone still watches.
                    let _ = self.stop_command(handle, false)?;
                }
                NotifyEvent::Spurious => {}
            }
        }
        Ok(Action::Continue)
    }

    /// Open/close accounting on a command's process terminal. The only
    /// expected opens are the command process itself.
    fn handle_process_notify(&mut self, handle: &CommandRef) {
        let mut cmd = handle.borrow_mut();
        if cmd.is_destroyed() {
            return;
        }
        match cmd.process.drain_notify() {
            Ok(events) => trace!(command = %cmd.name, ?events, "process terminal notify"),
            Err(e) => warn!(command = %cmd.name, error = %e, "process notify drain failed"),
        }
    }

    /// Open/close accounting on the broadcast terminal. The first broadcast
    /// open lazily starts every idle command.
    fn handle_broadcast_notify(&mut self) -> Result<Action, RuntimeError> {
        let events = match self.broadcast.drain_notify() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "broadcast notify drain failed");
                return Ok(Action::Continue);
            }
        };

        for event in events {
            match event {
                NotifyEvent::Opened(opens) => {
                    self.emit(Event::new(EventKind::BroadcastOpened).with_opens(opens));
                    for handle in self.registry.handles() {
                        self.start_command(&handle, Duration::ZERO)?;
                    }
                }
                NotifyEvent::Closed(opens) => {
                    self.emit(Event::new(EventKind::BroadcastClosed).with_opens(opens));
                }
                NotifyEvent::Spurious => {}
            }
        }
        Ok(Action::Continue)
    }

    /// A command process exited: reap it, then — in order of precedence —
    /// delete-on-exit (possibly ending the loop when the registry empties
    /// with exit-on-idle set) or restart with the status-keyed delay.
    fn handle_process_exit(&mut self, handle: &CommandRef) -> Result<Action, RuntimeError> {
        let (name, status, delete) = {
            let mut cmd = handle.borrow_mut();
            if cmd.is_destroyed() || !cmd.is_running() {
                return Ok(Action::Continue);
            }
            let Some(fd) = cmd.pidfd_raw() else {
                return Ok(Action::Continue);
            };
            self.dispatcher.deregister(fd)?;
            let status = cmd.reap().map_err(|source| RuntimeError::Reap {
                name: cmd.name.clone(),
                source,
            })?;
            (cmd.name.clone(), status, cmd.delete_on_exit)
        };

        self.emit(
            Event::new(EventKind::CommandExited)
                .with_name(name.clone())
                .with_status(status),
        );

        if delete {
            self.remove(&name)?;
            if self.registry.is_empty() && self.cfg.exit_on_idle {
                self.emit(Event::new(EventKind::IdleExit));
                return Ok(Action::Exit);
            }
            return Ok(Action::Continue);
        }

        if self.cfg.restart.enabled && handle.borrow().restart {
            let delay = self.cfg.restart.delay_for(status);
            let source = self.cfg.restart.source_for(status);
            let restarts = {
                let mut cmd = handle.borrow_mut();
                cmd.restarts += 1;
                cmd.restarts
            };
            self.emit(
                Event::new(EventKind::RestartScheduled)
                    .with_name(name)
                    .with_delay(delay)
                    .with_source(source)
                    .with_restarts(restarts),
            );
            self.start_command(handle, delay)?;
        }
        Ok(Action::Continue)
    }

    // ---------------------------
    // Command helpers
    // ---------------------------

    /// Starts an idle command, registers its exit handle and reports the
    /// spawn. Returns `false` when the command was already running (or is
    /// destroyed); a failed spawn is reported but not fatal.
    fn start_command(&mut self, handle: &CommandRef, delay: Duration) -> Result<bool, RuntimeError> {
        let outcome = {
            let mut cmd = handle.borrow_mut();
            if cmd.is_destroyed() || cmd.is_running() {
                None
            } else {
                let name = cmd.name.clone();
                Some(match cmd.start(self.cfg.raw_mode, delay) {
                    Ok(()) => Ok((name, cmd.pid().unwrap_or(-1), cmd.restarts)),
                    Err(e) => Err((name, e)),
                })
            }
        };

        match outcome {
            None => Ok(false),
            Some(Ok((name, pid, restarts))) => {
                if let Some(fd) = handle.borrow().pidfd_raw() {
                    self.dispatcher
                        .register(fd, Binding::ProcessExit(Rc::clone(handle)))?;
                }
                self.emit(
                    Event::new(EventKind::CommandStarted)
                        .with_name(name)
                        .with_pid(pid)
                        .with_restarts(restarts),
                );
                Ok(true)
            }
            Some(Err((name, error))) => {
                warn!(command = %name, error = %error, "spawn failed");
                self.emit(
                    Event::new(EventKind::StartFailed)
                        .with_name(name)
                        .with_reason(error.to_string()),
                );
                Ok(false)
            }
        }
    }

    /// Stops a running command: stop string, exit-handle deregistration,
    /// SIGTERM with grace, SIGKILL escalation, synchronous reap.
    fn stop_command(
        &mut self,
        handle: &CommandRef,
        force: bool,
    ) -> Result<StopOutcome, RuntimeError> {
        let broadcast_opens = self.broadcast.opens();
        {
            let cmd = handle.borrow();
            if cmd.is_destroyed() || !cmd.is_running() {
                return Ok(StopOutcome::NotRunning);
            }
            if !cmd.can_stop(force, broadcast_opens) {
                debug!(command = %cmd.name, "stop refused, terminal still open");
                return Ok(StopOutcome::Refused);
            }
        }

        let global_stop = self.cfg.stop.stop_string.clone();
        let grace = self.cfg.stop.effective_grace();
        let (name, status) = {
            let mut cmd = handle.borrow_mut();
            cmd.send_stop_string(global_stop.as_deref());
            // The exit handle comes out of the wait set first: this path
            // reaps synchronously and the dispatcher must not see the fd.
            if let Some(fd) = cmd.pidfd_raw() {
                self.dispatcher.deregister(fd)?;
            }
            let status = cmd.terminate(grace).map_err(|source| RuntimeError::Reap {
                name: cmd.name.clone(),
                source,
            })?;
            (cmd.name.clone(), status)
        };

        self.emit(
            Event::new(EventKind::CommandStopped)
                .with_name(name)
                .with_status(status)
                .with_reason(if force { "forced" } else { "idle" }),
        );
        Ok(StopOutcome::Stopped(status))
    }

    /// Registers every descriptor a freshly created command owns.
    fn register_command(&mut self, handle: &CommandRef) -> Result<(), RuntimeError> {
        let cmd = handle.borrow();
        if let Some(fd) = cmd.client.hub_fd() {
            self.dispatcher
                .register(fd, Binding::ClientIn(Rc::clone(handle)))?;
        }
        if let Some(fd) = cmd.client.notify_fd() {
            self.dispatcher
                .register(fd, Binding::ClientNotify(Rc::clone(handle)))?;
        }
        if let Some(fd) = cmd.process.hub_fd() {
            self.dispatcher
                .register(fd, Binding::ProcessOut(Rc::clone(handle)))?;
        }
        if let Some(fd) = cmd.process.notify_fd() {
            self.dispatcher
                .register(fd, Binding::ProcessNotify(Rc::clone(handle)))?;
        }
        if let Some(fd) = cmd.pidfd_raw() {
            self.dispatcher
                .register(fd, Binding::ProcessExit(Rc::clone(handle)))?;
        }
        Ok(())
    }

    /// Removes every registered descriptor of a command from the wait set.
    /// Must run before cleanup closes the descriptors.
    fn deregister_command(&mut self, handle: &CommandRef) -> Result<(), RuntimeError> {
        let cmd = handle.borrow();
        for fd in [
            cmd.client.hub_fd(),
            cmd.client.notify_fd(),
            cmd.process.hub_fd(),
            cmd.process.notify_fd(),
            cmd.pidfd_raw(),
        ]
        .into_iter()
        .flatten()
        {
            self.dispatcher.deregister(fd)?;
        }
        Ok(())
    }

    // ---------------------------
    // Broadcast output
    // ---------------------------

    /// Flushes the command's completed line to the broadcast terminal,
    /// optionally preceded by the `"<name>: "` prefix. A wrapped line goes
    /// out as two writes (tail, then head).
    fn flush_broadcast_line(&mut self, cmd: &mut Command) {
        if self.cfg.prefix_broadcast && !cmd.prefix.is_empty() {
            self.write_broadcast(&cmd.prefix);
        }
        let (first, second) = cmd.ring.line_segments();
        self.write_broadcast(first);
        if !second.is_empty() {
            self.write_broadcast(second);
        }
        cmd.ring.consume_line();
    }

    fn write_broadcast(&mut self, bytes: &[u8]) {
        match self.broadcast.write(bytes) {
            Ok(n) if n < bytes.len() => self.broadcast.note_backpressure(),
            Ok(_) => {}
            Err(ChannelError::WouldBlock) => self.broadcast.note_backpressure(),
            Err(e) => warn!(error = %e, "broadcast write failed"),
        }
    }

    // ---------------------------
    // Shutdown
    // ---------------------------

    /// Blocks SIGINT/SIGTERM/SIGQUIT for this thread and routes them through
    /// the wait set, so shutdown is just another event source.
    fn install_signals(&mut self) -> Result<(), RuntimeError> {
        if self.signals.is_some() {
            return Ok(());
        }
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGQUIT);
        mask.thread_block().map_err(RuntimeError::Signals)?;

        let sfd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(RuntimeError::Signals)?;
        self.dispatcher.register(sfd.as_raw_fd(), Binding::Signal)?;
        self.signals = Some(sfd);
        Ok(())
    }

    fn drain_signals(&mut self) -> String {
        let mut reason = String::from("signal");
        if let Some(sfd) = self.signals.as_mut() {
            while let Ok(Some(info)) = sfd.read_signal() {
                reason = format!("signal {}", info.ssi_signo);
            }
        }
        reason
    }

    /// Cleans up every command (force-stopping running processes) and the
    /// broadcast channel. Idempotent; also run on drop so published links
    /// never outlive the supervisor.
    fn cleanup_all(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        let global_stop = self.cfg.stop.stop_string.clone();
        let grace = self.cfg.stop.effective_grace();
        for name in self.registry.names() {
            if let Some(handle) = self.registry.remove(&name) {
                debug!(command = %name, "cleaning up");
                handle.borrow_mut().cleanup(global_stop.as_deref(), grace);
                self.emit(Event::new(EventKind::CommandRemoved).with_name(name));
            }
        }
        self.broadcast.cleanup();
    }

    fn emit(&self, event: Event) {
        self.subs.emit(&event);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}
