//! The bar controller.
//!
//! Owns the reactor, the signal bus and the modules for one run of the bar.
//! Every piece of controller state is mutated on the reactor thread; other
//! threads reach it only through a [`ControllerHandle`], which queues work
//! and wakes the reactor.
//!
//! Life cycle: `Idle -> Running -> (Reloading | Quitting) -> Stopped`.

mod debounce;
mod dispatch;

pub use debounce::{DebounceWindow, Verdict};
pub use dispatch::hook_action;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::actions::Action;
use crate::config::{Alignment, BarConfig};
use crate::error::{BarError, SourceError, SurfaceError};
use crate::ipc::IpcMessage;
use crate::modules::ModuleHandle;
use crate::reactor::{
    EventSource, RawEvent, Reactor, ReactorHandle, ReactorHandler, SourceId, WatchKind,
};
use crate::signals::{
    Handler, IpcCommand, Priority, Signal, SignalBus, SignalKind, SubscriberId,
    PRIORITY_CONTROLLER,
};
use crate::surface::{OutputSink, Surface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Reloading,
    Quitting,
    Stopped,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Quit,
    /// Rebuild everything from fresh configuration and run again
    Reload,
}

/// Work queued for the reactor thread by other threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Handoff {
    ModuleChanged(usize),
    ModuleStopped(usize),
    Action(String),
    Update { force: bool },
}

/// Thread-safe handle to a [`Controller`].
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Handoff>,
    reactor: ReactorHandle,
    allowed: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
}

impl ControllerHandle {
    fn new(reactor: ReactorHandle) -> (Self, mpsc::Receiver<Handoff>) {
        let (tx, rx) = mpsc::channel();
        let handle = Self {
            tx,
            reactor,
            allowed: Arc::new(AtomicBool::new(false)),
            reload: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    /// A handle whose reactor is never run, for driving workers directly.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<Handoff>) {
        let reactor = Reactor::new().expect("reactor runtime");
        Self::new(reactor.handle())
    }

    /// End the run. With `reload` the caller rebuilds and runs again.
    ///
    /// Never blocks; safe from any thread including the reactor's.
    pub fn trigger_quit(&self, reload: bool) {
        if reload {
            self.reload.store(true, Ordering::SeqCst);
        }
        self.allowed.store(false, Ordering::SeqCst);
        self.reactor.stop();
    }

    pub fn trigger_update(&self, force: bool) {
        self.handoff(Handoff::Update { force });
    }

    /// Route an action string to the modules, as if it had been clicked.
    pub fn trigger_action(&self, data: impl Into<String>) {
        self.handoff(Handoff::Action(data.into()));
    }

    pub fn is_processing_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    pub(crate) fn allow_processing(&self) {
        self.allowed.store(true, Ordering::SeqCst);
    }

    fn reload_requested(&self) -> bool {
        self.reload.load(Ordering::SeqCst)
    }

    /// Queue `work` and wake the reactor. Returns false if it was dropped.
    pub(crate) fn handoff(&self, work: Handoff) -> bool {
        // Stop reports are still wanted while shutting down
        if !self.is_processing_allowed() && !matches!(work, Handoff::ModuleStopped(_)) {
            log::debug!("Controller: dropping {:?} during shutdown", work);
            return false;
        }
        if self.tx.send(work).is_err() {
            log::debug!("Controller: hand-off queue closed");
            return false;
        }
        self.reactor.notify();
        true
    }
}

/// Controller state lent to bus subscribers during an emission.
pub struct Core {
    state: ControllerState,
    modules: Vec<ModuleHandle>,
    surface: Option<Box<dyn Surface>>,
    sink: Option<OutputSink>,
    snapshot_dst: Option<PathBuf>,
    separator: String,
    debounce: DebounceWindow,
    last_output: Option<String>,
    update_passes: u64,
    handle: ControllerHandle,
    handoff_rx: mpsc::Receiver<Handoff>,
    // Signals emitted while another emission is in progress
    outbox: VecDeque<Signal>,
}

impl Core {
    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn handle(&self) -> &ControllerHandle {
        &self.handle
    }

    pub fn modules(&self) -> &[ModuleHandle] {
        &self.modules
    }

    /// Queue `signal` for emission once the current one completes.
    pub fn emit(&mut self, signal: Signal) {
        self.outbox.push_back(signal);
    }

    fn on_signal(&mut self, signal: &Signal) -> bool {
        match signal {
            Signal::NotifyChange => self.notify_change(false),
            Signal::NotifyForceChange => self.notify_change(true),
            Signal::ExitReload => self.trigger_quit(true),
            Signal::CheckState => {
                if !self.modules.iter().any(ModuleHandle::is_running) {
                    log::info!("Controller: no module is running");
                    self.trigger_quit(false);
                }
            }
            Signal::IpcAction(data) | Signal::UiButtonPress(data) => self.trigger_action(data),
            Signal::IpcCommand(cmd) => return self.on_ipc_command(*cmd),
            Signal::IpcHook { module, index } => {
                self.dispatch_action(&hook_action(module, *index));
            }
            Signal::UiReady => return self.on_ui_ready(),
            Signal::UiUpdateBackground => {
                self.process_update(true);
            }
        }
        true
    }

    fn notify_change(&mut self, force: bool) {
        if !self.handle.is_processing_allowed() {
            log::debug!("Controller: ignoring change notification, processing stopped");
            return;
        }
        match self.debounce.record(Instant::now(), force) {
            Verdict::Flush { force } => {
                self.process_update(force);
            }
            Verdict::Defer { .. } => {}
        }
    }

    /// Collect module output and deliver it if it changed.
    ///
    /// Returns whether anything was delivered.
    fn process_update(&mut self, force: bool) -> bool {
        if !self.handle.is_processing_allowed() {
            return false;
        }
        if force {
            self.debounce.clear();
        }
        self.update_passes += 1;

        for module in self.modules.iter_mut() {
            module.refresh(force);
        }
        let output = self.assemble();
        if !force && self.last_output.as_deref() == Some(output.as_str()) {
            return false;
        }

        let delivered = match (&self.sink, self.surface.as_mut()) {
            (Some(sink), _) => sink
                .write_line(&output)
                .map_err(|e| SurfaceError::Other(e.to_string())),
            (None, Some(surface)) => surface.render(&output),
            (None, None) => {
                log::debug!("Controller: no destination for bar output");
                Ok(())
            }
        };
        if let Err(e) = delivered {
            if e.is_fatal() {
                log::error!("Controller: {}", e);
                self.trigger_quit(false);
            } else {
                log::warn!("Controller: failed to deliver bar output ({})", e);
            }
        }

        self.last_output = Some(output);
        true
    }

    /// `%{l}<left>%{c}<center>%{r}<right>`, skipping empty blocks
    fn assemble(&self) -> String {
        let mut out = String::new();
        for alignment in Alignment::ALL {
            let block: Vec<&str> = self
                .modules
                .iter()
                .filter(|m| m.alignment() == alignment && m.is_running())
                .map(ModuleHandle::output)
                .filter(|o| !o.is_empty())
                .collect();
            if block.is_empty() {
                continue;
            }
            out.push_str(alignment.tag());
            out.push_str(&block.join(&self.separator));
        }
        out
    }

    fn trigger_action(&mut self, data: &str) {
        match data.parse::<Action>() {
            Ok(action) => self.dispatch_action(&action),
            Err(e) => log::warn!("Controller: dropping action \"{}\" ({})", data, e),
        }
    }

    fn dispatch_action(&mut self, action: &Action) {
        match dispatch::dispatch(&mut self.modules, action) {
            Some(module) => {
                log::debug!("Controller: {} handled action \"{}\"", module, action);
                self.outbox.push_back(Signal::NotifyChange);
            }
            None => log::warn!("Controller: no module handled action \"{}\"", action),
        }
    }

    fn trigger_quit(&mut self, reload: bool) {
        if self.state == ControllerState::Running {
            if reload {
                log::info!("Controller: reloading");
                self.state = ControllerState::Reloading;
            } else {
                log::info!("Controller: quitting");
                self.state = ControllerState::Quitting;
            }
        }
        self.handle.trigger_quit(reload);
    }

    fn on_ipc_command(&mut self, cmd: IpcCommand) -> bool {
        match cmd {
            IpcCommand::Quit => self.trigger_quit(false),
            IpcCommand::Restart => self.trigger_quit(true),
            IpcCommand::Show | IpcCommand::Hide | IpcCommand::Toggle => {
                let Some(surface) = self.surface.as_mut() else {
                    log::debug!("Controller: no surface for cmd:{}", cmd.as_str());
                    return false;
                };
                match cmd {
                    IpcCommand::Show => surface.show(),
                    IpcCommand::Hide => surface.hide(),
                    _ => surface.toggle(),
                }
            }
        }
        true
    }

    fn on_ui_ready(&mut self) -> bool {
        let (Some(dst), Some(surface)) = (self.snapshot_dst.as_deref(), self.surface.as_mut())
        else {
            return false;
        };
        match surface.snapshot(dst) {
            Ok(()) => log::info!("Controller: saved snapshot to {}", dst.display()),
            Err(e) => log::error!("Controller: snapshot failed ({})", e),
        }
        self.trigger_quit(false);
        true
    }

    fn signal_handler(&mut self, signum: i32) {
        match signum {
            libc::SIGINT | libc::SIGTERM => {
                log::info!("Controller: received signal {}", signum);
                self.trigger_quit(false);
            }
            libc::SIGUSR1 => self.outbox.push_back(Signal::NotifyForceChange),
            other => log::debug!("Controller: ignoring signal {}", other),
        }
    }

    fn ipc_cb(&mut self, buf: &[u8]) {
        match IpcMessage::parse(buf) {
            Ok(message) => self.outbox.push_back(message.into_signal()),
            Err(e) => log::warn!("Controller: dropping malformed IPC message ({})", e),
        }
    }

    fn confwatch_handler(&mut self, path: &Path, kind: WatchKind) {
        log::info!("Controller: {} changed ({:?})", path.display(), kind);
        self.outbox.push_back(Signal::ExitReload);
    }

    fn conn_cb(&mut self) {
        let Some(surface) = self.surface.as_mut() else {
            log::debug!("Controller: connection event without a surface");
            return;
        };
        match surface.dispatch_events() {
            Ok(signals) => self.outbox.extend(signals),
            Err(e) if e.is_fatal() => {
                log::error!("Controller: {}", e);
                self.trigger_quit(false);
            }
            Err(e) => log::warn!("Controller: {}", e),
        }
    }

    /// Drain work handed over by other threads.
    fn notifier_handler(&mut self) {
        while let Ok(work) = self.handoff_rx.try_recv() {
            match work {
                Handoff::ModuleChanged(index) => {
                    if let Some(module) = self.modules.get_mut(index) {
                        module.mark_changed();
                    }
                    self.outbox.push_back(Signal::NotifyChange);
                }
                Handoff::ModuleStopped(index) => {
                    if let Some(module) = self.modules.get_mut(index) {
                        module.mark_stopped();
                    }
                    self.outbox.push_back(Signal::CheckState);
                }
                Handoff::Action(data) => self.trigger_action(&data),
                Handoff::Update { force: true } => self.outbox.push_back(Signal::NotifyForceChange),
                Handoff::Update { force: false } => self.outbox.push_back(Signal::NotifyChange),
            }
        }
    }
}

/// The controller as seen by the reactor during a run.
struct Session<'a> {
    bus: &'a mut SignalBus<Core>,
    core: &'a mut Core,
}

impl Session<'_> {
    fn flush(&mut self) {
        while let Some(signal) = self.core.outbox.pop_front() {
            if !self.bus.emit(self.core, &signal) {
                log::debug!("Controller: nobody handled {}", signal.kind());
            }
        }
    }
}

impl ReactorHandler for Session<'_> {
    fn on_event(&mut self, source: &SourceId, event: Result<RawEvent, SourceError>) {
        match event {
            Ok(RawEvent::Signal(signum)) => self.core.signal_handler(signum),
            Ok(RawEvent::Ipc(buf)) => self.core.ipc_cb(&buf),
            Ok(RawEvent::ConfigChanged { path, kind }) => self.core.confwatch_handler(&path, kind),
            Ok(RawEvent::Connection) => self.core.conn_cb(),
            Err(e) => log::warn!("Controller: source {} reported an error ({})", source, e),
        }
        self.flush();
    }

    fn on_wake(&mut self) {
        self.core.notifier_handler();
        self.flush();
    }

    fn deadline(&self) -> Option<Instant> {
        self.core.debounce.deadline()
    }

    fn on_deadline(&mut self, now: Instant) {
        if let Some(force) = self.core.debounce.expire(now) {
            self.core.process_update(force);
        }
        self.flush();
    }
}

pub struct Controller {
    reactor: Reactor,
    bus: SignalBus<Core>,
    core: Core,
    subscriber: SubscriberId,
    sources: Vec<Box<dyn EventSource>>,
    workers: Vec<JoinHandle<()>>,
}

impl Controller {
    pub fn new(
        config: &BarConfig,
        modules: Vec<ModuleHandle>,
        surface: Option<Box<dyn Surface>>,
    ) -> Result<Self, BarError> {
        let reactor = Reactor::new()?;
        let (handle, handoff_rx) = ControllerHandle::new(reactor.handle());

        let mut bus = SignalBus::new();
        let handler: Handler<Core> = Box::new(|core: &mut Core, signal: &Signal| core.on_signal(signal));
        let subscriber = bus.attach(PRIORITY_CONTROLLER, &SignalKind::ALL, handler);

        Ok(Self {
            reactor,
            bus,
            core: Core {
                state: ControllerState::Idle,
                modules,
                surface,
                sink: None,
                snapshot_dst: None,
                separator: config.separator.clone(),
                debounce: DebounceWindow::new(config.swallow_limit, config.swallow_update()),
                last_output: None,
                update_passes: 0,
                handle,
                handoff_rx,
                outbox: VecDeque::new(),
            },
            subscriber,
            sources: Vec::new(),
            workers: Vec::new(),
        })
    }

    /// Queue an event source; sources are registered when the run starts.
    pub fn add_source(&mut self, source: Box<dyn EventSource>) {
        self.sources.push(source);
    }

    /// Subscribe another component (surface, tray, ...) to the bus.
    pub fn attach(
        &mut self,
        priority: Priority,
        kinds: &[SignalKind],
        handler: Handler<Core>,
    ) -> SubscriberId {
        self.bus.attach(priority, kinds, handler)
    }

    pub fn detach(&mut self, subscriber: SubscriberId) -> bool {
        self.bus.detach(subscriber)
    }

    /// Emit `signal` on the calling thread. Only usable outside a run.
    pub fn emit(&mut self, signal: Signal) {
        self.core.outbox.push_back(signal);
        Session {
            bus: &mut self.bus,
            core: &mut self.core,
        }
        .flush();
    }

    pub fn handle(&self) -> ControllerHandle {
        self.core.handle.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.core.state
    }

    pub fn modules(&self) -> &[ModuleHandle] {
        &self.core.modules
    }

    /// Sources currently registered with the reactor
    pub fn source_count(&self) -> usize {
        self.reactor.source_count()
    }

    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    /// Update passes run so far
    pub fn update_count(&self) -> u64 {
        self.core.update_passes
    }

    pub fn last_output(&self) -> Option<&str> {
        self.core.last_output.as_deref()
    }

    /// Run the bar until it is asked to quit or reload.
    ///
    /// With `writeback` the output goes to `snapshot_dst` (or stdout)
    /// instead of the surface. Only a failure to register a source is an
    /// error; everything after dispatch starts is handled locally.
    pub fn run(
        &mut self,
        writeback: bool,
        snapshot_dst: Option<PathBuf>,
    ) -> Result<RunOutcome, BarError> {
        if self.core.state != ControllerState::Idle {
            return Err(BarError::Runtime("controller has already run".into()));
        }
        self.core.sink = writeback.then(|| OutputSink::for_destination(snapshot_dst.as_deref()));
        self.core.snapshot_dst = snapshot_dst;

        for source in std::mem::take(&mut self.sources) {
            if let Err(e) = self.reactor.register_source(source) {
                log::error!("Controller: {}", e);
                self.shutdown();
                return Err(e.into());
            }
        }

        self.core.handle.allow_processing();
        self.core.state = ControllerState::Running;
        self.spawn_workers();
        self.core.process_update(true);

        log::info!(
            "Controller: running with {} module(s), {} source(s)",
            self.core.modules.len(),
            self.reactor.source_count()
        );
        self.reactor.run(&mut Session {
            bus: &mut self.bus,
            core: &mut self.core,
        });

        self.shutdown();
        let outcome = if self.core.handle.reload_requested() {
            RunOutcome::Reload
        } else {
            RunOutcome::Quit
        };
        log::info!("Controller: stopped ({:?})", outcome);
        Ok(outcome)
    }

    fn spawn_workers(&mut self) {
        for (index, module) in self.core.modules.iter().enumerate() {
            match module.spawn_worker(index, self.core.handle.clone()) {
                Some(Ok(worker)) => self.workers.push(worker),
                Some(Err(e)) => {
                    log::error!("Controller: failed to start worker for {} ({})", module.name(), e)
                }
                None => {}
            }
        }
    }

    /// Stop processing, join workers and tear modules down. Idempotent.
    fn shutdown(&mut self) {
        self.core.handle.allowed.store(false, Ordering::SeqCst);
        self.reactor.stop();
        self.reactor.close_sources();

        let joined = self.workers.len();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Controller: a module worker panicked");
            }
        }
        if joined > 0 {
            log::debug!("Controller: joined {} worker(s)", joined);
        }

        for module in self.core.modules.iter_mut() {
            module.teardown();
        }
        self.core.state = ControllerState::Stopped;
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
        self.bus.detach(self.subscriber);
    }
}
