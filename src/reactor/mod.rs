//! Single-threaded event reactor.
//!
//! Multiplexes every registered [`EventSource`] on one thread using a
//! current-thread tokio runtime. Each source is pumped by its own task into
//! one ordered queue; the dispatch loop pops from that queue and calls the
//! [`ReactorHandler`], so all handler calls happen on the thread that called
//! [`Reactor::run`].
//!
//! Besides source events the loop reacts to:
//! - a wake-up from [`ReactorHandle::notify`], usable from any thread
//! - the handler's own deadline (used for debounce timers)
//! - [`ReactorHandle::stop`], after which no further handler call is made
//!
//! On exit every pump task is stopped and every source is closed before
//! `run` returns.

mod os_signal;
mod source;

pub use os_signal::SignalSource;
pub use source::{
    ChannelSender, ChannelSource, EventSource, RawEvent, SourceId, SourceResult, WatchKind,
};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::error::{RegistrationError, SourceError};

/// Callbacks invoked on the reactor thread.
pub trait ReactorHandler {
    fn on_event(&mut self, source: &SourceId, event: Result<RawEvent, SourceError>);

    /// Cross-thread work was handed over through [`ReactorHandle::notify`].
    fn on_wake(&mut self);

    /// Next instant at which [`ReactorHandler::on_deadline`] should run.
    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn on_deadline(&mut self, _now: Instant) {}
}

struct Shared {
    stop_tx: watch::Sender<bool>,
    wake: Notify,
    running: AtomicBool,
}

/// Thread-safe control handle for a [`Reactor`].
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Ask the dispatch loop to return after the current cycle.
    ///
    /// Idempotent and callable before `run` starts, from the reactor thread
    /// itself or from any other thread. Never blocks.
    pub fn stop(&self) {
        if !self.shared.stop_tx.send_replace(true) {
            log::debug!("Reactor: stop requested");
        }
    }

    /// Wake the dispatch loop so it drains hand-off queues.
    pub fn notify(&self) {
        self.shared.wake.notify_one();
    }

    pub fn is_stopping(&self) -> bool {
        *self.shared.stop_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

type Dispatch = (SourceId, Result<RawEvent, SourceError>);

pub struct Reactor {
    runtime: Runtime,
    sources: Vec<Box<dyn EventSource>>,
    ids: HashSet<SourceId>,
    handle: ReactorHandle,
}

impl Reactor {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            runtime,
            sources: Vec::new(),
            ids: HashSet::new(),
            handle: ReactorHandle {
                shared: Arc::new(Shared {
                    stop_tx,
                    wake: Notify::new(),
                    running: AtomicBool::new(false),
                }),
            },
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Open `source` and add it to the wait set.
    ///
    /// On failure the source is dropped, which releases anything it had
    /// acquired.
    pub fn register_source(
        &mut self,
        mut source: Box<dyn EventSource>,
    ) -> Result<(), RegistrationError> {
        let id = source.id();
        if self.ids.contains(&id) {
            return Err(RegistrationError::Duplicate(id));
        }

        {
            let _guard = self.runtime.enter();
            source.open().map_err(|e| RegistrationError::Open {
                id: id.clone(),
                reason: e.to_string(),
            })?;
        }

        log::debug!("Reactor: registered source {}", id);
        self.ids.insert(id);
        self.sources.push(source);
        Ok(())
    }

    /// Number of sources currently registered and not yet closed.
    pub fn source_count(&self) -> usize {
        self.ids.len()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Close and drop sources that were registered but never run.
    pub fn close_sources(&mut self) {
        if self.sources.is_empty() {
            return;
        }
        let _guard = self.runtime.enter();
        for mut source in self.sources.drain(..) {
            log::debug!("Reactor: closing source {}", source.id());
            source.close();
        }
        self.ids.clear();
    }

    pub fn notify(&self) {
        self.handle.notify();
    }

    /// Block the calling thread dispatching events until [`Reactor::stop`].
    ///
    /// Sources are closed and deregistered before this returns.
    pub fn run<H: ReactorHandler>(&mut self, handler: &mut H) {
        let sources = std::mem::take(&mut self.sources);
        let shared = Arc::clone(&self.handle.shared);

        shared.running.store(true, Ordering::Release);
        self.runtime.block_on(async {
            let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
            let pumps: Vec<JoinHandle<Box<dyn EventSource>>> = sources
                .into_iter()
                .map(|source| tokio::spawn(pump(source, tx.clone(), shared.stop_tx.subscribe())))
                .collect();
            drop(tx);

            dispatch_loop(&shared, &mut rx, handler).await;

            // Whatever is still queued arrived after stop was requested
            let mut raced = 0usize;
            while rx.try_recv().is_ok() {
                raced += 1;
            }
            if raced > 0 {
                log::debug!("Reactor: dropped {} event(s) that raced shutdown", raced);
            }

            for pump in pumps {
                match pump.await {
                    Ok(mut source) => {
                        log::debug!("Reactor: closing source {}", source.id());
                        source.close();
                    }
                    Err(e) => log::warn!("Reactor: source task failed: {}", e),
                }
            }
        });
        shared.running.store(false, Ordering::Release);
        self.ids.clear();
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.close_sources();
    }
}

async fn dispatch_loop<H: ReactorHandler>(
    shared: &Shared,
    rx: &mut mpsc::UnboundedReceiver<Dispatch>,
    handler: &mut H,
) {
    let mut stop_rx = shared.stop_tx.subscribe();

    loop {
        if *stop_rx.borrow() {
            break;
        }
        let deadline = handler.deadline();

        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shared.wake.notified() => {
                if *stop_rx.borrow() {
                    log::debug!("Reactor: ignoring wake-up after stop");
                    break;
                }
                handler.on_wake();
            }
            Some((id, event)) = rx.recv() => {
                if *stop_rx.borrow() {
                    log::debug!("Reactor: ignoring event from {} after stop", id);
                    break;
                }
                handler.on_event(&id, event);
            }
            _ = sleep_until(deadline) => handler.on_deadline(Instant::now()),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// Forward events from one source until stop, then hand the source back.
async fn pump(
    mut source: Box<dyn EventSource>,
    tx: mpsc::UnboundedSender<Dispatch>,
    mut stop_rx: watch::Receiver<bool>,
) -> Box<dyn EventSource> {
    let id = source.id();

    loop {
        if *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = source.next_event() => match event {
                Some(event) => {
                    if tx.send((id.clone(), event)).is_err() {
                        break;
                    }
                }
                None => {
                    log::debug!("Reactor: source {} exhausted", id);
                    while !*stop_rx.borrow() {
                        if stop_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            },
        }
    }
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    use crate::error::SourceError;

    #[derive(Default)]
    struct Recorder {
        events: Vec<(SourceId, RawEvent)>,
        errors: usize,
        wakes: usize,
        stop_after: usize,
        handle: Option<ReactorHandle>,
    }

    impl ReactorHandler for Recorder {
        fn on_event(&mut self, source: &SourceId, event: Result<RawEvent, SourceError>) {
            match event {
                Ok(raw) => self.events.push((source.clone(), raw)),
                Err(_) => self.errors += 1,
            }
            if self.events.len() + self.errors >= self.stop_after {
                if let Some(handle) = &self.handle {
                    handle.stop();
                }
            }
        }

        fn on_wake(&mut self) {
            self.wakes += 1;
            if let Some(handle) = &self.handle {
                handle.stop();
            }
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut reactor = Reactor::new().unwrap();
        let (_tx1, first) = ChannelSource::new(SourceId::Ipc);
        let (_tx2, second) = ChannelSource::new(SourceId::Ipc);

        reactor.register_source(Box::new(first)).unwrap();
        let err = reactor.register_source(Box::new(second)).unwrap_err();
        assert!(matches!(err, RegistrationError::Duplicate(SourceId::Ipc)));
        assert_eq!(reactor.source_count(), 1);
    }

    #[test]
    fn test_open_failure_is_registration_error() {
        struct Broken;

        #[async_trait::async_trait]
        impl EventSource for Broken {
            fn id(&self) -> SourceId {
                SourceId::Custom("broken".into())
            }
            fn open(&mut self) -> Result<(), SourceError> {
                Err(SourceError::Io("bad descriptor".into()))
            }
            async fn next_event(&mut self) -> Option<SourceResult> {
                None
            }
        }

        let mut reactor = Reactor::new().unwrap();
        let err = reactor.register_source(Box::new(Broken)).unwrap_err();
        assert!(matches!(err, RegistrationError::Open { .. }));
        assert_eq!(reactor.source_count(), 0);
    }

    #[test]
    fn test_events_dispatch_in_order_and_errors_do_not_end_run() {
        let mut reactor = Reactor::new().unwrap();
        let (tx, source) = ChannelSource::new(SourceId::Connection);
        reactor.register_source(Box::new(source)).unwrap();

        tx.send(Ok(RawEvent::Signal(1)));
        tx.send(Err(SourceError::Io("transient".into())));
        tx.send(Ok(RawEvent::Signal(2)));
        tx.send(Ok(RawEvent::Signal(3)));

        let mut recorder = Recorder {
            stop_after: 4,
            handle: Some(reactor.handle()),
            ..Default::default()
        };
        reactor.run(&mut recorder);

        let numbers: Vec<RawEvent> = recorder.events.iter().map(|(_, e)| e.clone()).collect();
        assert_eq!(
            numbers,
            vec![RawEvent::Signal(1), RawEvent::Signal(2), RawEvent::Signal(3)]
        );
        assert_eq!(recorder.errors, 1);
    }

    #[test]
    fn test_stop_closes_all_sources() {
        let mut reactor = Reactor::new().unwrap();
        let (conn_tx, conn) = ChannelSource::new(SourceId::Connection);
        let (ipc_tx, ipc) = ChannelSource::new(SourceId::Ipc);
        reactor.register_source(Box::new(conn)).unwrap();
        reactor.register_source(Box::new(ipc)).unwrap();
        assert_eq!(reactor.source_count(), 2);

        let handle = reactor.handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.stop();
        });

        let mut recorder = Recorder::default();
        reactor.run(&mut recorder);
        stopper.join().unwrap();

        assert_eq!(reactor.source_count(), 0);
        assert!(conn_tx.is_closed());
        assert!(ipc_tx.is_closed());
        assert!(!reactor.handle().is_running());
    }

    #[test]
    fn test_close_sources_releases_unrun_sources() {
        let mut reactor = Reactor::new().unwrap();
        let (tx, source) = ChannelSource::new(SourceId::Connection);
        reactor.register_source(Box::new(source)).unwrap();

        reactor.close_sources();
        assert_eq!(reactor.source_count(), 0);
        assert!(tx.is_closed());

        let (_tx, again) = ChannelSource::new(SourceId::Connection);
        assert!(reactor.register_source(Box::new(again)).is_ok());
    }

    #[test]
    fn test_stop_before_run_returns_immediately() {
        let mut reactor = Reactor::new().unwrap();
        let (tx, source) = ChannelSource::new(SourceId::Connection);
        reactor.register_source(Box::new(source)).unwrap();
        tx.send(Ok(RawEvent::Connection));

        reactor.stop();
        reactor.stop();

        let mut recorder = Recorder::default();
        reactor.run(&mut recorder);
        assert!(recorder.events.is_empty());
        assert!(tx.is_closed());
    }

    #[test]
    fn test_notify_from_other_thread_wakes_loop() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            handle.notify();
        });

        let mut recorder = Recorder {
            handle: Some(reactor.handle()),
            ..Default::default()
        };
        reactor.run(&mut recorder);
        waker.join().unwrap();
        assert_eq!(recorder.wakes, 1);
    }

    #[test]
    fn test_deadline_fires_on_reactor_thread() {
        struct Timer {
            at: Option<Instant>,
            fired: usize,
            handle: ReactorHandle,
        }

        impl ReactorHandler for Timer {
            fn on_event(&mut self, _: &SourceId, _: Result<RawEvent, SourceError>) {}
            fn on_wake(&mut self) {}
            fn deadline(&self) -> Option<Instant> {
                self.at
            }
            fn on_deadline(&mut self, _now: Instant) {
                self.fired += 1;
                self.at = None;
                self.handle.stop();
            }
        }

        let mut reactor = Reactor::new().unwrap();
        let mut timer = Timer {
            at: Some(Instant::now() + Duration::from_millis(5)),
            fired: 0,
            handle: reactor.handle(),
        };
        reactor.run(&mut timer);
        assert_eq!(timer.fired, 1);
    }
}
