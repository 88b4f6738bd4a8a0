//! OS process signals as an event source.

use async_trait::async_trait;
use tokio::signal::unix::{signal, Signal as UnixSignal, SignalKind};

use super::source::{EventSource, RawEvent, SourceId, SourceResult};
use crate::error::SourceError;

/// Funnels `SIGINT`, `SIGTERM` and `SIGUSR1` into the reactor.
///
/// Handlers are installed on `open`, inside the reactor's runtime, and the
/// signals are delivered on the reactor thread like any other event.
#[derive(Default)]
pub struct SignalSource {
    streams: Option<SignalStreams>,
}

struct SignalStreams {
    interrupt: UnixSignal,
    terminate: UnixSignal,
    user1: UnixSignal,
}

impl SignalSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventSource for SignalSource {
    fn id(&self) -> SourceId {
        SourceId::OsSignals
    }

    fn open(&mut self) -> Result<(), SourceError> {
        self.streams = Some(SignalStreams {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            user1: signal(SignalKind::user_defined1())?,
        });
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SourceResult> {
        let streams = self.streams.as_mut()?;
        let signum = tokio::select! {
            Some(()) = streams.interrupt.recv() => libc::SIGINT,
            Some(()) = streams.terminate.recv() => libc::SIGTERM,
            Some(()) = streams.user1.recv() => libc::SIGUSR1,
            else => return None,
        };
        Some(Ok(RawEvent::Signal(signum)))
    }

    fn close(&mut self) {
        // Dropping the streams stops delivery; tokio keeps the process-wide
        // handler installed but the signals are no longer routed here.
        self.streams = None;
    }
}
