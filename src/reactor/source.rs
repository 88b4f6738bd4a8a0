//! Event sources multiplexed by the reactor.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SourceError;

/// Identity of a registered source. Each identity may be registered once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Windowing-system connection.
    Connection,
    Ipc,
    ConfigWatch,
    OsSignals,
    Custom(String),
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Connection => f.write_str("connection"),
            SourceId::Ipc => f.write_str("ipc"),
            SourceId::ConfigWatch => f.write_str("config-watch"),
            SourceId::OsSignals => f.write_str("os-signals"),
            SourceId::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Kind of change reported by the configuration watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Created,
    Modified,
    Removed,
}

/// Raw platform event, before translation into signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// The windowing connection has pending events.
    Connection,
    /// One framed IPC message, unparsed.
    Ipc(Vec<u8>),
    ConfigChanged { path: PathBuf, kind: WatchKind },
    /// OS signal number.
    Signal(i32),
}

pub type SourceResult = Result<RawEvent, SourceError>;

/// An owned OS resource that yields raw events.
///
/// `open` runs inside the reactor's runtime context during registration, so
/// sources may bind sockets or install handlers there. `next_event` must be
/// cancel safe: the reactor drops a pending call when it stops. `close`
/// releases the resource and is called exactly once by the reactor; sources
/// also release on `Drop` for sources that were never run.
#[async_trait]
pub trait EventSource: Send {
    fn id(&self) -> SourceId;

    fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// `None` means the source has been exhausted and will yield nothing more.
    async fn next_event(&mut self) -> Option<SourceResult>;

    fn close(&mut self) {}
}

/// Sending half of a [`ChannelSource`]. Usable from any thread.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<SourceResult>,
}

impl ChannelSender {
    /// Returns false once the source has been closed.
    pub fn send(&self, event: SourceResult) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Source fed through an in-process channel.
///
/// Adapters for collaborators that own their own file descriptors (the
/// windowing connection) forward readiness through this.
pub struct ChannelSource {
    id: SourceId,
    rx: mpsc::UnboundedReceiver<SourceResult>,
}

impl ChannelSource {
    pub fn new(id: SourceId) -> (ChannelSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSender { tx }, Self { id, rx })
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn next_event(&mut self) -> Option<SourceResult> {
        self.rx.recv().await
    }

    fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_display() {
        assert_eq!(SourceId::ConfigWatch.to_string(), "config-watch");
        assert_eq!(SourceId::Custom("tray".into()).to_string(), "custom:tray");
    }

    #[test]
    fn test_channel_source_close_is_visible_to_sender() {
        let (tx, mut source) = ChannelSource::new(SourceId::Connection);
        assert!(tx.send(Ok(RawEvent::Connection)));
        assert!(!tx.is_closed());

        source.close();
        assert!(tx.is_closed());
        assert!(!tx.send(Ok(RawEvent::Connection)));
    }
}
