//! Inter-process command channel.
//!
//! Messages arrive newline-framed on a Unix socket and are fire-and-forget:
//! nothing is written back to the sender. Each message is one of
//!
//! - `action:<string>`: a user action, routed like a click
//! - `cmd:<show|hide|toggle|quit|restart>`: legacy window command
//! - `hook:<module>.<index>`: run hook `<index>` of an IPC module

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{MalformedInput, SourceError};
use crate::reactor::{EventSource, RawEvent, SourceId, SourceResult};
use crate::signals::{IpcCommand, Signal};

/// Largest accepted message, in bytes.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Queue depth between the socket tasks and the reactor.
const CHANNEL_CAPACITY: usize = 64;

/// A classified IPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMessage {
    Action(String),
    Command(IpcCommand),
    Hook { module: String, index: usize },
}

impl IpcMessage {
    /// Classify a raw message.
    pub fn parse(buf: &[u8]) -> Result<Self, MalformedInput> {
        if buf.len() > MAX_MESSAGE_LEN {
            return Err(MalformedInput::TooLong(MAX_MESSAGE_LEN));
        }
        let text = std::str::from_utf8(buf).map_err(|_| MalformedInput::InvalidUtf8)?;
        let text = text.trim_end_matches(['\n', '\r']).trim();
        if text.is_empty() {
            return Err(MalformedInput::Empty);
        }
        if text.chars().any(char::is_control) {
            return Err(MalformedInput::ControlCharacters);
        }

        let Some((prefix, payload)) = text.split_once(':') else {
            return Err(MalformedInput::UnknownPrefix(text.to_string()));
        };
        let payload = payload.trim();

        match prefix {
            "action" => {
                if payload.is_empty() {
                    return Err(MalformedInput::Empty);
                }
                Ok(IpcMessage::Action(payload.to_string()))
            }
            "cmd" => IpcCommand::parse(payload)
                .map(IpcMessage::Command)
                .ok_or_else(|| MalformedInput::UnknownCommand(payload.to_string())),
            "hook" => parse_hook(payload),
            other => Err(MalformedInput::UnknownPrefix(other.to_string())),
        }
    }

    pub fn into_signal(self) -> Signal {
        match self {
            IpcMessage::Action(data) => Signal::IpcAction(data),
            IpcMessage::Command(cmd) => Signal::IpcCommand(cmd),
            IpcMessage::Hook { module, index } => Signal::IpcHook { module, index },
        }
    }
}

fn parse_hook(payload: &str) -> Result<IpcMessage, MalformedInput> {
    let invalid = || MalformedInput::InvalidHook(payload.to_string());
    let (module, index) = payload.rsplit_once('.').ok_or_else(invalid)?;
    if module.is_empty() {
        return Err(invalid());
    }
    let index = index.parse::<usize>().map_err(|_| invalid())?;
    Ok(IpcMessage::Hook {
        module: module.to_string(),
        index,
    })
}

/// Default socket location for this process.
pub fn default_socket_path() -> PathBuf {
    let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    dir.join(format!("barcore_ipc.{}.sock", std::process::id()))
}

/// Unix-socket listener that yields one [`RawEvent::Ipc`] per framed message.
///
/// The socket file is created on `open` and removed on `close`/drop.
pub struct IpcSource {
    path: PathBuf,
    rx: Option<mpsc::Receiver<SourceResult>>,
    acceptor: Option<JoinHandle<()>>,
}

impl IpcSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rx: None,
            acceptor: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSource for IpcSource {
    fn id(&self) -> SourceId {
        SourceId::Ipc
    }

    fn open(&mut self) -> Result<(), SourceError> {
        if self.path.exists() {
            log::debug!("IPC: removing stale socket {}", self.path.display());
            std::fs::remove_file(&self.path)?;
        }
        let listener = UnixListener::bind(&self.path)?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        self.acceptor = Some(tokio::spawn(accept_loop(listener, tx)));
        self.rx = Some(rx);
        log::info!("IPC: listening on {}", self.path.display());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SourceResult> {
        self.rx.as_mut()?.recv().await
    }

    fn close(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            let _ = std::fs::remove_file(&self.path);
            log::debug!("IPC: closed {}", self.path.display());
        }
    }
}

impl Drop for IpcSource {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(listener: UnixListener, tx: mpsc::Sender<SourceResult>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(read_messages(stream, tx.clone()));
            }
            Err(e) => {
                if tx.send(Err(SourceError::from(e))).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn read_messages(stream: UnixStream, tx: mpsc::Sender<SourceResult>) {
    let mut reader = BufReader::new(stream);
    let mut frame = Vec::with_capacity(256);
    loop {
        match read_frame(&mut reader, &mut frame).await {
            Ok(Frame::Message) => {
                if frame.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if tx.send(Ok(RawEvent::Ipc(frame.clone()))).await.is_err() {
                    break;
                }
            }
            Ok(Frame::Oversize) => {
                log::warn!("IPC: dropping message longer than {} bytes", MAX_MESSAGE_LEN);
            }
            Ok(Frame::Eof) => break,
            Err(e) => {
                let _ = tx.send(Err(SourceError::from(e))).await;
                break;
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// `buf` holds one message without its newline
    Message,
    /// A message over [`MAX_MESSAGE_LEN`] was skipped up to its newline
    Oversize,
    Eof,
}

/// Read one newline-terminated message into `buf`, holding at most
/// `MAX_MESSAGE_LEN + 1` bytes of it in memory.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_MESSAGE_LEN as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        return Ok(Frame::Message);
    }
    if buf.len() <= MAX_MESSAGE_LEN {
        // Unterminated final message before EOF
        return Ok(Frame::Message);
    }

    buf.clear();
    skip_line(reader).await?;
    Ok(Frame::Oversize)
}

/// Discard input up to and including the next newline.
async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(());
            }
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => (pos + 1, true),
                None => (chunk.len(), false),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!(
            IpcMessage::parse(b"action:volume-up\n").unwrap(),
            IpcMessage::Action("volume-up".into())
        );
        assert_eq!(
            IpcMessage::parse(b"action:#clock.toggle").unwrap(),
            IpcMessage::Action("#clock.toggle".into())
        );
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            IpcMessage::parse(b"cmd:toggle").unwrap(),
            IpcMessage::Command(IpcCommand::Toggle)
        );
        assert_eq!(
            IpcMessage::parse(b"cmd:fly"),
            Err(MalformedInput::UnknownCommand("fly".into()))
        );
    }

    #[test]
    fn test_parse_hook() {
        assert_eq!(
            IpcMessage::parse(b"hook:demo.2").unwrap(),
            IpcMessage::Hook {
                module: "demo".into(),
                index: 2
            }
        );
        assert!(matches!(
            IpcMessage::parse(b"hook:demo"),
            Err(MalformedInput::InvalidHook(_))
        ));
        assert!(matches!(
            IpcMessage::parse(b"hook:.1"),
            Err(MalformedInput::InvalidHook(_))
        ));
        assert!(matches!(
            IpcMessage::parse(b"hook:demo.-1"),
            Err(MalformedInput::InvalidHook(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            IpcMessage::parse(b"\x00\x01"),
            Err(MalformedInput::ControlCharacters)
        );
        assert_eq!(IpcMessage::parse(b"   \n"), Err(MalformedInput::Empty));
        assert_eq!(IpcMessage::parse(b"\xff\xfe"), Err(MalformedInput::InvalidUtf8));
        assert_eq!(IpcMessage::parse(b"action:"), Err(MalformedInput::Empty));
        assert!(matches!(
            IpcMessage::parse(b"volume-up"),
            Err(MalformedInput::UnknownPrefix(_))
        ));
        let long = vec![b'a'; MAX_MESSAGE_LEN + 1];
        assert!(matches!(
            IpcMessage::parse(&long),
            Err(MalformedInput::TooLong(_))
        ));
    }

    #[test]
    fn test_message_maps_to_signal() {
        assert_eq!(
            IpcMessage::Action("x".into()).into_signal(),
            Signal::IpcAction("x".into())
        );
        assert_eq!(
            IpcMessage::Command(IpcCommand::Hide).into_signal(),
            Signal::IpcCommand(IpcCommand::Hide)
        );
    }

    #[test]
    fn test_socket_delivers_framed_messages() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bar.sock");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut source = IpcSource::new(&path);
            source.open().unwrap();
            assert!(path.exists());

            let mut client = UnixStream::connect(&path).await.unwrap();
            client
                .write_all(b"action:volume-up\n\ncmd:hide\n")
                .await
                .unwrap();
            drop(client);

            let first = source.next_event().await.unwrap().unwrap();
            let second = source.next_event().await.unwrap().unwrap();
            assert_eq!(first, RawEvent::Ipc(b"action:volume-up".to_vec()));
            assert_eq!(second, RawEvent::Ipc(b"cmd:hide".to_vec()));

            source.close();
        });
        assert!(!path.exists());
    }

    #[test]
    fn test_oversize_frame_is_skipped_without_buffering_it() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let mut input = vec![b'a'; MAX_MESSAGE_LEN * 64];
        input.extend_from_slice(b"\ncmd:quit\nlast");
        let mut reader = BufReader::new(input.as_slice());
        let mut frame = Vec::new();

        runtime.block_on(async {
            let first = read_frame(&mut reader, &mut frame).await.unwrap();
            assert_eq!(first, Frame::Oversize);
            assert!(frame.capacity() <= 2 * (MAX_MESSAGE_LEN + 1));

            assert_eq!(read_frame(&mut reader, &mut frame).await.unwrap(), Frame::Message);
            assert_eq!(frame, b"cmd:quit");
            assert_eq!(read_frame(&mut reader, &mut frame).await.unwrap(), Frame::Message);
            assert_eq!(frame, b"last");
            assert_eq!(read_frame(&mut reader, &mut frame).await.unwrap(), Frame::Eof);
        });
    }

    #[test]
    fn test_socket_drops_oversize_message_and_resyncs() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bar.sock");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut source = IpcSource::new(&path);
            source.open().unwrap();

            let mut payload = vec![b'a'; 8 * 1024 * 1024];
            payload.extend_from_slice(b"\ncmd:hide\n");
            let writer = tokio::spawn(async move {
                let mut client = UnixStream::connect(&path).await.unwrap();
                client.write_all(&payload).await.unwrap();
            });

            let event = source.next_event().await.unwrap().unwrap();
            assert_eq!(event, RawEvent::Ipc(b"cmd:hide".to_vec()));
            writer.await.unwrap();

            source.close();
        });
    }
}
