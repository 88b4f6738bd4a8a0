//! File watcher for the bar configuration
//!
//! Watches the directory containing the configuration file and yields a
//! [`RawEvent::ConfigChanged`] whenever the file itself is created, modified
//! or removed. Watching the directory instead of the file keeps working when
//! editors replace the file through a rename.
//!
//! The watcher does not diff contents; every notification means "a reload
//! may be needed" and the controller decides what to do with it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::reactor::{EventSource, RawEvent, SourceId, SourceResult, WatchKind};

/// Channel buffer between the notify thread and the reactor
const CHANNEL_CAPACITY: usize = 64;

pub struct ConfigWatchSource {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
    rx: Option<mpsc::Receiver<SourceResult>>,
}

impl ConfigWatchSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watcher: None,
            rx: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn watch_kind(kind: &EventKind) -> Option<WatchKind> {
    match kind {
        EventKind::Create(_) => Some(WatchKind::Created),
        EventKind::Modify(_) => Some(WatchKind::Modified),
        EventKind::Remove(_) => Some(WatchKind::Removed),
        _ => None,
    }
}

/// Translate one notify callback into at most one raw event for `file_name`.
fn translate(
    result: Result<Event, notify::Error>,
    file_name: &OsString,
) -> Option<SourceResult> {
    let event = match result {
        Ok(event) => event,
        Err(e) => return Some(Err(SourceError::Backend(e.to_string()))),
    };
    let kind = watch_kind(&event.kind)?;
    let path = event
        .paths
        .into_iter()
        .find(|p| p.file_name() == Some(file_name.as_os_str()))?;
    Some(Ok(RawEvent::ConfigChanged { path, kind }))
}

#[async_trait]
impl EventSource for ConfigWatchSource {
    fn id(&self) -> SourceId {
        SourceId::ConfigWatch
    }

    fn open(&mut self) -> Result<(), SourceError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| SourceError::Backend(format!("not a file: {}", self.path.display())))?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                if let Some(event) = translate(result, &file_name) {
                    // A full queue already carries a pending reload
                    let _ = tx.try_send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| SourceError::Backend(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| SourceError::Backend(format!("failed to watch {}: {}", dir.display(), e)))?;

        log::info!("Watcher: watching {} for changes", self.path.display());
        self.watcher = Some(watcher);
        self.rx = Some(rx);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SourceResult> {
        self.rx.as_mut()?.recv().await
    }

    fn close(&mut self) {
        // Dropping the watcher stops its thread and closes the channel
        if self.watcher.take().is_some() {
            log::debug!("Watcher: stopped watching {}", self.path.display());
        }
        if let Some(mut rx) = self.rx.take() {
            rx.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    fn event(kind: EventKind, path: &str) -> Result<Event, notify::Error> {
        Ok(Event::new(kind).add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_translate_filters_other_files() {
        let name = OsString::from("config.json");
        let hit = translate(
            event(EventKind::Modify(ModifyKind::Any), "/etc/bar/config.json"),
            &name,
        );
        assert_eq!(
            hit.unwrap().unwrap(),
            RawEvent::ConfigChanged {
                path: PathBuf::from("/etc/bar/config.json"),
                kind: WatchKind::Modified
            }
        );

        let miss = translate(
            event(EventKind::Create(CreateKind::File), "/etc/bar/.config.json.swp"),
            &name,
        );
        assert!(miss.is_none());
    }

    #[test]
    fn test_translate_ignores_access_events() {
        let name = OsString::from("config.json");
        let access = translate(
            event(
                EventKind::Access(notify::event::AccessKind::Any),
                "/etc/bar/config.json",
            ),
            &name,
        );
        assert!(access.is_none());
    }

    #[test]
    fn test_translate_reports_backend_errors() {
        let name = OsString::from("config.json");
        let err = translate(Err(notify::Error::generic("inotify limit")), &name);
        assert!(matches!(err, Some(Err(SourceError::Backend(_)))));
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let mut source = ConfigWatchSource::new("/definitely/not/here/config.json");
        assert!(source.open().is_err());
    }
}
