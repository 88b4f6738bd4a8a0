//! Rendering destinations for assembled bar output.
//!
//! A run either hands every update to a [`Surface`] (a window on a display
//! server) or, in write-back mode, prints it through an [`OutputSink`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::SurfaceError;
use crate::signals::Signal;

/// A drawable bar window.
///
/// Driven only from the reactor thread.
pub trait Surface {
    fn render(&mut self, output: &str) -> Result<(), SurfaceError>;

    /// Process whatever the display connection has pending and return the
    /// signals it produced (`UiReady`, `UiButtonPress`, ...).
    fn dispatch_events(&mut self) -> Result<Vec<Signal>, SurfaceError> {
        Ok(Vec::new())
    }

    fn show(&mut self);
    fn hide(&mut self);
    fn toggle(&mut self);

    /// Save an image of the current contents to `dst`.
    fn snapshot(&mut self, dst: &Path) -> Result<(), SurfaceError>;
}

/// Write-back destination: one line per update pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    Stdout,
    /// Overwritten on every pass so it always holds the latest line.
    File(PathBuf),
}

impl OutputSink {
    pub fn for_destination(dst: Option<&Path>) -> Self {
        match dst {
            Some(path) => OutputSink::File(path.to_path_buf()),
            None => OutputSink::Stdout,
        }
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        match self {
            OutputSink::Stdout => {
                let mut stdout = io::stdout().lock();
                writeln!(stdout, "{}", line)?;
                stdout.flush()
            }
            OutputSink::File(path) => fs::write(path, format!("{}\n", line)),
        }
    }
}
