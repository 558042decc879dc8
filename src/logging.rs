//! Log output setup.
//!
//! Events go to stderr, or into the dashboard's log panel while it has a
//! channel attached (the alternate screen would be garbled by stderr).

use std::io::{self, Write};
use std::sync::mpsc::SyncSender;
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

static LOG_SENDER: Mutex<Option<SyncSender<String>>> = Mutex::new(None);

/// Set a channel sender for capturing log lines (used by TUI)
pub fn set_log_sender(sender: Option<SyncSender<String>>) {
    if let Ok(mut guard) = LOG_SENDER.lock() {
        *guard = sender;
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init(verbose: bool) {
    let default = if verbose { "petri_viewer=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(LogSink)
        .with_ansi(false)
        .with_target(verbose)
        .try_init();
}

#[derive(Debug, Clone, Copy)]
struct LogSink;

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter::default()
    }
}

/// Buffers one formatted event and emits it when dropped.
#[derive(Debug, Default)]
pub struct LogWriter {
    buf: Vec<u8>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        if let Ok(guard) = LOG_SENDER.lock() {
            if let Some(sender) = guard.as_ref() {
                // Drop the line rather than block when the panel falls behind
                let line = String::from_utf8_lossy(&self.buf).trim_end().to_string();
                let _ = sender.try_send(line);
                return;
            }
        }
        let _ = io::stderr().write_all(&self.buf);
    }
}
