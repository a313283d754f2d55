//! Logging setup.
//!
//! Every formatted event passes through [`crate::redact::redact`] and is
//! appended to its sink as one complete line under a mutex, so lines from
//! concurrent workers never interleave.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{DeployError, Result};
use crate::redact;

/// Environment variable holding an `EnvFilter` directive, e.g. `stratus=debug`.
pub const LOG_ENV: &str = "STRATUS_LOG";

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// `MakeWriter` that redacts each event before appending it to the sink.
#[derive(Clone)]
pub struct RedactingWriter {
    sink: Sink,
}

impl RedactingWriter {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Append to `path`, creating it (and its parent directory) if needed.
    pub fn append_to_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

/// Buffers one event; the redacted line is written when the buffer drops.
pub struct EventBuffer {
    buf: Vec<u8>,
    sink: Sink,
}

impl Write for EventBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventBuffer {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buf);
        let line = redact::redact(&text);
        let mut sink = match self.sink.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Nowhere left to report a failed log write.
        let _ = sink.write_all(line.as_bytes());
        let _ = sink.flush();
    }
}

impl<'a> MakeWriter<'a> for RedactingWriter {
    type Writer = EventBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        EventBuffer {
            buf: Vec::new(),
            sink: Arc::clone(&self.sink),
        }
    }
}

/// Install the global subscriber: stderr always, plus `log_file` if given.
///
/// `STRATUS_LOG` overrides the level chosen by `debug`.
pub fn init(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    // ANSI styling would split `key=value` pairs and defeat redaction.
    let stderr_layer = fmt::layer()
        .with_writer(RedactingWriter::stderr())
        .with_ansi(false)
        .with_target(false);

    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_writer(RedactingWriter::append_to_file(path)?)
                .with_ansi(false)
                .with_target(false)
                .with_thread_names(true),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| DeployError::Config(format!("failed to install logger: {err}")))
}
