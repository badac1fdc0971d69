use std::fmt;
use std::io::{self, Write};

use tally_metrics::Event;

use crate::sink::{Sink, SinkError};

/// Writes one line per event to a writer, standard output by default.
///
/// Lines have the form `<timestamp> <name> <tags> <value>`, with tags rendered as
/// comma-separated `key=value` pairs.
pub struct ConsoleSink {
    writer: Box<dyn Write + Send>,
}

impl ConsoleSink {
    /// Creates a sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Creates a sink writing to the given writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn deliver(&mut self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            writeln!(self.writer, "{event}")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for ConsoleSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleSink").finish_non_exhaustive()
    }
}
