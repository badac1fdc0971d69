use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tally_metrics::Event;

use crate::sink::{Sink, SinkError};

/// Replaces characters with a meaning in Graphite paths or the plaintext protocol.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '.' | ' ' | '\t' | '\n' => '_',
            c => c,
        })
        .collect()
}

/// Renders a dotted path template, replacing `{tag}` segments with the event's tag values.
///
/// Returns `None` if the event lacks one of the referenced tags.
fn render(template: &str, event: &Event) -> Option<String> {
    let mut path = String::with_capacity(template.len());

    for (i, segment) in template.split('.').enumerate() {
        if i > 0 {
            path.push('.');
        }

        match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(tag) => path.push_str(&sanitize(event.tags.get(tag)?)),
            None => path.push_str(segment),
        }
    }

    Some(path)
}

/// Writes events to a Graphite server using the plaintext protocol.
///
/// Every event becomes a line `<path> <value> <timestamp in seconds>`. Without mappings, the path
/// is the event name. With mappings, only events whose name is mapped are forwarded, and their
/// path is rendered from the mapped template. A template like `servers.{host}.latency` takes the
/// `host` segment from the event's tags.
///
/// The connection is opened lazily with the first forwarded event and reopened with the next
/// batch after a write fails.
pub struct GraphiteSink {
    address: String,
    timeout: Duration,
    mappings: BTreeMap<String, String>,
    stream: Option<TcpStream>,
}

impl GraphiteSink {
    /// Creates a sink for the Graphite server at `address`, given as `host:port`.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            mappings: BTreeMap::new(),
            stream: None,
        }
    }

    /// Restricts forwarding to the mapped metric names, using the templates as paths.
    pub fn with_mappings(mut self, mappings: BTreeMap<String, String>) -> Self {
        self.mappings = mappings;
        self
    }

    /// Returns the Graphite path for `event`, or `None` if the event is not forwarded.
    pub fn path(&self, event: &Event) -> Option<String> {
        if self.mappings.is_empty() {
            return Some(event.name.clone());
        }

        render(self.mappings.get(&event.name)?, event)
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_error = None;

        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.timeout))?;
                    tally_log::debug!("connected to graphite at {addr}");
                    return Ok(stream);
                }
                Err(error) => last_error = Some(error),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address for {}", self.address),
            )
        }))
    }

    fn write_batch(&mut self, events: &[Event]) -> io::Result<()> {
        let mut lines = String::new();
        for event in events {
            if let Some(path) = self.path(event) {
                let seconds = event.timestamp / 1000;
                lines.push_str(&format!("{path} {} {seconds}\n", event.value));
            }
        }

        if lines.is_empty() {
            return Ok(());
        }

        // A failed write leaves the connection closed, the next batch reconnects.
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect()?,
        };
        stream.write_all(lines.as_bytes())?;
        stream.flush()?;

        self.stream = Some(stream);
        Ok(())
    }
}

impl Sink for GraphiteSink {
    fn name(&self) -> &'static str {
        "graphite"
    }

    fn deliver(&mut self, events: &[Event]) -> Result<(), SinkError> {
        self.write_batch(events)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(stream) = &mut self.stream {
            stream.flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for GraphiteSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphiteSink")
            .field("address", &self.address)
            .field("mappings", &self.mappings)
            .field("connected", &self.stream.is_some())
            .finish()
    }
}
