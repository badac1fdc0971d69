use std::io;

use tally_metrics::Event;

/// An error delivering a batch of events.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Writing to the output failed.
    #[error("failed to write events")]
    Io(#[from] io::Error),
    /// The HTTP request could not be sent.
    #[error("failed to send events")]
    Http(#[from] reqwest::Error),
    /// The receiving server rejected the request.
    #[error("unexpected response status {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body, if any.
        body: String,
    },
    /// The events could not be encoded.
    #[error("failed to encode events")]
    Encode(#[from] serde_json::Error),
}

/// The destination of a [`ThreadedListener`](crate::ThreadedListener).
///
/// Sinks run on the listener's worker thread and may block. A failed batch is logged and counted
/// by the listener, and the next batch is delivered regardless.
pub trait Sink: Send + 'static {
    /// A short name used in logs and thread names.
    fn name(&self) -> &'static str;

    /// Delivers a batch of events.
    fn deliver(&mut self, events: &[Event]) -> Result<(), SinkError>;

    /// Flushes buffered output before the listener stops.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
