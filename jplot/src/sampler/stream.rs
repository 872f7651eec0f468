//! Read a stream of JSON documents.
//!
//! Documents are separated by whitespace, typically one per line, and each is
//! ingested as soon as it is complete. Input that is not valid JSON records a
//! gap in every field and is skipped through the end of the line holding the
//! error. Leftovers of that document which fail to decode afterwards are
//! skipped without further gaps. The stream ending is a normal termination.

use std::{fmt, time::Instant};

use bytes::{Buf, BytesMut};
use metrics::counter;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::dash::Dash;

/// Pending input beyond which an unfinished document is abandoned.
const MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;
const READ_CAPACITY: usize = 64 * 1024;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Stream`]
pub enum Error {
    /// Reading the input failed.
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// The streaming sampler.
pub struct Stream<R> {
    reader: R,
    dash: Dash,
    buffer: BytesMut,
    /// Input is dropped through the next newline.
    resync: bool,
    /// Set by a failure and cleared by the next decoded document.
    recovering: bool,
}

impl<R> fmt::Debug for Stream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("dash", &self.dash)
            .field("pending", &self.buffer.len())
            .field("resync", &self.resync)
            .field("recovering", &self.recovering)
            .finish_non_exhaustive()
    }
}

impl<R> Stream<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a new [`Stream`] reading documents from `reader`.
    #[must_use]
    pub fn new(reader: R, dash: Dash) -> Self {
        Self {
            reader,
            dash,
            buffer: BytesMut::with_capacity(READ_CAPACITY),
            resync: false,
            recovering: false,
        }
    }

    /// Run this [`Stream`] until its input ends.
    ///
    /// # Errors
    ///
    /// Function will return an error if reading the input fails.
    pub async fn run(mut self) -> Result<(), Error> {
        info!("reading documents from stream");
        loop {
            self.buffer.reserve(READ_CAPACITY);
            let read = self.reader.read_buf(&mut self.buffer).await?;
            let eof = read == 0;
            self.drain(eof);
            if eof {
                info!("input ended");
                return Ok(());
            }
        }
    }

    /// Ingest every complete document in the buffer. At `eof` whatever
    /// remains is final.
    fn drain(&mut self, eof: bool) {
        loop {
            if self.resync {
                match self.buffer.iter().position(|b| *b == b'\n') {
                    Some(newline) => {
                        self.buffer.advance(newline + 1);
                        self.resync = false;
                    }
                    None => {
                        self.buffer.clear();
                        return;
                    }
                }
            }

            let leading = self
                .buffer
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            self.buffer.advance(leading);
            if self.buffer.is_empty() {
                return;
            }

            let (next, consumed) = {
                let mut documents =
                    serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
                let next = documents.next();
                (next, documents.byte_offset())
            };

            match next {
                None => {
                    self.buffer.clear();
                    return;
                }
                Some(Ok(document)) => {
                    // A number running to the end of the buffer may still be
                    // growing.
                    if !eof && consumed == self.buffer.len() && document.is_number() {
                        return;
                    }
                    self.buffer.advance(consumed);
                    self.recovering = false;
                    debug!("decoded document of {consumed} bytes");
                    counter!("sampler.documents").increment(1);
                    self.dash.ingest(Some(&document), Instant::now());
                }
                Some(Err(err)) if err.is_eof() => {
                    if eof {
                        self.fail(&format_args!("input ended inside a document: {err}"));
                        self.buffer.clear();
                    } else if self.buffer.len() > MAX_PENDING_BYTES {
                        self.fail(&format_args!(
                            "abandoning unfinished document after {len} bytes",
                            len = self.buffer.len()
                        ));
                        self.buffer.clear();
                        self.resync = true;
                    }
                    return;
                }
                Some(Err(err)) => {
                    self.fail(&err);
                    match end_of_line(&self.buffer, err.line()) {
                        Some(end) => self.buffer.advance(end),
                        None => {
                            self.buffer.clear();
                            self.resync = true;
                        }
                    }
                }
            }
        }
    }

    fn fail(&mut self, err: &dyn fmt::Display) {
        if self.recovering {
            debug!("skipping remains of a failed document: {err}");
            return;
        }
        warn!("failed to decode document: {err}");
        self.recovering = true;
        counter!("sampler.failures", "reason" => "decode").increment(1);
        self.dash.ingest(None, Instant::now());
    }
}

/// Offset just past the newline ending `line`, counted from 1, of `buffer`.
fn end_of_line(buffer: &[u8], line: usize) -> Option<usize> {
    buffer
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .nth(line.saturating_sub(1))
        .map(|(idx, _)| idx + 1)
}
