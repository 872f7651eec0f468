//! Feed documents into the dashboard.
//!
//! The sampler is the producer half of jplot. It obtains JSON documents either
//! by polling a URL on an interval or by reading a stream of documents, and
//! hands each one to [`Dash::ingest`]. Both strategies tolerate failed samples
//! by recording gaps and carrying on.

use serde::Deserialize;
use tokio::io::AsyncRead;

use crate::dash::Dash;

pub mod poll;
pub mod stream;

/// Errors produced by [`Sampler`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// See [`crate::sampler::poll::Error`] for details.
    #[error(transparent)]
    Poll(#[from] poll::Error),
    /// See [`crate::sampler::stream::Error`] for details.
    #[error(transparent)]
    Stream(#[from] stream::Error),
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Sampler`]
pub enum Config {
    /// See [`crate::sampler::poll::Config`] for details.
    Poll(poll::Config),
    /// Read newline or whitespace separated documents from stdin.
    #[default]
    Stream,
}

/// The sampler.
#[derive(Debug)]
pub enum Sampler {
    /// See [`crate::sampler::poll::Poll`] for details.
    Poll(poll::Poll),
    /// See [`crate::sampler::stream::Stream`] for details.
    Stream(stream::Stream<Box<dyn AsyncRead + Send + Unpin>>),
}

impl Sampler {
    /// Create a new [`Sampler`] instance.
    ///
    /// Stream mode reads standard input. `shutdown` stops poll mode between
    /// ticks, stream mode runs until its input ends.
    ///
    /// # Errors
    ///
    /// Function will return an error if the poll configuration is invalid.
    pub fn new(
        config: Config,
        dash: Dash,
        shutdown: jplot_signal::Watcher,
    ) -> Result<Self, Error> {
        match config {
            Config::Poll(conf) => Ok(Self::Poll(poll::Poll::new(conf, dash, shutdown)?)),
            Config::Stream => Ok(Self::from_reader(tokio::io::stdin(), dash)),
        }
    }

    /// Create a stream mode [`Sampler`] reading from `reader`.
    #[must_use]
    pub fn from_reader<R>(reader: R, dash: Dash) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::Stream(stream::Stream::new(Box::new(reader), dash))
    }

    /// Run this [`Sampler`] to completion.
    ///
    /// Poll mode returns once shutdown is signaled. Stream mode returns once
    /// its input ends.
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying strategy cannot
    /// continue.
    pub async fn run(self) -> Result<(), Error> {
        match self {
            Sampler::Poll(inner) => inner.run().await.map_err(Error::Poll),
            Sampler::Stream(inner) => inner.run().await.map_err(Error::Stream),
        }
    }
}
