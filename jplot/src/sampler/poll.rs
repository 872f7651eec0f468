//! Poll a URL for JSON documents.
//!
//! Every interval a GET is issued against the configured URL. The response
//! body must be a single JSON object or array. Request failures, error
//! statuses and undecodable bodies record a gap in every field and polling
//! continues on the next tick.

use std::time::Duration;

use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dash::Dash;

/// Poll interval used when none is configured.
pub const DEFAULT_INTERVAL_MILLISECONDS: u64 = 1_000;

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_MILLISECONDS
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Poll`]
pub enum Error {
    /// The configured URL is not a usable http(s) URL.
    #[error("invalid url '{url}': {reason}")]
    Url {
        /// The configured URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The poll interval was zero.
    #[error("poll interval must be at least one millisecond")]
    ZeroInterval,
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration for [`Poll`]
pub struct Config {
    /// URL to fetch documents from
    pub url: String,
    /// Time between fetches, in milliseconds. Counter rates are computed from
    /// the actual tick times.
    #[serde(default = "default_interval")]
    pub interval_milliseconds: u64,
}

/// The polling sampler.
#[derive(Debug)]
pub struct Poll {
    url: reqwest::Url,
    interval: Duration,
    client: reqwest::Client,
    dash: Dash,
    shutdown: jplot_signal::Watcher,
}

impl Poll {
    /// Create a new [`Poll`] instance.
    ///
    /// # Errors
    ///
    /// Function will return an error if the URL does not parse or is not
    /// http(s), if the interval is zero or if the HTTP client cannot be built.
    pub fn new(config: Config, dash: Dash, shutdown: jplot_signal::Watcher) -> Result<Self, Error> {
        let url = reqwest::Url::parse(&config.url).map_err(|err| Error::Url {
            url: config.url.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Url {
                url: config.url,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        if config.interval_milliseconds == 0 {
            return Err(Error::ZeroInterval);
        }
        let interval = Duration::from_millis(config.interval_milliseconds);

        // A fetch may not outlive its tick.
        let client = reqwest::Client::builder().timeout(interval).build()?;

        Ok(Self {
            url,
            interval,
            client,
            dash,
            shutdown,
        })
    }

    /// Run this [`Poll`] until shutdown is signaled.
    ///
    /// # Errors
    ///
    /// None are known. Failed fetches are recorded as gaps.
    pub async fn run(self) -> Result<(), Error> {
        info!(
            "polling {url} every {interval:?}",
            url = self.url,
            interval = self.interval
        );

        let shutdown_wait = self.shutdown.recv();
        tokio::pin!(shutdown_wait);

        let mut poll = time::interval(self.interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                tick = poll.tick() => {
                    let document = fetch(&self.client, &self.url).await;
                    self.dash.ingest(document.as_ref(), tick.into_std());
                }
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

pub(crate) async fn fetch(client: &reqwest::Client, url: &reqwest::Url) -> Option<Value> {
    let resp = match client.get(url.clone()).send().await {
        Ok(resp) => resp,
        Err(err) => {
            warn!("failed to fetch {url}: {err}");
            counter!("sampler.failures", "reason" => "fetch").increment(1);
            return None;
        }
    };

    let status = resp.status();
    if !status.is_success() {
        warn!("fetch of {url} returned {status}");
        counter!("sampler.failures", "reason" => "fetch").increment(1);
        return None;
    }

    let body = match resp.bytes().await {
        Ok(body) => body,
        Err(err) => {
            warn!("failed to read body from {url}: {err}");
            counter!("sampler.failures", "reason" => "fetch").increment(1);
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&body) {
        Ok(document @ (Value::Object(_) | Value::Array(_))) => {
            debug!("fetched {len} byte document from {url}", len = body.len());
            counter!("sampler.documents").increment(1);
            Some(document)
        }
        Ok(_) => {
            warn!("response from {url} is not a JSON object or array");
            counter!("sampler.failures", "reason" => "decode").increment(1);
            None
        }
        Err(err) => {
            warn!("failed to decode response from {url}: {err}");
            counter!("sampler.failures", "reason" => "decode").increment(1);
            None
        }
    }
}
