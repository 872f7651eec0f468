//! This module controls configuration parsing from the end user. Every
//! configuration problem is reported here, before sampling or drawing starts.
use std::{
    fs, io,
    net::SocketAddr,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{dash::Dash, sampler, spec};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The history length was zero.
    #[error("steps must be at least 1")]
    ZeroSteps,
    /// The poll interval was zero.
    #[error("interval_milliseconds must be at least 1")]
    ZeroInterval,
    /// No graph was specified.
    #[error("no graphs specified")]
    NoGraphs,
    /// A graph specification did not compile.
    #[error("invalid graph specification: {0}")]
    Spec(#[from] spec::Error),
}

fn default_steps() -> usize {
    100
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Graph specifications, one per panel, in display order
    #[serde(default)]
    pub graphs: Vec<String>,
    /// Number of samples kept and plotted for every field
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Where documents come from
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub source: sampler::Config,
    /// Address to serve jplot's own telemetry on for prometheus scraping. No
    /// telemetry is exported when absent.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graphs: Vec::new(),
            steps: default_steps(),
            source: sampler::Config::default(),
            prometheus_addr: None,
        }
    }
}

impl Config {
    /// Parse a YAML configuration.
    ///
    /// # Errors
    ///
    /// Function will return an error if `contents` is not a valid
    /// configuration.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        serde_yaml::from_str(contents).map_err(Error::from)
    }

    /// Validate this configuration and compile its graphs into a [`Dash`].
    /// The sampler configuration is handed back for the caller to start.
    ///
    /// # Errors
    ///
    /// Function will return an error if `steps` or the poll interval is zero,
    /// if there are no graphs or if any graph fails to compile.
    pub fn build(self) -> Result<(Dash, sampler::Config), Error> {
        let steps = NonZeroUsize::new(self.steps).ok_or(Error::ZeroSteps)?;
        if matches!(&self.source, sampler::Config::Poll(poll) if poll.interval_milliseconds == 0) {
            return Err(Error::ZeroInterval);
        }
        if self.graphs.is_empty() {
            return Err(Error::NoGraphs);
        }
        let graphs = spec::compile(&self.graphs)?;
        Ok((Dash::new(graphs, steps), self.source))
    }
}

/// Load configuration from the YAML file at `path`.
///
/// # Errors
///
/// Function will return an error if the file cannot be read or does not hold
/// a valid configuration.
pub fn load_config_from_path(path: &Path) -> Result<Config, Error> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    Config::parse(&contents)
}
