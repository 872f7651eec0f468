use std::{
    env,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use jplot::{
    config::{self, Config, load_config_from_path},
    sampler::{self, Sampler, poll},
    scheduler::{self, Scheduler},
    screen::{self, ITerm, Screen},
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::{runtime::Builder, signal, time::Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "JPLOT_CONFIG";
const MAX_SHUTDOWN_DELAY: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Screen(#[from] screen::Error),
    #[error("data source failed: {0}")]
    Sampler(#[from] sampler::Error),
    #[error(transparent)]
    Scheduler(#[from] scheduler::Error),
    #[error("failed to start runtime: {0}")]
    Io(#[from] io::Error),
    #[error("render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("failed to install prometheus exporter: {0}")]
    Telemetry(#[from] BuildError),
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// URL to poll for JSON documents, documents are read from stdin when
    /// empty or absent
    #[clap(long)]
    url: Option<String>,
    /// milliseconds between polls of the URL [default: 1000]
    #[clap(long)]
    interval_milliseconds: Option<u64>,
    /// number of samples kept and plotted per field [default: 100]
    #[clap(long)]
    steps: Option<usize>,
    /// path on disk to a YAML configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// address to bind the prometheus exporter to, telemetry is not exported
    /// when absent
    #[clap(long)]
    prometheus_addr: Option<SocketAddr>,
    /// graph specifications, each `Title name=path[:marker],... [hint=value]`
    graphs: Vec<String>,
}

/// Build the configuration from, in increasing precedence, defaults, the
/// configuration file or inline `contents`, and command line flags.
fn get_config(cli: &Cli, contents: Option<String>) -> Result<Config, Error> {
    let mut config = if let Some(contents) = contents {
        debug!("Using config from env var '{CONFIG_ENV}'");
        Config::parse(&contents)?
    } else if let Some(path) = &cli.config_path {
        debug!("Attempting to open configuration file at: {}", path.display());
        load_config_from_path(path)?
    } else {
        Config::default()
    };

    if let Some(steps) = cli.steps {
        config.steps = steps;
    }
    if let Some(addr) = cli.prometheus_addr {
        config.prometheus_addr = Some(addr);
    }

    match (cli.url.as_deref(), cli.interval_milliseconds) {
        (Some(""), _) => config.source = sampler::Config::Stream,
        (Some(url), interval) => {
            let configured = match &config.source {
                sampler::Config::Poll(poll) => Some(poll.interval_milliseconds),
                sampler::Config::Stream => None,
            };
            config.source = sampler::Config::Poll(poll::Config {
                url: url.to_string(),
                interval_milliseconds: interval
                    .or(configured)
                    .unwrap_or(poll::DEFAULT_INTERVAL_MILLISECONDS),
            });
        }
        (None, Some(interval)) => match &mut config.source {
            sampler::Config::Poll(poll) => poll.interval_milliseconds = interval,
            sampler::Config::Stream => {
                warn!("--interval-milliseconds has no effect when reading from stdin");
            }
        },
        (None, None) => {}
    }

    config.graphs.extend(cli.graphs.iter().cloned());
    Ok(config)
}

async fn inner_main<S>(
    sampler: Sampler,
    scheduler: Scheduler<S>,
    shutdown_broadcast: jplot_signal::Broadcaster,
) -> Result<(), Error>
where
    S: Screen + Send + 'static,
{
    let mut scheduler_handle = tokio::spawn(scheduler.run());
    let mut sampler_handle = tokio::spawn(sampler.run());

    let res = tokio::select! {
        res = &mut sampler_handle => match res {
            Ok(Ok(())) => {
                info!("input ended");
                Ok(())
            }
            Ok(Err(err)) => {
                error!("Sampler shut down unexpectedly: {err}");
                Err(Error::Sampler(err))
            }
            Err(err) => Err(Error::Join(err)),
        },
        res = &mut scheduler_handle => {
            // The scheduler only stops on its own when it fails.
            return match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => {
                    error!("Scheduler shut down unexpectedly: {err}");
                    Err(Error::Scheduler(err))
                }
                Err(err) => Err(Error::Join(err)),
            };
        },
        _ = signal::ctrl_c() => {
            info!("received ctrl-c");
            Ok(())
        },
    };

    shutdown_broadcast.signal_and_wait().await;
    let drawn = scheduler_handle.await?;
    res.and(drawn.map_err(Error::Scheduler))
}

/// How long the runtime may take to wind down. A stdin read blocks a runtime
/// thread that cannot be interrupted, so stream mode does not wait on it.
fn shutdown_delay(source: &sampler::Config) -> Duration {
    match source {
        sampler::Config::Poll(_) => MAX_SHUTDOWN_DELAY,
        sampler::Config::Stream => Duration::ZERO,
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let config = get_config(cli, env::var(CONFIG_ENV).ok())?;
    let prometheus_addr = config.prometheus_addr;
    let (dash, source) = config.build()?;
    screen::check_support()?;
    let delay = shutdown_delay(&source);

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(async {
        if let Some(addr) = prometheus_addr {
            info!("serving telemetry for prometheus on {addr}");
            PrometheusBuilder::new().with_http_listener(addr).install()?;
        }
        let (shutdown_watcher, shutdown_broadcast) = jplot_signal::signal();
        let sampler = Sampler::new(source, dash.clone(), shutdown_watcher.clone())?;
        let scheduler = Scheduler::new(dash, ITerm::stdout(), shutdown_watcher);
        inner_main(sampler, scheduler, shutdown_broadcast).await
    });
    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        delay.as_secs(),
    );
    runtime.shutdown_timeout(delay);
    res
}

fn main() -> ExitCode {
    // stdout carries the image protocol, logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(io::stderr)
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting jplot {version}.");

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => {
            info!("Bye. :)");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let _ = writeln!(io::stderr(), "jplot: {err}");
            ExitCode::FAILURE
        }
    }
}
