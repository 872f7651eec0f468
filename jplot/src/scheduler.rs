//! Draw the dashboard on a fixed cadence.
//!
//! The scheduler is the consumer half of jplot. Once per period it sizes the
//! canvas to the terminal, renders a snapshot of the dashboard and draws it.
//! Every [`CLEANUP_EVERY`] frames the terminal scrollback is dropped first. On
//! shutdown one last frame is drawn so the screen shows the latest data.

use std::time::Duration;

use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::{
    dash::Dash,
    render,
    screen::{self, Screen},
};

/// Frames between scrollback clears.
pub const CLEANUP_EVERY: u64 = 120;
const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Scheduler`]
pub enum Error {
    /// The terminal could not be sized or written.
    #[error(transparent)]
    Screen(#[from] screen::Error),
    /// A frame could not be rendered.
    #[error(transparent)]
    Render(#[from] render::Error),
}

/// The render scheduler.
#[derive(Debug)]
pub struct Scheduler<S> {
    dash: Dash,
    screen: S,
    shutdown: jplot_signal::Watcher,
    period: Duration,
}

impl<S> Scheduler<S>
where
    S: Screen,
{
    /// Create a new [`Scheduler`] drawing `dash` on `screen` once a second.
    #[must_use]
    pub fn new(dash: Dash, screen: S, shutdown: jplot_signal::Watcher) -> Self {
        Self {
            dash,
            screen,
            shutdown,
            period: DEFAULT_PERIOD,
        }
    }

    /// Draw once per `period` instead.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Run this [`Scheduler`] until shutdown is signaled.
    ///
    /// # Errors
    ///
    /// Function will return an error if the terminal cannot be sized or
    /// written, or if a frame cannot be rendered.
    pub async fn run(self) -> Result<(), Error> {
        let Self {
            dash,
            mut screen,
            shutdown,
            period,
        } = self;

        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);

        screen.prepare()?;
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        frame(&dash, &mut screen)?;
        let mut since_cleanup: u64 = 1;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    since_cleanup += 1;
                    if since_cleanup == CLEANUP_EVERY {
                        debug!("clearing scrollback");
                        screen.clear_scrollback()?;
                        since_cleanup = 0;
                    }
                    frame(&dash, &mut screen)?;
                }
                () = &mut shutdown_wait => {
                    info!("shutdown signal received, drawing final frame");
                    frame(&dash, &mut screen)?;
                    return Ok(());
                }
            }
        }
    }
}

fn frame<S: Screen>(dash: &Dash, screen: &mut S) -> Result<(), Error> {
    let geometry = screen.size()?;
    let png = dash.render(geometry.canvas())?;
    screen.draw(&png)?;
    counter!("scheduler.frames").increment(1);
    Ok(())
}
