//! Wall-clock timers and named time accumulators.

use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Misuse of a [`Timer`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    #[error("Timer is running. Use stop() to stop it")]
    AlreadyRunning,

    #[error("Timer is not running. Use start() to start it")]
    NotRunning,
}

/// Split `seconds` into whole hours, minutes and seconds.
///
/// Seconds are rounded before splitting, so 59.6 s becomes 1 minute rather
/// than "60 seconds".
pub fn split_hms(seconds: f64) -> (u64, u64, u64) {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    (total / 3600, (total % 3600) / 60, total % 60)
}

/// Render `seconds` as `"hh h mm m ss s"`.
pub fn format_hms(seconds: f64) -> String {
    let (hh, mm, ss) = split_hms(seconds);
    format!("{:02} h {:02} m {:02} s", hh, mm, ss)
}

/// A start/stop stopwatch.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    name: Option<String>,
    started: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timer whose elapsed time is accumulated under `name` when stopped
    /// through a [`TimingContext`].
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            started: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn start(&mut self) -> Result<(), TimerError> {
        if self.started.is_some() {
            return Err(TimerError::AlreadyRunning);
        }
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Stop and return the elapsed time.
    pub fn stop(&mut self) -> Result<Duration, TimerError> {
        let started = self.started.take().ok_or(TimerError::NotRunning)?;
        let elapsed = started.elapsed();
        tracing::debug!(
            "{} elapsed time: {}",
            self.name.as_deref().unwrap_or("Timer"),
            format_hms(elapsed.as_secs_f64())
        );
        Ok(elapsed)
    }
}

/// Named accumulators of elapsed time for one job.
///
/// Entries keep the order in which they were first recorded.
#[derive(Debug, Clone, Default)]
pub struct TimingContext {
    entries: Vec<(String, Duration)>,
}

impl TimingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `elapsed` to the accumulator `name`.
    pub fn record(&mut self, name: &str, elapsed: Duration) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, total)) => *total += elapsed,
            None => self.entries.push((name.to_string(), elapsed)),
        }
    }

    /// Stop `timer` and accumulate its time if it is named.
    pub fn stop(&mut self, timer: &mut Timer) -> Result<Duration, TimerError> {
        let elapsed = timer.stop()?;
        if let Some(name) = timer.name.clone() {
            self.record(&name, elapsed);
        }
        Ok(elapsed)
    }

    /// Run `f` and accumulate its wall time under `name`.
    pub fn time<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(name, start.elapsed());
        out
    }

    pub fn total(&self, name: &str) -> Option<Duration> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, total)| *total)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), *d))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log every accumulator at `info`.
    pub fn report(&self) {
        for (name, total) in self.iter() {
            tracing::info!("{:<12} {}", name, format_hms(total.as_secs_f64()));
        }
    }
}

impl fmt::Display for TimingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, total)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, format_hms(total.as_secs_f64()))?;
        }
        Ok(())
    }
}
