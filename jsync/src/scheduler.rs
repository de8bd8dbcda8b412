//! Interval scheduler
//!
//! Ticks on a fixed period while enabled and asks for a run once the time
//! since the last *completed* backup reaches the configured interval.

use chrono::{DateTime, Duration, Utc};
use jsync_common::validate_interval;

#[derive(Debug)]
pub struct Scheduler {
    tick: Duration,
    enabled: bool,
    interval_minutes: u32,
    next_tick: Option<DateTime<Utc>>,
    last_completed: Option<DateTime<Utc>>,
}

impl Scheduler {
    /// A disabled scheduler checking every `tick` once enabled
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            enabled: false,
            interval_minutes: 15,
            next_tick: None,
            last_completed: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn next_tick(&self) -> Option<DateTime<Utc>> {
        self.next_tick
    }

    #[allow(dead_code)]
    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        self.last_completed
    }

    /// Apply new settings and restart the tick loop
    ///
    /// Reconfiguring never triggers a run by itself; the first check happens
    /// one tick after `now`.
    pub fn configure(
        &mut self,
        enabled: bool,
        interval_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        validate_interval(interval_minutes)?;

        self.enabled = enabled;
        self.interval_minutes = interval_minutes;
        self.next_tick = enabled.then(|| now + self.tick);

        log::info!(
            "Scheduler {} (every {} minute(s))",
            if enabled { "enabled" } else { "disabled" },
            interval_minutes
        );
        Ok(())
    }

    pub fn record_completion(&mut self, at: DateTime<Utc>) {
        self.last_completed = Some(at);
    }

    /// Seed the completion timestamp, e.g. from a newly opened session
    pub fn set_last_completed(&mut self, at: Option<DateTime<Utc>>) {
        self.last_completed = at;
    }

    /// Whether enough time has passed since the last completed run
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_completed {
            None => true,
            Some(at) => now - at >= Duration::minutes(self.interval_minutes as i64),
        }
    }

    /// Process the tick at `now`, if one has elapsed
    ///
    /// Returns true when a run should be requested. Ticks missed while the
    /// caller was not polling collapse into one check.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        let Some(next) = self.next_tick else {
            return false;
        };
        if now < next {
            return false;
        }

        let tick_ms = self.tick.num_milliseconds().max(1);
        let elapsed_ticks = (now - next).num_milliseconds() / tick_ms + 1;
        self.next_tick = Some(next + Duration::milliseconds(elapsed_ticks * tick_ms));

        let due = self.is_due(now);
        if due {
            log::debug!("Scheduled backup is due");
        }
        due
    }
}
