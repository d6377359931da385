//! Job cadence: how often each job kind fires and when it fires next.
//!
//! Accepted forms: `hourly`, `daily`, `weekly`, `<N>s`, `<N>m`, `<N>h`,
//! `<N>d`, or a bare number of seconds.
//!
//! The next fire time is always computed from the end of the last completed
//! run, so a slow run never causes back-to-back firing. After downtime, a
//! job whose interval fully elapsed fires exactly once; missed intervals are
//! not queued.

use chrono::{DateTime, Duration, Utc};
use salesops_core::config::ScheduleConfig;
use salesops_core::types::JobKind;

const MAX_INTERVAL_DAYS: i64 = 36_500;

/// A fixed recurring interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    every: Duration,
}

impl Cadence {
    pub fn hourly() -> Self {
        Self { every: Duration::hours(1) }
    }

    pub fn daily() -> Self {
        Self { every: Duration::days(1) }
    }

    pub fn weekly() -> Self {
        Self { every: Duration::weeks(1) }
    }

    /// An explicit interval. Zero, negative, and intervals past a century
    /// are rejected.
    pub fn every(every: Duration) -> Option<Self> {
        (every > Duration::zero() && every <= Duration::days(MAX_INTERVAL_DAYS)).then_some(Self { every })
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_lowercase();
        match raw.as_str() {
            "hourly" => return Some(Self::hourly()),
            "daily" => return Some(Self::daily()),
            "weekly" => return Some(Self::weekly()),
            _ => {}
        }

        if let Ok(secs) = raw.parse::<i64>() {
            return Self::every(Duration::try_seconds(secs)?);
        }

        let unit = raw.chars().last()?;
        let n: i64 = raw[..raw.len() - unit.len_utf8()].trim().parse().ok()?;
        let every = match unit {
            's' => Duration::try_seconds(n),
            'm' => Duration::try_minutes(n),
            'h' => Duration::try_hours(n),
            'd' => Duration::try_days(n),
            _ => return None,
        };
        Self::every(every?)
    }

    /// Resolve the configured cadence for `kind`, falling back to the
    /// kind's default when the value is not understood.
    pub fn for_job(schedule: &ScheduleConfig, kind: JobKind) -> Self {
        let raw = schedule.frequency(kind);
        Self::parse(raw).unwrap_or_else(|| {
            let fallback = ScheduleConfig::default_frequency(kind);
            tracing::warn!(
                "Invalid {kind} frequency '{raw}', using '{fallback}'"
            );
            Self::parse(fallback).unwrap_or_else(Self::daily)
        })
    }

    pub fn interval(&self) -> Duration {
        self.every
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::hourly() {
            write!(f, "hourly")
        } else if *self == Self::daily() {
            write!(f, "daily")
        } else if *self == Self::weekly() {
            write!(f, "weekly")
        } else {
            write!(f, "every {}s", self.every.num_seconds())
        }
    }
}

/// Logical schedule state for one job kind.
#[derive(Debug, Clone)]
pub struct JobSchedule {
    pub cadence: Cadence,
    /// End time of the last completed run.
    pub last_finished: Option<DateTime<Utc>>,
    /// When the job is next due.
    pub next_fire: DateTime<Utc>,
}

impl JobSchedule {
    /// Build the schedule at process start.
    ///
    /// With no run on record the first fire is one interval from `now`.
    /// Otherwise it is one interval after the last run ended; if that is
    /// already in the past the job is due immediately (a single catch-up).
    pub fn new(cadence: Cadence, last_finished: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let next_fire = match last_finished {
            Some(end) => (end + cadence.interval()).max(now),
            None => now + cadence.interval(),
        };
        Self {
            cadence,
            last_finished,
            next_fire,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_fire
    }

    /// Record a completed run and push the next fire time out.
    pub fn record_completion(&mut self, finished_at: DateTime<Utc>) {
        self.last_finished = Some(finished_at);
        self.next_fire = finished_at + self.cadence.interval();
    }
}
