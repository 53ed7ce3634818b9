//! Recurring Schedules
//!
//! Resolves schedule definitions into concrete occurrence times. Four
//! kinds are supported:
//!
//! - **Cron**: a small cron subset (`@hourly`, `@daily`, `@weekly`, and
//!   `*/n * * * *` minute steps)
//! - **Ceremony**: dates looked up from an injected ceremony calendar;
//!   occurrences fire at maximum priority with the ceremony flag set
//! - **MoonPhase**: new or full moon, from synodic-month arithmetic
//! - **Seasonal**: solstice and equinox anchor dates
//!
//! A schedule whose lookup fails is skipped for that tick and logged, it
//! never takes down the polling loop.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::job::{JobOptions, MAX_PRIORITY};
use crate::error::{Error, Result};

/// Mean synodic month in days
const SYNODIC_MONTH_DAYS: f64 = 29.530588853;

/// Reference new moon: 2000-01-06 18:14 UTC
fn reference_new_moon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 6, 18, 14, 0).unwrap()
}

/// Moon phase a schedule can anchor to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoonPhase {
    New,
    Full,
}

/// Seasonal anchor dates (northern-hemisphere naming)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeasonMarker {
    SpringEquinox,
    SummerSolstice,
    AutumnEquinox,
    WinterSolstice,
}

impl SeasonMarker {
    fn month_day(&self) -> (u32, u32) {
        match self {
            SeasonMarker::SpringEquinox => (3, 20),
            SeasonMarker::SummerSolstice => (6, 21),
            SeasonMarker::AutumnEquinox => (9, 22),
            SeasonMarker::WinterSolstice => (12, 21),
        }
    }
}

/// Kinds of recurring schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScheduleKind {
    /// Cron subset expression
    Cron(String),
    /// Named ceremony, resolved through the calendar
    Ceremony(String),
    /// Next occurrence of a moon phase
    MoonPhase(MoonPhase),
    /// Next occurrence of a seasonal marker
    Seasonal(SeasonMarker),
}

/// Source of ceremony dates. Implementations wrap whatever community
/// calendar the deployment uses.
#[async_trait]
pub trait CeremonyCalendar: Send + Sync {
    /// Upcoming occurrences for a named ceremony, soonest first
    async fn occurrences(&self, ceremony: &str) -> Result<Vec<DateTime<Utc>>>;
}

/// A registered schedule and the job template it admits
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub name: String,
    pub kind: ScheduleKind,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
    /// Next time the schedule fires; None until first resolution
    pub next_run: Option<DateTime<Utc>>,
}

/// A schedule occurrence that is due for admission
#[derive(Debug, Clone)]
pub struct DueJob {
    pub schedule: String,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
}

/// Holds registered schedules and resolves their occurrences
pub struct Scheduler {
    entries: DashMap<String, ScheduleEntry>,
    calendar: Option<std::sync::Arc<dyn CeremonyCalendar>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            calendar: None,
        }
    }

    pub fn with_calendar(calendar: std::sync::Arc<dyn CeremonyCalendar>) -> Self {
        Self {
            entries: DashMap::new(),
            calendar: Some(calendar),
        }
    }

    /// Register a schedule. Replaces any previous schedule of the same name.
    pub fn register(
        &self,
        name: impl Into<String>,
        kind: ScheduleKind,
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
    ) {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            ScheduleEntry {
                name,
                kind,
                queue: queue.into(),
                job_type: job_type.into(),
                payload,
                options,
                next_run: None,
            },
        );
    }

    /// Remove a schedule
    pub fn remove(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Number of registered schedules
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect schedules due at `now`, advancing their next-run times.
    /// Ceremony occurrences are admitted at maximum priority with the
    /// ceremony flag forced on. A schedule that fails to resolve is logged
    /// and skipped for this tick.
    pub async fn poll_due(&self, now: DateTime<Utc>) -> Vec<DueJob> {
        let names: Vec<String> = self.entries.iter().map(|e| e.name.clone()).collect();
        let mut due = Vec::new();

        for name in names {
            let Some(entry) = self.entries.get(&name).map(|e| e.clone()) else {
                continue;
            };

            let next = match entry.next_run {
                Some(next) => next,
                None => match self.resolve_next(&entry, now).await {
                    Ok(next) => {
                        if let Some(mut e) = self.entries.get_mut(&name) {
                            e.next_run = Some(next);
                        }
                        next
                    }
                    Err(e) => {
                        tracing::warn!(schedule = %name, error = %e, "schedule resolution failed, skipping tick");
                        continue;
                    }
                },
            };

            if next > now {
                continue;
            }

            let mut options = entry.options.clone();
            if matches!(entry.kind, ScheduleKind::Ceremony(_)) {
                options.priority = MAX_PRIORITY;
                options.ceremony_related = true;
            }
            due.push(DueJob {
                schedule: entry.name.clone(),
                queue: entry.queue.clone(),
                job_type: entry.job_type.clone(),
                payload: entry.payload.clone(),
                options,
            });

            // Advance past the fired occurrence
            match self.resolve_next(&entry, now).await {
                Ok(next) => {
                    if let Some(mut e) = self.entries.get_mut(&name) {
                        e.next_run = Some(next);
                    }
                }
                Err(e) => {
                    tracing::warn!(schedule = %name, error = %e, "failed to advance schedule");
                    if let Some(mut e) = self.entries.get_mut(&name) {
                        e.next_run = None;
                    }
                }
            }
        }

        due
    }

    /// Next occurrence strictly after `after`
    pub async fn resolve_next(
        &self,
        entry: &ScheduleEntry,
        after: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        match &entry.kind {
            ScheduleKind::Cron(expr) => next_cron(expr, after).ok_or_else(|| {
                Error::ScheduleResolution {
                    name: entry.name.clone(),
                    reason: format!("unsupported cron expression: {}", expr),
                }
            }),
            ScheduleKind::Ceremony(ceremony) => {
                let calendar = self.calendar.as_ref().ok_or_else(|| {
                    Error::ScheduleResolution {
                        name: entry.name.clone(),
                        reason: "no ceremony calendar configured".to_string(),
                    }
                })?;
                let occurrences =
                    calendar
                        .occurrences(ceremony)
                        .await
                        .map_err(|e| Error::ScheduleResolution {
                            name: entry.name.clone(),
                            reason: e.to_string(),
                        })?;
                occurrences
                    .into_iter()
                    .find(|t| *t > after)
                    .ok_or_else(|| Error::ScheduleResolution {
                        name: entry.name.clone(),
                        reason: format!("no upcoming occurrence for ceremony {}", ceremony),
                    })
            }
            ScheduleKind::MoonPhase(phase) => Ok(next_moon_phase(*phase, after)),
            ScheduleKind::Seasonal(marker) => Ok(next_season_marker(*marker, after)),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Occurrence arithmetic
// =============================================================================

/// Cron subset: `@hourly`, `@daily`, `@weekly`, and `*/n * * * *`
fn next_cron(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let truncated = after
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))?;

    match expr.trim() {
        "@hourly" => {
            let top = truncated.with_minute(0)?;
            Some(if top > after { top } else { top + Duration::hours(1) })
        }
        "@daily" => {
            let midnight = truncated.with_minute(0)?.with_hour(0)?;
            Some(if midnight > after {
                midnight
            } else {
                midnight + Duration::days(1)
            })
        }
        "@weekly" => {
            // Fires Sunday midnight
            let midnight = truncated.with_minute(0)?.with_hour(0)?;
            let days_back = after.weekday().num_days_from_sunday() as i64;
            let sunday = midnight - Duration::days(days_back);
            Some(if sunday > after {
                sunday
            } else {
                sunday + Duration::weeks(1)
            })
        }
        other => {
            let fields: Vec<&str> = other.split_whitespace().collect();
            if fields.len() != 5 || fields[1..] != ["*", "*", "*", "*"] {
                return None;
            }
            let step: i64 = fields[0].strip_prefix("*/")?.parse().ok()?;
            if step == 0 || step > 59 {
                return None;
            }
            let minute = truncated.minute() as i64;
            let next_minute = ((minute / step) + 1) * step;
            Some(truncated + Duration::minutes(next_minute - minute))
        }
    }
}

/// Next new or full moon strictly after `after`
fn next_moon_phase(phase: MoonPhase, after: DateTime<Utc>) -> DateTime<Utc> {
    let reference = reference_new_moon();
    let offset = match phase {
        MoonPhase::New => 0.0,
        MoonPhase::Full => 0.5,
    };
    let elapsed_days = (after - reference).num_seconds() as f64 / 86_400.0;
    let mut cycles = (elapsed_days / SYNODIC_MONTH_DAYS - offset).floor() + 1.0;
    loop {
        let next_days = (cycles + offset) * SYNODIC_MONTH_DAYS;
        let next = reference + Duration::seconds((next_days * 86_400.0) as i64);
        // Second truncation can land the candidate on `after` itself
        if next > after {
            return next;
        }
        cycles += 1.0;
    }
}

/// Next seasonal anchor strictly after `after`
fn next_season_marker(marker: SeasonMarker, after: DateTime<Utc>) -> DateTime<Utc> {
    let (month, day) = marker.month_day();
    let this_year = Utc
        .with_ymd_and_hms(after.year(), month, day, 0, 0, 0)
        .single()
        .unwrap_or(after);
    if this_year > after {
        this_year
    } else {
        Utc.with_ymd_and_hms(after.year() + 1, month, day, 0, 0, 0)
            .single()
            .unwrap_or(after)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_cron_hourly() {
        let next = next_cron("@hourly", at(2025, 6, 1, 10, 30)).unwrap();
        assert_eq!(next, at(2025, 6, 1, 11, 0));
    }

    #[test]
    fn test_cron_daily() {
        let next = next_cron("@daily", at(2025, 6, 1, 10, 30)).unwrap();
        assert_eq!(next, at(2025, 6, 2, 0, 0));
    }

    #[test]
    fn test_cron_minute_step() {
        let next = next_cron("*/15 * * * *", at(2025, 6, 1, 10, 20)).unwrap();
        assert_eq!(next, at(2025, 6, 1, 10, 30));
    }

    #[test]
    fn test_cron_rejects_unsupported() {
        assert!(next_cron("0 0 1 * *", at(2025, 6, 1, 0, 0)).is_none());
        assert!(next_cron("garbage", at(2025, 6, 1, 0, 0)).is_none());
        assert!(next_cron("*/0 * * * *", at(2025, 6, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_full_moon_is_roughly_a_synodic_month_apart() {
        let first = next_moon_phase(MoonPhase::Full, at(2025, 1, 1, 0, 0));
        let second = next_moon_phase(MoonPhase::Full, first);
        assert!(first > at(2025, 1, 1, 0, 0));
        assert!(second > first);
        let gap_days = (second - first).num_seconds() as f64 / 86_400.0;
        assert!((gap_days - SYNODIC_MONTH_DAYS).abs() < 0.01);
    }

    #[test]
    fn test_new_and_full_alternate() {
        let start = at(2025, 3, 1, 0, 0);
        let new = next_moon_phase(MoonPhase::New, start);
        let full = next_moon_phase(MoonPhase::Full, start);
        let half = SYNODIC_MONTH_DAYS / 2.0 * 86_400.0;
        let gap = (new - full).num_seconds().unsigned_abs() as f64;
        assert!((gap - half).abs() < 3600.0);
    }

    #[test]
    fn test_seasonal_rolls_to_next_year() {
        let next = next_season_marker(SeasonMarker::SpringEquinox, at(2025, 6, 1, 0, 0));
        assert_eq!(next, at(2026, 3, 20, 0, 0));

        let next = next_season_marker(SeasonMarker::WinterSolstice, at(2025, 6, 1, 0, 0));
        assert_eq!(next, at(2025, 12, 21, 0, 0));
    }

    struct FixedCalendar {
        when: DateTime<Utc>,
    }

    #[async_trait]
    impl CeremonyCalendar for FixedCalendar {
        async fn occurrences(&self, _ceremony: &str) -> Result<Vec<DateTime<Utc>>> {
            Ok(vec![self.when])
        }
    }

    struct BrokenCalendar;

    #[async_trait]
    impl CeremonyCalendar for BrokenCalendar {
        async fn occurrences(&self, _ceremony: &str) -> Result<Vec<DateTime<Utc>>> {
            Err(Error::Internal("calendar unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_ceremony_due_forces_max_priority() {
        let now = Utc::now();
        let scheduler = Scheduler::with_calendar(std::sync::Arc::new(FixedCalendar {
            when: now + Duration::seconds(10),
        }));
        scheduler.register(
            "harvest",
            ScheduleKind::Ceremony("harvest-festival".to_string()),
            "ceremonies",
            "prepare",
            json!({}),
            JobOptions {
                priority: 3,
                ..Default::default()
            },
        );

        // First poll resolves next_run, second poll past it fires
        scheduler.poll_due(now).await;
        let due = scheduler.poll_due(now + Duration::seconds(20)).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].options.priority, MAX_PRIORITY);
        assert!(due[0].options.ceremony_related);
    }

    #[tokio::test]
    async fn test_broken_calendar_skips_without_firing() {
        let scheduler = Scheduler::with_calendar(std::sync::Arc::new(BrokenCalendar));
        scheduler.register(
            "broken",
            ScheduleKind::Ceremony("x".to_string()),
            "q",
            "t",
            json!({}),
            JobOptions::default(),
        );

        let due = scheduler.poll_due(Utc::now()).await;
        assert!(due.is_empty());
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_cron_schedule_fires_when_due() {
        let scheduler = Scheduler::new();
        scheduler.register(
            "hourly-report",
            ScheduleKind::Cron("@hourly".to_string()),
            "reports",
            "generate",
            json!({}),
            JobOptions::default(),
        );

        // Resolve next_run first, then poll past it
        let now = Utc::now();
        scheduler.poll_due(now).await;
        let due = scheduler.poll_due(now + Duration::hours(2)).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].queue, "reports");
    }
}
