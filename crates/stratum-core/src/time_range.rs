//! Translates a task's look-back window, stored watermark and explicit
//! user bounds into the inclusive date range an extract task iterates
//! batch-by-batch.
//!
//! Grounded on `original_source/src/blazel/tasks.py` (`TimeRange`).

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{OrchestratorError, Result};

/// Sentinel bound used when no start date is known at all — wide
/// enough to include any real extraction history.
pub const MIN_START_STR: &str = "1900-01-01T00:00:00";
/// Sentinel bound used when no end date is known at all.
pub const MAX_END_STR: &str = "2100-12-31T23:59:59";

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// An inclusive `[start, end]` date range, each bound either a bare
/// date (`YYYY-MM-DD`) or a full `YYYY-MM-DDTHH:MM:SS` timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TimeRange {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        TimeRange { start, end }
    }

    /// Resolve the start bound for an extract task: an explicit
    /// `options.start` always wins; otherwise, when the table tracks a
    /// `timestamp_field` watermark, fall back to the last recorded
    /// value (the caller has already fetched it, since that lookup is
    /// I/O and this planner stays pure).
    pub fn from_task(
        options_start: Option<String>,
        options_end: Option<String>,
        has_timestamp_field: bool,
        latest_timestamp: Option<String>,
    ) -> Self {
        let start = options_start.or_else(|| {
            if has_timestamp_field {
                latest_timestamp
            } else {
                None
            }
        });
        TimeRange { start, end: options_end }
    }

    pub fn start_str(&self) -> String {
        self.start.clone().unwrap_or_else(|| MIN_START_STR.to_string())
    }

    pub fn end_str(&self) -> String {
        self.end.clone().unwrap_or_else(|| MAX_END_STR.to_string())
    }

    /// Midnight of the start bound, expanding a bare date to
    /// `T00:00:00`.
    pub fn start_datetime(&self) -> Result<NaiveDateTime> {
        parse_datetime(&self.start_str(), "T00:00:00")
    }

    /// End of day of the end bound, expanding a bare date to
    /// `T23:59:59`.
    pub fn end_datetime(&self) -> Result<NaiveDateTime> {
        parse_datetime(&self.end_str(), "T23:59:59")
    }

    /// Number of batches (inclusive day span) spanned by this range.
    /// Both bounds must be set explicitly — unlike `start_str`/
    /// `end_str`, this does not fall back to the sentinel values.
    pub fn batch_count(&self) -> Result<i64> {
        let start = self
            .start
            .as_ref()
            .ok_or_else(|| OrchestratorError::InvalidRange("time range has no start date".into()))?;
        let end = self
            .end
            .as_ref()
            .ok_or_else(|| OrchestratorError::InvalidRange("time range has no end date".into()))?;
        let start_date = parse_date(start)?;
        let end_date = parse_date(end)?;
        Ok((end_date - start_date).num_days() + 1)
    }

    /// The calendar date of batch `index` (0-based), counting forward
    /// from the start bound. Errors if it would run past the end
    /// bound.
    pub fn batch_date(&self, index: i64) -> Result<NaiveDate> {
        let start = self
            .start
            .as_ref()
            .ok_or_else(|| OrchestratorError::InvalidRange("time range has no start date".into()))?;
        let end = self
            .end
            .as_ref()
            .ok_or_else(|| OrchestratorError::InvalidRange("time range has no end date".into()))?;
        let start_date = parse_date(start)?;
        let end_date = parse_date(end)?;
        let batch_date = start_date + chrono::Duration::days(index);
        if batch_date > end_date {
            return Err(OrchestratorError::InvalidRange(format!(
                "batch {index} date {batch_date} falls after range end {end_date}"
            )));
        }
        Ok(batch_date)
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    let date_part = &value[..value.len().min(10)];
    NaiveDate::parse_from_str(date_part, DATE_FORMAT).map_err(|_| OrchestratorError::InvalidDateFormat {
        value: value.to_string(),
        required_format: DATE_FORMAT,
    })
}

fn parse_datetime(value: &str, suffix_if_date_only: &str) -> Result<NaiveDateTime> {
    if value.len() == 10 {
        let full = format!("{value}{suffix_if_date_only}");
        NaiveDateTime::parse_from_str(&full, DATETIME_FORMAT).map_err(|_| OrchestratorError::InvalidDateFormat {
            value: value.to_string(),
            required_format: DATETIME_FORMAT,
        })
    } else {
        NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).map_err(|_| OrchestratorError::InvalidDateFormat {
            value: value.to_string(),
            required_format: DATETIME_FORMAT,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_bounds_fall_back_to_sentinels() {
        let range = TimeRange::default();
        assert_eq!(range.start_str(), MIN_START_STR);
        assert_eq!(range.end_str(), MAX_END_STR);
    }

    #[test]
    fn from_task_prefers_explicit_start_over_watermark() {
        let range = TimeRange::from_task(
            Some("2026-01-01".to_string()),
            None,
            true,
            Some("2025-06-01T00:00:00".to_string()),
        );
        assert_eq!(range.start.as_deref(), Some("2026-01-01"));
    }

    #[test]
    fn from_task_falls_back_to_watermark_when_tracked() {
        let range = TimeRange::from_task(None, None, true, Some("2025-06-01T00:00:00".to_string()));
        assert_eq!(range.start.as_deref(), Some("2025-06-01T00:00:00"));
    }

    #[test]
    fn from_task_ignores_watermark_when_not_tracked() {
        let range = TimeRange::from_task(None, None, false, Some("2025-06-01T00:00:00".to_string()));
        assert_eq!(range.start, None);
    }

    #[test]
    fn batch_count_is_inclusive() {
        let range = TimeRange::new(Some("2026-01-01".into()), Some("2026-01-03".into()));
        assert_eq!(range.batch_count().unwrap(), 3);
    }

    #[test]
    fn batch_count_single_day() {
        let range = TimeRange::new(Some("2026-01-01".into()), Some("2026-01-01".into()));
        assert_eq!(range.batch_count().unwrap(), 1);
    }

    #[test]
    fn batch_count_requires_both_bounds() {
        let range = TimeRange::new(Some("2026-01-01".into()), None);
        assert!(range.batch_count().is_err());
    }

    #[test]
    fn batch_date_advances_from_start() {
        let range = TimeRange::new(Some("2026-01-01".into()), Some("2026-01-05".into()));
        assert_eq!(range.batch_date(2).unwrap(), NaiveDate::from_ymd_opt(2026, 1, 3).unwrap());
    }

    #[test]
    fn batch_date_past_end_is_an_error() {
        let range = TimeRange::new(Some("2026-01-01".into()), Some("2026-01-02".into()));
        assert!(range.batch_date(5).is_err());
    }

    #[test]
    fn date_only_bounds_expand_to_day_edges() {
        let range = TimeRange::new(Some("2026-01-01".into()), Some("2026-01-01".into()));
        assert_eq!(range.start_datetime().unwrap().format("%H:%M:%S").to_string(), "00:00:00");
        assert_eq!(range.end_datetime().unwrap().format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn invalid_date_reports_required_format() {
        let range = TimeRange::new(Some("not-a-date".into()), Some("2026-01-01".into()));
        let err = range.batch_count().unwrap_err();
        match err {
            OrchestratorError::InvalidDateFormat { required_format, .. } => {
                assert_eq!(required_format, DATE_FORMAT);
            }
            other => panic!("expected InvalidDateFormat, got {other:?}"),
        }
    }
}
