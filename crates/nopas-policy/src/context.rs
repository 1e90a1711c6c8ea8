//! Per-cycle evaluation input.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};

use nopas_core::Count;

/// Everything a sub-policy may look at. Built once per cycle so that
/// all sub-policies see the same instant and the same counts.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    /// Minutes since local midnight, `0..1440`.
    pub minute_of_day: u32,
    pub weekday: Weekday,
    /// Live counts read at the start of the cycle. Resources whose read
    /// failed are absent.
    pub current_counts: BTreeMap<String, Count>,
    /// Cluster core ratio, when a source is configured and answered.
    pub core_ratio: Option<f64>,
}

impl EvaluationContext {
    pub fn at(time: DateTime<FixedOffset>) -> Self {
        Self {
            minute_of_day: time.hour() * 60 + time.minute(),
            weekday: time.weekday(),
            current_counts: BTreeMap::new(),
            core_ratio: None,
        }
    }

    /// Wall-clock now, shifted by `utc_offset_minutes`.
    pub fn now(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self::at(Utc::now().with_timezone(&offset))
    }

    /// A Monday at `minute_of_day`.
    pub fn at_minute(minute_of_day: u32) -> Self {
        Self {
            minute_of_day,
            weekday: Weekday::Mon,
            current_counts: BTreeMap::new(),
            core_ratio: None,
        }
    }

    pub fn with_weekday(mut self, weekday: Weekday) -> Self {
        self.weekday = weekday;
        self
    }

    pub fn with_count(mut self, resource: &str, count: Count) -> Self {
        self.current_counts.insert(resource.to_string(), count);
        self
    }

    pub fn with_core_ratio(mut self, ratio: f64) -> Self {
        self.core_ratio = Some(ratio);
        self
    }

    pub fn current_count(&self, resource: &str) -> Option<Count> {
        self.current_counts.get(resource).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn minute_of_day_uses_local_offset() {
        // 2024-03-04 is a Monday; 23:30 UTC is 07:30 Tuesday at +08:00.
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let utc = Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap();
        let ctx = EvaluationContext::at(utc.with_timezone(&offset));
        assert_eq!(ctx.minute_of_day, 7 * 60 + 30);
        assert_eq!(ctx.weekday, Weekday::Tue);
    }

    #[test]
    fn builders() {
        let ctx = EvaluationContext::at_minute(600)
            .with_count("workers", 3)
            .with_core_ratio(0.5);
        assert_eq!(ctx.current_count("workers"), Some(3));
        assert_eq!(ctx.current_count("other"), None);
        assert_eq!(ctx.core_ratio, Some(0.5));
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let ctx = EvaluationContext::now(i32::MAX);
        assert!(ctx.minute_of_day < 1440);
    }
}
