use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INTERVAL_MINUTES: u32 = 15;

/// Snapshot of the persisted key-value sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Local time of the last successful sync. `None` until the first one.
    pub last_sync: Option<NaiveDateTime>,
    pub last_notified_url: Option<String>,
    pub interval_minutes: u32,
    pub service_started: bool,
    pub foreground_flag: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_sync: None,
            last_notified_url: None,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            service_started: false,
            foreground_flag: false,
        }
    }
}

/// Interval choices offered to a settings surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalOption {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    SixHours,
    TwelveHours,
    OneDay,
}

impl IntervalOption {
    pub const ALL: [IntervalOption; 9] = [
        IntervalOption::OneMinute,
        IntervalOption::FiveMinutes,
        IntervalOption::FifteenMinutes,
        IntervalOption::ThirtyMinutes,
        IntervalOption::OneHour,
        IntervalOption::TwoHours,
        IntervalOption::SixHours,
        IntervalOption::TwelveHours,
        IntervalOption::OneDay,
    ];

    pub fn minutes(self) -> u32 {
        match self {
            IntervalOption::OneMinute => 1,
            IntervalOption::FiveMinutes => 5,
            IntervalOption::FifteenMinutes => 15,
            IntervalOption::ThirtyMinutes => 30,
            IntervalOption::OneHour => 60,
            IntervalOption::TwoHours => 120,
            IntervalOption::SixHours => 360,
            IntervalOption::TwelveHours => 720,
            IntervalOption::OneDay => 1440,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IntervalOption::OneMinute => "1 minute",
            IntervalOption::FiveMinutes => "5 minutes",
            IntervalOption::FifteenMinutes => "15 minutes",
            IntervalOption::ThirtyMinutes => "30 minutes",
            IntervalOption::OneHour => "1 hour",
            IntervalOption::TwoHours => "2 hours",
            IntervalOption::SixHours => "6 hours",
            IntervalOption::TwelveHours => "12 hours",
            IntervalOption::OneDay => "1 day",
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|opt| opt.minutes() == minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_uses_fifteen_minutes() {
        let state = SyncState::default();
        assert_eq!(state.interval_minutes, 15);
        assert!(state.last_sync.is_none());
        assert!(!state.service_started);
    }

    #[test]
    fn interval_options_round_trip_through_minutes() {
        assert_eq!(
            IntervalOption::from_minutes(60),
            Some(IntervalOption::OneHour)
        );
        assert_eq!(IntervalOption::from_minutes(7), None);
        assert_eq!(IntervalOption::OneDay.label(), "1 day");
    }
}
