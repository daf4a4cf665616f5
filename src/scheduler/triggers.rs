//! Wall-clock schedules for extra monitoring runs

use crate::events::Timestamp;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

/// Trait for wall-clock schedules that fire a monitoring cycle
pub trait ScheduleTrigger: Send + Sync {
    /// Get a human-readable name for this trigger
    fn name(&self) -> String;

    /// First firing time strictly after `after`
    fn next_fire(&self, after: Timestamp) -> Option<Timestamp>;
}

fn at_time(date: NaiveDate, time: NaiveTime) -> Option<Timestamp> {
    Utc.from_local_datetime(&date.and_time(time)).single()
}

/// Fires every day at a fixed UTC time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyAt {
    time: NaiveTime,
}

impl DailyAt {
    /// `None` when `hour` or `minute` is out of range
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|time| Self { time })
    }
}

impl ScheduleTrigger for DailyAt {
    fn name(&self) -> String {
        format!("daily@{}", self.time.format("%H:%M"))
    }

    fn next_fire(&self, after: Timestamp) -> Option<Timestamp> {
        let today = at_time(after.date_naive(), self.time)?;
        if today > after {
            Some(today)
        } else {
            Some(today + Duration::days(1))
        }
    }
}

/// Fires once a week on a fixed weekday and UTC time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyAt {
    weekday: Weekday,
    time: NaiveTime,
}

impl WeeklyAt {
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|time| Self { weekday, time })
    }
}

impl ScheduleTrigger for WeeklyAt {
    fn name(&self) -> String {
        format!("weekly@{}-{}", self.weekday, self.time.format("%H:%M"))
    }

    fn next_fire(&self, after: Timestamp) -> Option<Timestamp> {
        let days_ahead = (7 + self.weekday.num_days_from_monday()
            - after.weekday().num_days_from_monday())
            % 7;
        let date = after.date_naive() + Duration::days(days_ahead as i64);
        let candidate = at_time(date, self.time)?;
        if candidate > after {
            Some(candidate)
        } else {
            Some(candidate + Duration::days(7))
        }
    }
}

/// Set of schedule triggers for the monitoring cycle
#[derive(Default)]
pub struct Schedule {
    triggers: Vec<Box<dyn ScheduleTrigger>>,
}

impl Schedule {
    /// Create a schedule with no triggers
    pub fn new() -> Self {
        Self {
            triggers: Vec::new(),
        }
    }

    /// Daily triggers at each of `hours` plus Saturday and Sunday at `weekend_hour`
    ///
    /// Hours outside `0..24` are ignored.
    pub fn daily_and_weekend(hours: &[u32], weekend_hour: u32) -> Self {
        let mut schedule = Self::new();
        for hour in hours {
            if let Some(trigger) = DailyAt::new(*hour, 0) {
                schedule.add_trigger(Box::new(trigger));
            }
        }
        for weekday in [Weekday::Sat, Weekday::Sun] {
            if let Some(trigger) = WeeklyAt::new(weekday, weekend_hour, 0) {
                schedule.add_trigger(Box::new(trigger));
            }
        }
        schedule
    }

    /// Add a trigger to the schedule
    pub fn add_trigger(&mut self, trigger: Box<dyn ScheduleTrigger>) {
        self.triggers.push(trigger);
    }

    /// Get the number of configured triggers
    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Earliest firing time of any trigger after `after`, with the trigger's name
    pub fn next_fire(&self, after: Timestamp) -> Option<(Timestamp, String)> {
        self.triggers
            .iter()
            .filter_map(|t| t.next_fire(after).map(|at| (at, t.name())))
            .min_by_key(|(at, _)| *at)
    }

    pub fn into_triggers(self) -> Vec<Box<dyn ScheduleTrigger>> {
        self.triggers
    }
}
