//! Daily cap on surfaced suggestions
//!
//! The counter is keyed by local calendar date and persisted in the store's
//! tracker state, so restarting the process does not reset it.

use chrono::NaiveDate;
use tracing::warn;

use crate::error::StoreError;
use crate::store::MessageStore;

const DAY_KEY: &str = "suggestions.day";
const COUNT_KEY: &str = "suggestions.count";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyLimiter {
    max_per_day: u32,
    day: Option<NaiveDate>,
    count: u32,
}

impl DailyLimiter {
    pub fn new(max_per_day: u32) -> Self {
        Self {
            max_per_day,
            day: None,
            count: 0,
        }
    }

    pub fn load(store: &MessageStore, max_per_day: u32) -> Result<Self, StoreError> {
        let mut limiter = Self::new(max_per_day);

        let day = store.get_state(DAY_KEY)?;
        let count = store.get_state(COUNT_KEY)?;
        if let (Some(day), Some(count)) = (day, count) {
            match (day.parse::<NaiveDate>(), count.parse::<u32>()) {
                (Ok(day), Ok(count)) => {
                    limiter.day = Some(day);
                    limiter.count = count;
                }
                _ => warn!(day = %day, count = %count, "ignoring malformed suggestion counter"),
            }
        }

        Ok(limiter)
    }

    pub fn save(&self, store: &MessageStore) -> Result<(), StoreError> {
        if let Some(day) = self.day {
            store.set_state(DAY_KEY, &day.to_string())?;
            store.set_state(COUNT_KEY, &self.count.to_string())?;
        }
        Ok(())
    }

    /// Take one slot for `today`; the counter resets when the date changes.
    pub fn try_acquire(&mut self, today: NaiveDate) -> bool {
        if self.day != Some(today) {
            self.day = Some(today);
            self.count = 0;
        }
        if self.count >= self.max_per_day {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn remaining(&self, today: NaiveDate) -> u32 {
        if self.day == Some(today) {
            self.max_per_day.saturating_sub(self.count)
        } else {
            self.max_per_day
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_cap_and_reset() {
        let mut limiter = DailyLimiter::new(2);
        assert!(limiter.try_acquire(day(1)));
        assert!(limiter.try_acquire(day(1)));
        assert!(!limiter.try_acquire(day(1)));
        assert_eq!(limiter.remaining(day(1)), 0);

        assert_eq!(limiter.remaining(day(2)), 2);
        assert!(limiter.try_acquire(day(2)));
        assert_eq!(limiter.remaining(day(2)), 1);
    }

    #[test]
    fn test_persisted_across_loads() {
        let store = MessageStore::open_in_memory().unwrap();
        let mut limiter = DailyLimiter::load(&store, 2).unwrap();
        assert!(limiter.try_acquire(day(5)));
        assert!(limiter.try_acquire(day(5)));
        limiter.save(&store).unwrap();

        let mut reloaded = DailyLimiter::load(&store, 2).unwrap();
        assert_eq!(reloaded, limiter);
        assert!(!reloaded.try_acquire(day(5)));
    }
}
