//! At most one run of a job at a time

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

/// Releases the flag when dropped, including on early return or panic
pub struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if a run is already in flight
    pub fn try_start(&self) -> Option<FlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flag: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_start_refused_until_release() {
        let flight = SingleFlight::new();
        let guard = flight.try_start().unwrap();
        assert!(flight.is_running());
        assert!(flight.try_start().is_none());

        drop(guard);
        assert!(!flight.is_running());
        assert!(flight.try_start().is_some());
    }
}
