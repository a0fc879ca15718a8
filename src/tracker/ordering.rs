use tracing::warn;

use crate::domain::EventPosition;

/// Watches event positions for regressions.
///
/// A regression is only reported; the event is still applied.
#[derive(Debug, Default, Clone)]
pub struct OrderingMonitor {
    last: Option<EventPosition>,
    anomalies: u64,
}

impl OrderingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `position`. Returns false if it is lower than the highest
    /// position seen so far; repeats are in order.
    pub fn observe(&mut self, position: EventPosition, event: &str) -> bool {
        match self.last {
            Some(last) if position < last => {
                self.anomalies += 1;
                warn!(
                    "Event {} at {} arrived after {}; applying anyway",
                    event, position, last
                );
                false
            }
            _ => {
                self.last = Some(position);
                true
            }
        }
    }

    pub fn last(&self) -> Option<EventPosition> {
        self.last
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_counted_but_high_water_kept() {
        let mut monitor = OrderingMonitor::new();
        assert!(monitor.observe(EventPosition::new(10, 0), "A"));
        assert!(monitor.observe(EventPosition::new(10, 3), "B"));
        assert!(!monitor.observe(EventPosition::new(9, 7), "C"));
        assert!(monitor.observe(EventPosition::new(11, 0), "D"));

        assert_eq!(monitor.anomalies(), 1);
        assert_eq!(monitor.last(), Some(EventPosition::new(11, 0)));
    }

    #[test]
    fn test_repeated_position_is_in_order() {
        let mut monitor = OrderingMonitor::new();
        assert!(monitor.observe(EventPosition::new(5, 1), "A"));
        assert!(monitor.observe(EventPosition::new(5, 1), "B"));
        assert_eq!(monitor.anomalies(), 0);
        assert_eq!(monitor.last(), Some(EventPosition::new(5, 1)));
    }
}
