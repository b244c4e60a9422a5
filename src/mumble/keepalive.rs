use std::time::{Duration, Instant};

/// Fixed-interval ping deadline.
///
/// The scheduler never fires on its own; the session loop polls it. Once
/// disabled it stays disabled for the rest of the connection.
#[derive(Debug)]
pub struct Keepalive {
    interval: Duration,
    next_due: Option<Instant>,
    enabled: bool,
}

impl Keepalive {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
            enabled: true,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn start(&mut self, now: Instant) {
        if self.enabled {
            self.next_due = Some(now + self.interval);
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.next_due = None;
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Returns true when a ping is due, rescheduling the next one.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.enabled {
            self.next_due = None;
            return false;
        }
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Keepalive;
    use std::time::{Duration, Instant};

    /// Nothing is due before the scheduler starts.
    #[test]
    fn idle_until_started() {
        // Arrange
        let mut keepalive = Keepalive::new(Duration::from_secs(5));
        let now = Instant::now();
        // Act
        let due = keepalive.poll(now + Duration::from_secs(60));
        // Assert
        assert!(!due);
        assert!(keepalive.next_due().is_none());
    }

    /// A ping fires once per elapsed interval and reschedules itself.
    #[test]
    fn fires_after_interval_and_reschedules() {
        // Arrange
        let mut keepalive = Keepalive::new(Duration::from_secs(5));
        let start = Instant::now();
        keepalive.start(start);

        // Act
        let early = keepalive.poll(start + Duration::from_secs(4));
        let on_time = keepalive.poll(start + Duration::from_secs(5));
        let repeated = keepalive.poll(start + Duration::from_secs(6));

        // Assert
        assert!(!early);
        assert!(on_time);
        assert!(!repeated);
        assert_eq!(
            keepalive.next_due(),
            Some(start + Duration::from_secs(10))
        );
    }

    /// Disabling is permanent, even across restarts.
    #[test]
    fn disable_stops_pings_for_good() {
        // Arrange
        let mut keepalive = Keepalive::new(Duration::from_secs(5));
        let start = Instant::now();
        keepalive.start(start);

        // Act
        keepalive.disable();
        keepalive.start(start);
        let due = keepalive.poll(start + Duration::from_secs(30));

        // Assert
        assert!(!due);
        assert!(!keepalive.is_enabled());
        assert!(keepalive.next_due().is_none());
    }
}
