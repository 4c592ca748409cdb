use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

/// Per-peer availability monitor. The membership core only consumes the
/// boolean verdict; implementations feed heartbeats from the transport.
pub trait FailureDetector: Debug + Send {
    /// A heartbeat from the monitored node arrived.
    fn heartbeat(&mut self);

    fn is_available(&self) -> bool;

    /// False until the first heartbeat has been observed.
    fn is_monitoring(&self) -> bool;
}

/// Available as long as heartbeats keep arriving within
/// `acceptable_heartbeat_pause`.
#[derive(Debug)]
pub struct DeadlineFailureDetector {
    acceptable_heartbeat_pause: Duration,
    clock: Arc<dyn Clock>,
    last_heartbeat: Option<i64>,
}

impl DeadlineFailureDetector {
    pub fn new(acceptable_heartbeat_pause: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            acceptable_heartbeat_pause,
            clock,
            last_heartbeat: None,
        }
    }
}

impl FailureDetector for DeadlineFailureDetector {
    fn heartbeat(&mut self) {
        self.last_heartbeat = Some(self.clock.now_millis());
    }

    fn is_available(&self) -> bool {
        match self.last_heartbeat {
            None => true,
            Some(last) => {
                self.clock.now_millis() - last <= self.acceptable_heartbeat_pause.as_millis() as i64
            }
        }
    }

    fn is_monitoring(&self) -> bool {
        self.last_heartbeat.is_some()
    }
}

/// Availability under manual control, for driving partition scenarios in
/// tests.
#[derive(Debug)]
pub struct PuppetFailureDetector {
    available: bool,
    monitoring: bool,
}

impl Default for PuppetFailureDetector {
    fn default() -> Self {
        Self {
            available: true,
            monitoring: false,
        }
    }
}

impl PuppetFailureDetector {
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }
}

impl FailureDetector for PuppetFailureDetector {
    fn heartbeat(&mut self) {
        self.monitoring = true;
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn is_monitoring(&self) -> bool {
        self.monitoring
    }
}
