use std::time::Duration;

use crate::constants::RETRY_SCHEDULE;
use crate::error::{Error, Result};

/// A fixed sequence of waits; one attempt is made per entry, and the entry's
/// duration is slept after that attempt fails.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrySchedule {
    waits: Vec<Duration>,
}

impl RetrySchedule {
    pub fn new(waits: Vec<Duration>) -> Result<Self> {
        if waits.is_empty() {
            return Err(Error::Config(
                "retry schedule must contain at least one attempt".into(),
            ));
        }
        Ok(Self { waits })
    }

    pub fn from_secs(secs: &[u64]) -> Result<Self> {
        Self::new(secs.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    pub fn attempts(&self) -> usize {
        self.waits.len()
    }

    pub fn waits(&self) -> &[Duration] {
        &self.waits
    }

    pub fn total(&self) -> Duration {
        self.waits.iter().sum()
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            waits: RETRY_SCHEDULE.iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Blocks the calling thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub(crate) struct RecordingSleeper {
    pub(crate) slept: Vec<Duration>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub(crate) fn new() -> Self {
        Self { slept: Vec::new() }
    }

    pub(crate) fn total(&self) -> Duration {
        self.slept.iter().sum()
    }
}

#[cfg(test)]
impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.slept.push(duration);
    }
}
