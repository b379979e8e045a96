//! # timer
//!
//! why: election timeouts must be randomized per reset to avoid split votes
//! relations: consulted by follower and candidate roles
//! what: Timer trait, RandomTimer

use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::RaftConfig;

/// Source of election deadlines.
pub trait Timer {
    /// A fresh deadline, measured from now.
    fn next_timeout(&mut self) -> Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Draws each timeout uniformly from a millisecond window.
#[derive(Debug, Clone)]
pub struct RandomTimer {
    min: u64,
    max: u64,
}

impl RandomTimer {
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn from_config(config: &RaftConfig) -> Self {
        Self::new(config.election_timeout_min, config.election_timeout_max)
    }
}

impl Timer for RandomTimer {
    fn next_timeout(&mut self) -> Instant {
        let millis = rand::rng().random_range(self.min..=self.max);
        Instant::now() + Duration::from_millis(millis)
    }
}
