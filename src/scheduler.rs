// ============================================================================
// BAKE SCHEDULER: single-flight bakes with one coalesced trailing request
// ============================================================================
//
//   Idle ──request──▶ Baking ──request──▶ BakingWithPending
//    ▲                  │                        │
//    └────complete──────┘        complete ──▶ Baking (next generation)
//
// At most one bake is ever in flight. Any number of requests made while one
// is running collapse into a single trailing bake, which snapshots the layer
// state at the moment it starts rather than when it was requested.

/// Scheduler state. Generations are assigned when a bake *starts*.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BakeState {
    Idle,
    Baking { generation: u64 },
    BakingWithPending { generation: u64 },
}

/// What the caller should do after [`BakeScheduler::request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BakeRequest {
    /// Snapshot the current state and start a bake with this generation.
    Start(u64),
    /// A bake is already running; a trailing one has been recorded.
    Coalesced,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BakeStats {
    pub started: u64,
    pub coalesced: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug)]
pub struct BakeScheduler {
    state: BakeState,
    next_generation: u64,
    stats: BakeStats,
}

impl Default for BakeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl BakeScheduler {
    pub fn new() -> Self {
        Self {
            state: BakeState::Idle,
            next_generation: 1,
            stats: BakeStats::default(),
        }
    }

    pub fn state(&self) -> BakeState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == BakeState::Idle
    }

    pub fn stats(&self) -> BakeStats {
        self.stats
    }

    /// Generation of the bake currently running, if any.
    pub fn in_flight(&self) -> Option<u64> {
        match self.state {
            BakeState::Idle => None,
            BakeState::Baking { generation } | BakeState::BakingWithPending { generation } => {
                Some(generation)
            }
        }
    }

    pub fn request(&mut self) -> BakeRequest {
        match self.state {
            BakeState::Idle => BakeRequest::Start(self.begin()),
            BakeState::Baking { generation } => {
                self.state = BakeState::BakingWithPending { generation };
                self.stats.coalesced += 1;
                BakeRequest::Coalesced
            }
            BakeState::BakingWithPending { .. } => {
                self.stats.coalesced += 1;
                BakeRequest::Coalesced
            }
        }
    }

    /// Record that bake `generation` finished (successfully or not). Returns
    /// the generation of the trailing bake to start now, if one was pending.
    pub fn complete(&mut self, generation: u64, succeeded: bool) -> Option<u64> {
        match self.state {
            BakeState::Baking { generation: running } if running == generation => {
                self.record(succeeded);
                self.state = BakeState::Idle;
                None
            }
            BakeState::BakingWithPending { generation: running } if running == generation => {
                self.record(succeeded);
                Some(self.begin())
            }
            state => {
                crate::log_warn!(
                    "ignoring completion of bake {} while scheduler is {:?}",
                    generation,
                    state
                );
                None
            }
        }
    }

    fn begin(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.state = BakeState::Baking { generation };
        self.stats.started += 1;
        generation
    }

    fn record(&mut self, succeeded: bool) {
        if succeeded {
            self.stats.completed += 1;
        } else {
            self.stats.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_starts_generation_one() {
        let mut s = BakeScheduler::new();
        assert_eq!(s.request(), BakeRequest::Start(1));
        assert_eq!(s.state(), BakeState::Baking { generation: 1 });
        assert_eq!(s.complete(1, true), None);
        assert!(s.is_idle());
    }

    #[test]
    fn burst_while_baking_runs_at_most_two_bakes() {
        let mut s = BakeScheduler::new();
        assert_eq!(s.request(), BakeRequest::Start(1));
        for _ in 0..50 {
            assert_eq!(s.request(), BakeRequest::Coalesced);
        }
        assert_eq!(s.state(), BakeState::BakingWithPending { generation: 1 });

        let trailing = s.complete(1, true);
        assert_eq!(trailing, Some(2));
        assert_eq!(s.complete(2, true), None);
        assert!(s.is_idle());
        assert_eq!(s.stats().started, 2);
        assert_eq!(s.stats().coalesced, 50);
    }

    #[test]
    fn generations_increase_across_idle_periods() {
        let mut s = BakeScheduler::new();
        let BakeRequest::Start(a) = s.request() else { panic!("expected start") };
        s.complete(a, true);
        let BakeRequest::Start(b) = s.request() else { panic!("expected start") };
        assert!(b > a);
    }

    #[test]
    fn failed_bake_still_releases_the_slot() {
        let mut s = BakeScheduler::new();
        s.request();
        s.request();
        assert_eq!(s.complete(1, false), Some(2));
        assert_eq!(s.stats().failed, 1);
        assert_eq!(s.complete(2, true), None);
        assert_eq!(s.stats().completed, 1);
    }

    #[test]
    fn stray_completion_is_ignored() {
        let mut s = BakeScheduler::new();
        assert_eq!(s.complete(9, true), None);
        s.request();
        assert_eq!(s.complete(9, true), None);
        assert_eq!(s.in_flight(), Some(1));
    }
}
