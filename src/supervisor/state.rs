//! Demand tracking state machine
//!
//! Decides when the single encode run starts and stops. The tracker is pure:
//! it consumes events and returns the [`Action`] the control loop must carry
//! out, which keeps every start/stop decision testable without a runtime.
//!
//! ```text
//!   Idle ──join──► Running ──last leave──► Stopping
//!                    │                        │
//!                    └──exit──┬───────────────┘
//!                             ▼
//!            count 0: Idle | count > 0: Running or Backoff
//! ```

use std::time::Duration;

/// Identifies one run of the encoder
pub type RunId = u64;

/// Where the supervisor is in the run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run and nothing scheduled
    Idle,
    /// A run is active
    Running(RunId),
    /// The run was told to stop and has not reported back yet
    Stopping(RunId),
    /// Waiting before restarting a failed run
    Backoff,
}

/// What the control loop must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start a run with this id
    Start(RunId),
    /// Signal the active run to stop
    Stop(RunId),
    /// Arm the restart timer
    RestartAfter(Duration),
    Nothing,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stop signal was honored
    Stopped,
    /// The input was exhausted
    Eof,
    /// The engine failed to start or failed mid-run
    Failed,
}

/// Delay between restarts of a run that keeps failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Always restart immediately
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay before restarting after `failures` consecutive failed runs
    ///
    /// The first failure restarts immediately; each further failure doubles
    /// the delay, starting from `initial` and capped at `max`.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures < 2 || self.initial.is_zero() {
            return Duration::ZERO;
        }

        let exponent = (failures - 2).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Subscriber count and run bookkeeping, mutated only by the control loop
#[derive(Debug)]
pub struct DemandTracker {
    subscribers: usize,
    phase: Phase,
    next_run_id: RunId,
    failures: u32,
    backoff: BackoffPolicy,
    shutting_down: bool,
}

impl DemandTracker {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            subscribers: 0,
            phase: Phase::Idle,
            next_run_id: 1,
            failures: 0,
            backoff,
            shutting_down: false,
        }
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Consecutive runs that ended without producing a frame
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The run that has been started and has not reported its exit
    pub fn run_in_flight(&self) -> Option<RunId> {
        match self.phase {
            Phase::Running(id) | Phase::Stopping(id) => Some(id),
            Phase::Idle | Phase::Backoff => None,
        }
    }

    /// A subscriber joined
    pub fn on_join(&mut self) -> Action {
        self.subscribers += 1;

        match self.phase {
            Phase::Idle if !self.shutting_down => self.start(),
            // Stopping: the replacement starts once the exit arrives
            // Backoff: the restart timer is already armed
            _ => Action::Nothing,
        }
    }

    /// A subscriber left
    pub fn on_leave(&mut self) -> Action {
        if self.subscribers == 0 {
            tracing::warn!("Leave without a matching join ignored");
            return Action::Nothing;
        }
        self.subscribers -= 1;

        if self.subscribers > 0 {
            return Action::Nothing;
        }

        match self.phase {
            Phase::Running(id) => {
                self.phase = Phase::Stopping(id);
                Action::Stop(id)
            }
            Phase::Backoff => {
                self.phase = Phase::Idle;
                Action::Nothing
            }
            Phase::Idle | Phase::Stopping(_) => Action::Nothing,
        }
    }

    /// A run reported its termination
    pub fn on_exit(&mut self, id: RunId, outcome: RunOutcome, frames: u64) -> Action {
        if self.run_in_flight() != Some(id) {
            tracing::warn!(run_id = id, "Exit from unknown run ignored");
            return Action::Nothing;
        }

        if frames > 0 {
            self.failures = 0;
        } else if outcome != RunOutcome::Stopped {
            self.failures = self.failures.saturating_add(1);
        }

        self.phase = Phase::Idle;
        if self.subscribers == 0 || self.shutting_down {
            return Action::Nothing;
        }

        let delay = self.backoff.delay(self.failures);
        if delay.is_zero() {
            self.start()
        } else {
            self.phase = Phase::Backoff;
            Action::RestartAfter(delay)
        }
    }

    /// The restart timer fired
    pub fn on_restart_timer(&mut self) -> Action {
        if self.phase == Phase::Backoff && self.subscribers > 0 && !self.shutting_down {
            self.start()
        } else {
            Action::Nothing
        }
    }

    /// The whole system is shutting down; no run is started after this
    pub fn on_shutdown(&mut self) -> Action {
        self.shutting_down = true;

        match self.phase {
            Phase::Running(id) => {
                self.phase = Phase::Stopping(id);
                Action::Stop(id)
            }
            Phase::Backoff => {
                self.phase = Phase::Idle;
                Action::Nothing
            }
            Phase::Idle | Phase::Stopping(_) => Action::Nothing,
        }
    }

    fn start(&mut self) -> Action {
        let id = self.next_run_id;
        self.next_run_id += 1;
        self.phase = Phase::Running(id);
        Action::Start(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DemandTracker {
        DemandTracker::new(BackoffPolicy::default())
    }

    #[test]
    fn test_first_join_starts_run() {
        let mut t = tracker();

        assert_eq!(t.on_join(), Action::Start(1));
        assert_eq!(t.phase(), Phase::Running(1));

        // Further joins share the run
        assert_eq!(t.on_join(), Action::Nothing);
        assert_eq!(t.subscribers(), 2);
    }

    #[test]
    fn test_last_leave_stops_run() {
        let mut t = tracker();
        t.on_join();
        t.on_join();

        assert_eq!(t.on_leave(), Action::Nothing);
        assert_eq!(t.on_leave(), Action::Stop(1));
        assert_eq!(t.phase(), Phase::Stopping(1));
    }

    #[test]
    fn test_exit_after_stop_with_no_subscribers() {
        let mut t = tracker();
        t.on_join();
        t.on_leave();

        // Run ends with EOF after being told to stop: no replacement
        assert_eq!(t.on_exit(1, RunOutcome::Eof, 10), Action::Nothing);
        assert_eq!(t.phase(), Phase::Idle);
        assert_eq!(t.run_in_flight(), None);
    }

    #[test]
    fn test_unsolicited_exit_restarts() {
        let mut t = tracker();
        t.on_join();

        assert_eq!(t.on_exit(1, RunOutcome::Eof, 100), Action::Start(2));
        assert_eq!(t.on_exit(2, RunOutcome::Failed, 3), Action::Start(3));
        assert_eq!(t.failures(), 0);
    }

    #[test]
    fn test_unmatched_leave_is_noop() {
        let mut t = tracker();

        assert_eq!(t.on_leave(), Action::Nothing);
        assert_eq!(t.subscribers(), 0);
        assert_eq!(t.phase(), Phase::Idle);

        // Double leave after a real session
        t.on_join();
        t.on_leave();
        assert_eq!(t.on_leave(), Action::Nothing);
        assert_eq!(t.subscribers(), 0);
    }

    #[test]
    fn test_join_while_stopping_waits_for_exit() {
        let mut t = tracker();
        t.on_join();
        t.on_leave();

        // Old run still owns the stream
        assert_eq!(t.on_join(), Action::Nothing);
        assert_eq!(t.phase(), Phase::Stopping(1));

        assert_eq!(t.on_exit(1, RunOutcome::Stopped, 5), Action::Start(2));
    }

    #[test]
    fn test_stale_exit_ignored() {
        let mut t = tracker();
        t.on_join();

        assert_eq!(t.on_exit(7, RunOutcome::Failed, 0), Action::Nothing);
        assert_eq!(t.phase(), Phase::Running(1));
    }

    #[test]
    fn test_repeated_failures_back_off() {
        let mut t = DemandTracker::new(BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(300),
        ));
        t.on_join();

        // First failure restarts immediately
        assert_eq!(t.on_exit(1, RunOutcome::Failed, 0), Action::Start(2));

        assert_eq!(
            t.on_exit(2, RunOutcome::Failed, 0),
            Action::RestartAfter(Duration::from_millis(100))
        );
        assert_eq!(t.phase(), Phase::Backoff);
        assert_eq!(t.on_restart_timer(), Action::Start(3));

        assert_eq!(
            t.on_exit(3, RunOutcome::Eof, 0),
            Action::RestartAfter(Duration::from_millis(200))
        );
        assert_eq!(t.on_restart_timer(), Action::Start(4));

        // Capped
        assert_eq!(
            t.on_exit(4, RunOutcome::Failed, 0),
            Action::RestartAfter(Duration::from_millis(300))
        );
        assert_eq!(t.on_restart_timer(), Action::Start(5));

        // A productive run resets the count
        assert_eq!(t.on_exit(5, RunOutcome::Failed, 1), Action::Start(6));
        assert_eq!(t.failures(), 0);
    }

    #[test]
    fn test_leave_during_backoff_cancels_restart() {
        let mut t = tracker();
        t.on_join();
        t.on_exit(1, RunOutcome::Failed, 0);
        t.on_exit(2, RunOutcome::Failed, 0);
        assert_eq!(t.phase(), Phase::Backoff);

        assert_eq!(t.on_leave(), Action::Nothing);
        assert_eq!(t.phase(), Phase::Idle);
        assert_eq!(t.on_restart_timer(), Action::Nothing);

        // Joining again starts right away
        assert_eq!(t.on_join(), Action::Start(3));
    }

    #[test]
    fn test_join_during_backoff_waits_for_timer() {
        let mut t = tracker();
        t.on_join();
        t.on_exit(1, RunOutcome::Failed, 0);
        t.on_exit(2, RunOutcome::Failed, 0);

        assert_eq!(t.on_join(), Action::Nothing);
        assert_eq!(t.on_restart_timer(), Action::Start(3));
    }

    #[test]
    fn test_stopped_run_is_not_a_failure() {
        let mut t = tracker();
        t.on_join();
        t.on_leave();
        t.on_exit(1, RunOutcome::Stopped, 0);

        assert_eq!(t.failures(), 0);
    }

    #[test]
    fn test_shutdown_stops_and_blocks_restart() {
        let mut t = tracker();
        t.on_join();

        assert_eq!(t.on_shutdown(), Action::Stop(1));
        assert_eq!(t.on_join(), Action::Nothing);
        assert_eq!(t.on_exit(1, RunOutcome::Stopped, 0), Action::Nothing);
        assert_eq!(t.run_in_flight(), None);
    }

    #[test]
    fn test_shutdown_when_idle() {
        let mut t = tracker();
        assert_eq!(t.on_shutdown(), Action::Nothing);
        assert_eq!(t.on_join(), Action::Nothing);
    }

    #[test]
    fn test_backoff_delays() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::ZERO);
        assert_eq!(policy.delay(2), Duration::from_millis(500));
        assert_eq!(policy.delay(3), Duration::from_secs(1));
        assert_eq!(policy.delay(6), Duration::from_secs(8));
        assert_eq!(policy.delay(7), Duration::from_secs(10));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));

        assert_eq!(BackoffPolicy::disabled().delay(10), Duration::ZERO);
    }

    #[test]
    fn test_at_most_one_run_for_any_sequence() {
        // Deterministic pseudo-random event sequence
        let mut t = tracker();
        let mut live: Option<RunId> = None;
        let mut stops = 0usize;
        let mut seed: u32 = 0x2545_f491;

        for _ in 0..5000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;

            let action = match seed % 5 {
                0 | 1 => t.on_join(),
                2 | 3 => t.on_leave(),
                _ if seed & 0x200 == 0 => t.on_restart_timer(),
                _ => match live {
                    Some(id) => {
                        let outcome = if seed & 0x100 == 0 {
                            RunOutcome::Eof
                        } else {
                            RunOutcome::Failed
                        };
                        live = None;
                        t.on_exit(id, outcome, u64::from(seed & 1))
                    }
                    None => t.on_restart_timer(),
                },
            };

            match action {
                Action::Start(id) => {
                    assert!(live.is_none(), "second run started while {:?} live", live);
                    live = Some(id);
                }
                Action::Stop(id) => {
                    assert_eq!(live, Some(id), "stop issued with no active run");
                    assert_eq!(t.subscribers(), 0);
                    stops += 1;
                }
                Action::RestartAfter(_) | Action::Nothing => {}
            }

            assert_eq!(t.run_in_flight(), live);
        }

        assert!(stops > 0);
    }
}
