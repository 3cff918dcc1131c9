//! Exit policy and restart budget

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::protocol::StartBody;

/// Exit codes that always end supervision (clean exit, SIGINT, SIGKILL)
pub const TERMINAL_EXIT_CODES: [i32; 3] = [0, 130, 137];

/// Exit code a worker uses to ask for a restart
pub const RESTART_EXIT_CODE: i32 = 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Terminate(i32),
    Respawn,
}

/// What to do after a worker exits with `code`, given the start message it sent (if any)
pub fn decide(start: Option<&StartBody>, code: i32) -> ExitDecision {
    match start {
        None => ExitDecision::Terminate(code),
        Some(_) if TERMINAL_EXIT_CODES.contains(&code) => ExitDecision::Terminate(code),
        Some(body) if code != RESTART_EXIT_CODE && !body.auto_restart => ExitDecision::Terminate(code),
        Some(_) => ExitDecision::Respawn,
    }
}

/// Sliding-window limit on respawns
#[derive(Debug)]
pub struct RestartBudget {
    max_restarts: u32,
    window: Duration,
    history: VecDeque<Instant>,
}

impl RestartBudget {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            history: VecDeque::new(),
        }
    }

    /// Record a respawn at `now`; false when the window is already full
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.history.front() {
            if now.duration_since(*oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }
        if self.history.len() as u32 >= self.max_restarts {
            return false;
        }
        self.history.push_back(now);
        true
    }

    pub fn used(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTO: StartBody = StartBody { auto_restart: true };
    const MANUAL: StartBody = StartBody { auto_restart: false };

    #[test]
    fn test_no_start_message_terminates() {
        assert_eq!(decide(None, 51), ExitDecision::Terminate(51));
        assert_eq!(decide(None, 1), ExitDecision::Terminate(1));
    }

    #[test]
    fn test_terminal_codes_terminate() {
        for code in TERMINAL_EXIT_CODES {
            assert_eq!(decide(Some(&AUTO), code), ExitDecision::Terminate(code));
        }
    }

    #[test]
    fn test_restart_code_respawns_without_auto_restart() {
        assert_eq!(decide(Some(&MANUAL), RESTART_EXIT_CODE), ExitDecision::Respawn);
        assert_eq!(decide(Some(&MANUAL), 1), ExitDecision::Terminate(1));
        assert_eq!(decide(Some(&AUTO), 1), ExitDecision::Respawn);
    }

    #[test]
    fn test_budget_window_slides() {
        let mut budget = RestartBudget::new(2, Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(budget.try_acquire(t0));
        assert!(budget.try_acquire(t0 + Duration::from_secs(1)));
        assert!(!budget.try_acquire(t0 + Duration::from_secs(2)));
        assert!(budget.try_acquire(t0 + Duration::from_secs(10)));
        assert_eq!(budget.used(), 2);
    }
}
