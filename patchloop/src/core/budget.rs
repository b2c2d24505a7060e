//! Deadline and transition-count helpers for bounded orchestration.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Upper bound on node transitions charged to one iteration.
pub const TRANSITIONS_PER_ITERATION: usize = 20;

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("deadline elapsed"));
    }
    Ok(remaining)
}

/// Coarse backstop on node transitions for a run with `max_iterations`.
pub fn transition_limit(max_iterations: u32) -> usize {
    (max_iterations.max(1) as usize).saturating_mul(TRANSITIONS_PER_ITERATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_deadline_is_an_error() {
        let deadline = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(remaining_budget(deadline).is_err());
    }

    #[test]
    fn future_deadline_reports_remaining_time() {
        let deadline = Instant::now() + Duration::from_secs(60);
        let remaining = remaining_budget(deadline).expect("remaining");
        assert!(remaining > Duration::from_secs(50));
    }

    #[test]
    fn transition_limit_scales_with_iterations() {
        assert_eq!(transition_limit(3), 60);
        assert_eq!(transition_limit(0), TRANSITIONS_PER_ITERATION);
    }
}
