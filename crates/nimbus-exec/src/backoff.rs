//! Retry scheduling for failed jobs.
//!
//! Job retries use a linear base with bounded random jitter; only the
//! periodic worker loops use exponential backoff. Keeping the two
//! policies separate bounds retry latency for user-visible jobs while
//! still shedding load when a whole worker is unhealthy.

use std::time::Duration;

use rand::Rng;

use nimbus_model::JobKind;

const BASE_SECS: u64 = 30;

/// Per-kind ceiling on the random jitter added to a retry delay.
fn jitter_ceiling(kind: JobKind) -> u64 {
    match kind {
        // Heavy provisioning work: spread retries wider.
        JobKind::CreateDeployment
        | JobKind::CreateVm
        | JobKind::CreateSm
        | JobKind::DeleteDeployment
        | JobKind::DeleteVm
        | JobKind::DeleteSm => 60,
        // Repairs are already jittered by the scheduler.
        JobKind::RepairDeployment | JobKind::RepairVm | JobKind::RepairSm => 30,
        _ => 30,
    }
}

/// Delay before the next retry of a job that has now failed `attempts`
/// times: `30s · attempts` plus uniform jitter bounded by the kind's
/// ceiling.
#[must_use]
pub fn retry_delay(kind: JobKind, attempts: u32) -> Duration {
    let base = BASE_SECS * u64::from(attempts.max(1));
    let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling(kind));
    Duration::from_secs(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempts() {
        for attempts in 1..5 {
            let d = retry_delay(JobKind::UpdateVm, attempts);
            let base = Duration::from_secs(30 * u64::from(attempts));
            assert!(d >= base, "attempt {attempts}: {d:?} < {base:?}");
            assert!(d <= base + Duration::from_secs(30));
        }
    }

    #[test]
    fn zero_attempts_still_waits() {
        assert!(retry_delay(JobKind::CreateVm, 0) >= Duration::from_secs(30));
    }
}
