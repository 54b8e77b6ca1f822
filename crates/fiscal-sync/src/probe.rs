//! Offline probe scheduling: exponential ceiling with full jitter.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rand::Rng;

/// Delay generator for reachability probes while offline.
///
/// The ceiling doubles from `base` up to `max`; each delay is drawn
/// uniformly from `[0, ceiling]`.
#[derive(Debug)]
pub struct ProbeBackoff {
    ceiling: ExponentialBackoff,
}

impl ProbeBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let mut ceiling = ExponentialBackoff {
            initial_interval: base,
            max_interval: max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        ceiling.reset();
        ProbeBackoff { ceiling }
    }

    /// Current ceiling, before jitter. Advances the sequence.
    pub fn next_ceiling(&mut self) -> Duration {
        self.ceiling
            .next_backoff()
            .unwrap_or(self.ceiling.max_interval)
    }

    /// Next probe delay.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling_ms = self.next_ceiling().as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }

    pub fn reset(&mut self) {
        self.ceiling.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_up_to_max() {
        let mut probe = ProbeBackoff::new(Duration::from_secs(2), Duration::from_secs(60));
        let ceilings: Vec<u64> = (0..7).map(|_| probe.next_ceiling().as_secs()).collect();
        assert_eq!(ceilings, vec![2, 4, 8, 16, 32, 60, 60]);

        probe.reset();
        assert_eq!(probe.next_ceiling().as_secs(), 2);
    }

    #[test]
    fn test_delay_stays_under_ceiling() {
        let mut probe = ProbeBackoff::new(Duration::from_millis(100), Duration::from_millis(400));
        for expected_ceiling in [100u64, 200, 400, 400] {
            let delay = probe.next_delay();
            assert!(delay <= Duration::from_millis(expected_ceiling));
        }
    }
}
