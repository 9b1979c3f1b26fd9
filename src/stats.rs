//! Decode-path counters and noise-floor tracking
//!
//! Holds the atomic counters that back the periodic statistics snapshot and
//! the slow running noise-floor estimate used only for that snapshot (it is
//! not part of the per-window accept/reject decision in the demodulator).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of noise-floor samples averaged into the running estimate.
const NOISE_FLOOR_SAMPLES: usize = 256;

/// Decode-path counters, atomic or owned by the single worker per the
/// shared-resource policy.
#[derive(Default)]
pub struct Stats {
    pub preambles_scanned: AtomicU64,
    pub preambles_seen: AtomicU64,
    pub valid: AtomicU64,
    pub corrected1: AtomicU64,
    pub corrected2: AtomicU64,
    pub rejected: AtomicU64,
    pub sample_overruns: AtomicU64,
    pub write_failures: AtomicU64,
    /// Even/odd CPR frames that disagreed on NL zone; position omitted, both
    /// frames retained for the next attempt.
    pub cpr_ambiguous: AtomicU64,
    noise: Mutex<NoiseFloor>,
}

struct NoiseFloor {
    floor: u16,
    samples: VecDeque<u16>,
}

impl Default for NoiseFloor {
    fn default() -> Self {
        Self {
            floor: 100,
            samples: VecDeque::with_capacity(NOISE_FLOOR_SAMPLES),
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the running noise-floor estimate from one magnitude chunk,
    /// using the lower quartile of a strided sample as the per-chunk
    /// estimate, averaged over the last `NOISE_FLOOR_SAMPLES` chunks.
    pub fn update_noise_floor(&self, magnitude: &[u16]) {
        if magnitude.len() < 100 {
            return;
        }

        let mut samples: Vec<u16> = magnitude.iter().step_by(16).copied().collect();
        if samples.is_empty() {
            return;
        }
        samples.sort_unstable();
        let estimate = samples[samples.len() / 4];

        let mut nf = self.noise.lock();
        nf.samples.push_back(estimate);
        if nf.samples.len() > NOISE_FLOOR_SAMPLES {
            nf.samples.pop_front();
        }
        let sum: u32 = nf.samples.iter().map(|&x| x as u32).sum();
        nf.floor = (sum / nf.samples.len() as u32) as u16;
    }

    pub fn noise_floor(&self) -> u16 {
        self.noise.lock().floor
    }

    /// Render a one-line summary for the periodic `tracing::info!` snapshot.
    pub fn snapshot_line(&self) -> String {
        format!(
            "preambles={} valid={} corrected1={} corrected2={} rejected={} overruns={} cpr_ambiguous={} write_failures={} noise_floor={}",
            self.preambles_seen.load(Ordering::Relaxed),
            self.valid.load(Ordering::Relaxed),
            self.corrected1.load(Ordering::Relaxed),
            self.corrected2.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.sample_overruns.load(Ordering::Relaxed),
            self.cpr_ambiguous.load(Ordering::Relaxed),
            self.write_failures.load(Ordering::Relaxed),
            self.noise_floor(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_floor_converges() {
        let stats = Stats::new();
        let magnitude: Vec<u16> = (0..1000).map(|i| 50 + (i % 20) as u16).collect();
        stats.update_noise_floor(&magnitude);
        let floor = stats.noise_floor();
        assert!(floor >= 40 && floor <= 80);
    }

    #[test]
    fn test_counters_increment() {
        let stats = Stats::new();
        stats.valid.fetch_add(3, Ordering::Relaxed);
        stats.rejected.fetch_add(1, Ordering::Relaxed);
        let line = stats.snapshot_line();
        assert!(line.contains("valid=3"));
        assert!(line.contains("rejected=1"));
    }
}
