use std::time::Instant;

/// Instantaneous transfer rate between consecutive progress events.
///
/// Each call to [`sample`](Self::sample) measures only the interval since
/// the previous call; there is no averaging window.
#[derive(Debug)]
pub struct RateSampler {
    last_bytes: u64,
    last_time: Instant,
}

impl RateSampler {
    /// Starts sampling from zero bytes at the current instant.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            last_bytes: 0,
            last_time: start,
        }
    }

    /// Records `loaded` bytes at the current instant and returns bytes/second.
    pub fn sample(&mut self, loaded: u64) -> f64 {
        self.sample_at(loaded, Instant::now())
    }

    /// Records `loaded` bytes at `now` and returns bytes/second.
    ///
    /// Returns 0.0 when no time has elapsed since the previous sample.
    pub fn sample_at(&mut self, loaded: u64, now: Instant) -> f64 {
        let bytes = loaded.saturating_sub(self.last_bytes);
        let elapsed = now.saturating_duration_since(self.last_time);

        self.last_bytes = loaded;
        self.last_time = now;

        if elapsed.is_zero() {
            return 0.0;
        }
        bytes as f64 / elapsed.as_secs_f64()
    }
}

impl Default for RateSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_is_delta_over_interval() {
        let start = Instant::now();
        let mut sampler = RateSampler::starting_at(start);

        let rate = sampler.sample_at(1000, start + Duration::from_millis(500));
        assert!((rate - 2000.0).abs() < 1e-6);

        // Second interval only counts its own bytes.
        let rate = sampler.sample_at(1500, start + Duration::from_millis(1500));
        assert!((rate - 500.0).abs() < 1e-6);
    }

    #[test]
    fn zero_interval_reports_zero() {
        let start = Instant::now();
        let mut sampler = RateSampler::starting_at(start);
        assert_eq!(sampler.sample_at(100, start), 0.0);
    }

    #[test]
    fn not_a_running_average() {
        let start = Instant::now();
        let mut sampler = RateSampler::starting_at(start);
        sampler.sample_at(10_000, start + Duration::from_secs(1));
        // A slow interval after a fast one reports the slow rate.
        let rate = sampler.sample_at(10_010, start + Duration::from_secs(2));
        assert!((rate - 10.0).abs() < 1e-6);
    }

    #[test]
    fn sample_uses_wall_clock() {
        let mut sampler = RateSampler::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(sampler.sample(1024) > 0.0);
    }
}
