//! Reservoir and moving samplers.
//!
//! Both samplers are stateful types with `add` and `result`
//! operations. Their RNG is injectable so tests are deterministic.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A uniform fixed-size sample over a stream of unknown length
/// (algorithm R).
#[derive(Debug)]
pub struct Reservoir<T> {
    sample: Vec<T>,
    capacity: usize,
    seen: usize,
    rng: StdRng,
}

impl<T> Reservoir<T> {
    /// A reservoir seeded from entropy.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// A reservoir with an injected RNG, for deterministic tests.
    #[must_use]
    pub fn with_rng(capacity: usize, rng: StdRng) -> Self {
        Self {
            sample: Vec::with_capacity(capacity),
            capacity,
            seen: 0,
            rng,
        }
    }

    /// Offers values to the sample. Each value seen so far has equal
    /// probability of being in the reservoir afterwards.
    pub fn add(&mut self, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.seen += 1;
            if self.sample.len() < self.capacity {
                self.sample.push(value);
            } else if self.capacity > 0 {
                let slot = self.rng.gen_range(0..self.seen);
                if slot < self.capacity {
                    self.sample[slot] = value;
                }
            }
        }
    }

    /// Number of values offered so far.
    #[must_use]
    pub const fn seen(&self) -> usize {
        self.seen
    }

    /// The current sample contents, in insertion/replacement order.
    #[must_use]
    pub fn sample(&self) -> &[T] {
        &self.sample
    }

    /// Consumes the reservoir into its sample.
    #[must_use]
    pub fn result(self) -> Vec<T> {
        self.sample
    }
}

/// A sample of the most recent `capacity` values, for previews over
/// running streams.
#[derive(Debug)]
pub struct MovingSample<T> {
    window: VecDeque<T>,
    capacity: usize,
    seen: usize,
}

impl<T> MovingSample<T> {
    /// A moving sample keeping the last `capacity` values.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            seen: 0,
        }
    }

    /// Pushes values, evicting the oldest beyond capacity.
    pub fn add(&mut self, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.seen += 1;
            if self.capacity == 0 {
                continue;
            }
            if self.window.len() == self.capacity {
                self.window.pop_front();
            }
            self.window.push_back(value);
        }
    }

    /// Number of values offered so far.
    #[must_use]
    pub const fn seen(&self) -> usize {
        self.seen
    }

    /// The retained window, oldest first.
    #[must_use]
    pub fn result(self) -> Vec<T> {
        self.window.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservoir_under_capacity_keeps_everything() {
        let mut reservoir = Reservoir::with_rng(10, StdRng::seed_from_u64(1));
        reservoir.add(0..5);
        assert_eq!(reservoir.result(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_reservoir_is_deterministic_with_seed() {
        let run = || {
            let mut reservoir = Reservoir::with_rng(3, StdRng::seed_from_u64(42));
            reservoir.add(0..1000);
            reservoir.result()
        };
        assert_eq!(run(), run());
        assert_eq!(run().len(), 3);
    }

    #[test]
    fn test_reservoir_counts_seen() {
        let mut reservoir = Reservoir::with_rng(2, StdRng::seed_from_u64(7));
        reservoir.add(0..100);
        assert_eq!(reservoir.seen(), 100);
        assert_eq!(reservoir.sample().len(), 2);
    }

    #[test]
    fn test_moving_sample_keeps_tail() {
        let mut sample = MovingSample::new(3);
        sample.add(0..10);
        assert_eq!(sample.seen(), 10);
        assert_eq!(sample.result(), vec![7, 8, 9]);
    }

    #[test]
    fn test_zero_capacity() {
        let mut reservoir = Reservoir::with_rng(0, StdRng::seed_from_u64(1));
        reservoir.add(0..10);
        assert!(reservoir.result().is_empty());
        let mut sample = MovingSample::new(0);
        sample.add(0..10);
        assert!(sample.result().is_empty());
    }
}
