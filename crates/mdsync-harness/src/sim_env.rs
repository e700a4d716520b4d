//! Simulation environment.
//!
//! Time comes from tokio's clock, which turmoil drives virtually, so timeouts
//! fire in simulated time. Randomness comes from a seeded ChaCha stream: the
//! same seed replays the same nonces, reflect ids and challenges.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use mdsync_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::time::Instant;

/// Wall clock at simulation start (2024-01-01T00:00:00Z).
pub const SIM_EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Seeded environment. Clones share one RNG stream.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    started: Instant,
}

impl SimEnv {
    /// Environment seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            started: Instant::now(),
        }
    }

    /// Independent environment for another participant, derived from this
    /// stream.
    pub fn fork(&self) -> Self {
        Self::new(self.random_u64())
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock_millis(&self) -> u64 {
        let elapsed = Instant::now() - self.started;
        SIM_EPOCH_MILLIS + u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX - SIM_EPOCH_MILLIS)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_seed_same_stream() {
        let a = SimEnv::new(42);
        let b = SimEnv::new(42);
        assert_eq!(a.random_nonce(), b.random_nonce());
        assert_eq!(a.random_u64(), b.random_u64());
    }

    #[tokio::test]
    async fn forks_diverge() {
        let env = SimEnv::new(42);
        let fork = env.fork();
        assert_ne!(env.random_nonce(), fork.random_nonce());
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_follows_virtual_time() {
        let env = SimEnv::new(1);
        assert_eq!(env.wall_clock_millis(), SIM_EPOCH_MILLIS);
        env.sleep(Duration::from_secs(3)).await;
        assert_eq!(env.wall_clock_millis(), SIM_EPOCH_MILLIS + 3_000);
    }
}
