//! Clocks and randomness behind a trait.
//!
//! The handshake, transaction and reflect state machines read time and draw
//! nonces only through [`Environment`]. Devices use system clocks and OS
//! entropy; the simulation harness plugs in virtual time and a seeded stream.

use std::time::Duration;

/// Time and randomness source of a device or mediator.
///
/// # Contract
///
/// - `now()` is monotonic
/// - outside simulation, `random_bytes()` draws from a CSPRNG: envelope and
///   challenge nonces come from it
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic point in time. Differences are plain durations.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Monotonic now.
    fn now(&self) -> Self::Instant;

    /// Wall clock in milliseconds since the Unix epoch.
    ///
    /// Used for timestamps that travel inside envelopes. Never used for
    /// timeouts.
    fn wall_clock_millis(&self) -> u64;

    /// Wait for `duration`. State machines never call this; the link task
    /// and the outbound sync loops do.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u64`, big-endian from eight random bytes.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Fresh XChaCha20 nonce.
    fn random_nonce(&self) -> [u8; 24] {
        let mut nonce = [0u8; 24];
        self.random_bytes(&mut nonce);
        nonce
    }
}
