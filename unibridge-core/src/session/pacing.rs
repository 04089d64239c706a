use std::time::Duration;

use rand::{thread_rng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::time::sleep;
use tracing::{info, trace};

use crate::config::PacingSection;

/// Named waits between workflow steps. These delays are part of the domain
/// (platforms fingerprint machine-speed interaction), not retry backoff:
/// every send walks its stages at human pace, with each gap drawn from a
/// configured range.
pub struct Pacer {
    config: PacingSection,
    rng: Box<dyn RngCore>,
}

impl Pacer {
    pub fn new(config: PacingSection) -> Self {
        Self {
            config,
            rng: Box::new(thread_rng()),
        }
    }

    /// Deterministic pacing plan, used when a run must be reproducible.
    pub fn seeded(config: PacingSection, seed: u64) -> Self {
        Self {
            config,
            rng: Box::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }

    pub async fn after_navigation(&mut self) {
        let bounds = self.config.post_navigation_ms;
        self.wait("after_navigation", bounds).await;
    }

    pub async fn between_steps(&mut self) {
        let bounds = self.config.inter_step_ms;
        self.wait("between_steps", bounds).await;
    }

    pub async fn after_typing(&mut self) {
        let bounds = self.config.after_typing_ms;
        self.wait("after_typing", bounds).await;
    }

    /// Minutes-scale gap between consecutive sends in a batch.
    pub async fn between_sends(&mut self) {
        let [a, b] = self.config.between_sends_minutes;
        let low = a.min(b);
        let high = a.max(b);
        if high == 0 {
            return;
        }
        let minutes = self.rng.gen_range(low..=high);
        info!(minutes, "Waiting between sends");
        sleep(Duration::from_secs(minutes as u64 * 60)).await;
    }

    async fn wait(&mut self, step: &str, bounds: [u32; 2]) {
        let Some(delay) = self.random_duration(bounds) else {
            return;
        };
        trace!(step, delay_ms = delay.as_millis() as u64, "Pacing delay");
        sleep(delay).await;
    }

    fn random_duration(&mut self, bounds: [u32; 2]) -> Option<Duration> {
        let low = bounds[0].min(bounds[1]);
        let high = bounds[0].max(bounds[1]);
        if high == 0 {
            return None;
        }
        Some(Duration::from_millis(self.rng.gen_range(low..=high) as u64))
    }
}
