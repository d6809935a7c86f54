use tracing::debug;

/// Strategy for recalibrating phi at the end of each sub-iteration block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PhiUpdater {
    /// `phi · gamma^sign(a_target - rate)`.
    #[default]
    Geometric,
}

impl PhiUpdater {
    pub fn next_phi(self, phi: f64, gamma: f64, a_target: f64, acceptance_rate: f64) -> f64 {
        match self {
            PhiUpdater::Geometric => {
                let diff = a_target - acceptance_rate;
                let sign = if diff > 0.0 {
                    1
                } else if diff < 0.0 {
                    -1
                } else {
                    0
                };
                phi * gamma.powi(sign)
            }
        }
    }
}

/// Bias state of the running controller: current phi plus this block's acceptance bits.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasState {
    phi: f64,
    gamma: f64,
    a_target: f64,
    updater: PhiUpdater,
    accepted: Vec<bool>,
}

impl BiasState {
    pub fn new(phi: f64, gamma: f64, a_target: f64, updater: PhiUpdater, block_len: usize) -> Self {
        Self {
            phi,
            gamma,
            a_target,
            updater,
            accepted: Vec::with_capacity(block_len),
        }
    }

    #[inline]
    pub fn phi(&self) -> f64 {
        self.phi
    }

    pub fn record(&mut self, accepted: bool) {
        self.accepted.push(accepted);
    }

    pub fn block_bits(&self) -> &[bool] {
        &self.accepted
    }

    /// Mean of the bits recorded so far in this block, or `0.0` for an empty block.
    pub fn acceptance_rate(&self) -> f64 {
        if self.accepted.is_empty() {
            return 0.0;
        }
        self.accepted.iter().filter(|&&a| a).count() as f64 / self.accepted.len() as f64
    }

    /// Applies the phi update for the finished block and clears its bits. Returns the rate.
    pub fn end_block(&mut self) -> f64 {
        let rate = self.acceptance_rate();
        let previous = self.phi;
        self.phi = self
            .updater
            .next_phi(self.phi, self.gamma, self.a_target, rate);
        debug!(
            acceptance_rate = rate,
            phi_old = previous,
            phi_new = self.phi,
            "Phi recalibrated."
        );
        self.accepted.clear();
        rate
    }
}
