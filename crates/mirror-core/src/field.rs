//! Reference field sampler: a decaying EMA over submitted PAD vectors.
//!
//! Production deployments plug their own [`FieldSampler`](crate::cycle::FieldSampler);
//! this one backs the CLI simulation and the integration tests.

use crate::domain::{dt_ms, FieldState};

/// Clamp each component to [0, 1]. NaN maps to 0.
pub fn clamp_pad(values: [f64; 3]) -> [f64; 3] {
    values.map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) })
}

#[derive(Debug, Clone)]
pub struct AstroField {
    alpha: f64,
    decay: f64,
    pad: [f64; 3],
    samples: u64,
    connected: u32,
    last_ms: Option<i64>,
}

impl Default for AstroField {
    fn default() -> Self {
        Self::new(0.15, 0.98)
    }
}

impl AstroField {
    /// `alpha` is the EMA weight of a new sample; `decay` the per-second
    /// relaxation factor applied before each update.
    pub fn new(alpha: f64, decay: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            decay: decay.clamp(0.0, 1.0),
            pad: [0.0; 3],
            samples: 0,
            connected: 0,
            last_ms: None,
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn pad(&self) -> [f64; 3] {
        self.pad
    }

    pub fn set_connected(&mut self, connected: u32) {
        self.connected = connected;
    }

    /// Fold one PAD vector into the field and return the resulting state.
    pub fn integrate(&mut self, pad: [f64; 3], now_ms: i64) -> FieldState {
        let elapsed_s = self
            .last_ms
            .map_or(0.0, |last| dt_ms(now_ms, last) as f64 / 1000.0);
        self.last_ms = Some(now_ms);

        // At least one step of relaxation per update, even for bursts.
        let factor = self.decay.powf(elapsed_s.max(1.0));
        for p in self.pad.iter_mut() {
            *p *= factor;
        }

        let values = clamp_pad(pad);
        if self.samples == 0 {
            self.pad = values;
        } else {
            for (p, x) in self.pad.iter_mut().zip(values) {
                *p = *p * (1.0 - self.alpha) + x * self.alpha;
            }
        }
        self.samples += 1;

        self.snapshot(now_ms)
    }

    /// Current state without integrating anything.
    pub fn snapshot(&self, now_ms: i64) -> FieldState {
        let entropy = self.entropy();
        FieldState {
            pad: self.pad,
            entropy,
            coherence: (1.0 - entropy).clamp(0.0, 1.0),
            connected: self.connected,
            ts_ms: now_ms,
        }
    }

    fn entropy(&self) -> f64 {
        let magnitude = self.pad.iter().map(|p| p * p).sum::<f64>().sqrt();
        (1.0 - magnitude.min(1.0)).max(0.0)
    }
}
