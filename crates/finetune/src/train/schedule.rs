//! Learning-rate schedule: linear warmup from 0, then linear / cosine decay
//! to 0 over the remaining steps, or a constant rate.

use crate::config::LrSchedulerKind;

#[derive(Debug, Clone)]
pub struct LrScheduler {
    lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    kind: LrSchedulerKind,
}

impl LrScheduler {
    pub fn new(lr: f64, warmup_steps: usize, total_steps: usize, kind: LrSchedulerKind) -> Self {
        Self {
            lr,
            warmup_steps,
            total_steps,
            kind,
        }
    }

    /// Learning rate for the optimizer step with index `step` (0-based).
    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.lr * step as f64 / self.warmup_steps as f64;
        }

        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1);
        let progress = ((step - self.warmup_steps) as f64 / decay_steps as f64).min(1.0);

        match self.kind {
            LrSchedulerKind::Constant => self.lr,
            LrSchedulerKind::Linear => self.lr * (1.0 - progress),
            LrSchedulerKind::Cosine => {
                let cosine = (progress * std::f64::consts::PI).cos();
                self.lr * 0.5 * (1.0 + cosine)
            }
        }
    }
}
