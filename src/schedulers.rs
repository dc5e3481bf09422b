//! Learning-rate schedules.

use tracing::debug;

/// Reduce learning rate on plateau (when the monitored loss stops improving)
#[derive(Clone, Debug)]
pub struct ReduceLROnPlateau {
    factor: f64,
    patience: usize,
    threshold: f64,
    cooldown: usize,
    min_lr: f64,
    best_loss: f64,
    wait_count: usize,
    cooldown_counter: usize,
    current_lr: Option<f64>,
}

impl ReduceLROnPlateau {
    pub fn new(factor: f64, patience: usize) -> Self {
        Self::with_params(factor, patience, 1e-4, 0, 0.0)
    }

    pub fn with_params(
        factor: f64,
        patience: usize,
        threshold: f64,
        cooldown: usize,
        min_lr: f64,
    ) -> Self {
        ReduceLROnPlateau {
            factor,
            patience,
            threshold,
            cooldown,
            min_lr,
            best_loss: f64::INFINITY,
            wait_count: 0,
            cooldown_counter: 0,
            current_lr: None,
        }
    }

    /// Update the scheduler with the latest monitored loss and return the
    /// learning rate to use for the next epoch
    pub fn step(&mut self, loss: f64, base_lr: f64) -> f64 {
        let current = *self.current_lr.get_or_insert(base_lr);

        if self.cooldown_counter > 0 {
            self.cooldown_counter -= 1;
            return current;
        }

        if loss < self.best_loss - self.threshold {
            self.best_loss = loss;
            self.wait_count = 0;
        } else {
            self.wait_count += 1;

            if self.wait_count >= self.patience {
                let reduced = (current * self.factor).max(self.min_lr);
                if reduced < current {
                    debug!(from = current, to = reduced, "reducing learning rate on plateau");
                }
                self.current_lr = Some(reduced);
                self.wait_count = 0;
                self.cooldown_counter = self.cooldown;
                return reduced;
            }
        }

        current
    }

    pub fn reset(&mut self) {
        self.best_loss = f64::INFINITY;
        self.wait_count = 0;
        self.cooldown_counter = 0;
        self.current_lr = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_on_plateau_after_patience() {
        let mut scheduler = ReduceLROnPlateau::new(0.5, 2);

        assert_eq!(scheduler.step(1.0, 0.01), 0.01);
        assert_eq!(scheduler.step(1.0, 0.01), 0.01);
        assert_eq!(scheduler.step(1.0, 0.01), 0.005);
        // Improvement resets the wait counter
        assert_eq!(scheduler.step(0.5, 0.01), 0.005);
        assert_eq!(scheduler.step(0.5, 0.01), 0.005);
    }

    #[test]
    fn test_min_lr_floor() {
        let mut scheduler = ReduceLROnPlateau::with_params(0.1, 1, 1e-4, 0, 1e-3);
        scheduler.step(1.0, 0.01);
        assert!((scheduler.step(1.0, 0.01) - 1e-3).abs() < 1e-12);
        assert!((scheduler.step(1.0, 0.01) - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_reset() {
        let mut scheduler = ReduceLROnPlateau::new(0.5, 1);
        scheduler.step(1.0, 0.01);
        scheduler.step(1.0, 0.01);
        scheduler.reset();
        assert_eq!(scheduler.step(1.0, 0.02), 0.02);
    }
}
