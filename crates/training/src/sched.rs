/// Reduce-on-plateau learning rate schedule driven by validation loss.
///
/// Tracks the best metric seen so far with a relative improvement threshold;
/// once the stagnation streak exceeds the configured patience the learning
/// rate is multiplied by `factor` (clamped to `min_lr`) and the streak
/// resets. Non-finite metrics leave the state untouched.
#[derive(Debug, Clone)]
pub struct ReduceOnPlateau {
    lr: f64,
    factor: f64,
    patience: usize,
    threshold: f64,
    min_lr: f64,
    best: Option<f64>,
    bad_epochs: usize,
}

impl ReduceOnPlateau {
    pub fn new(lr: f64, patience: usize) -> Self {
        Self {
            lr,
            factor: 0.1,
            patience,
            threshold: 1e-4,
            min_lr: 0.0,
            best: None,
            bad_epochs: 0,
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Record one epoch's validation loss and return the learning rate to
    /// use from here on.
    pub fn observe(&mut self, metric: f64) -> f64 {
        if !metric.is_finite() {
            tracing::warn!(metric, "validation loss is not finite; skipping plateau update");
            return self.lr;
        }
        let improved = match self.best {
            None => true,
            Some(best) => metric < best * (1.0 - self.threshold),
        };
        if improved {
            self.best = Some(metric);
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
            if self.bad_epochs > self.patience {
                let next = (self.lr * self.factor).max(self.min_lr);
                if next < self.lr {
                    tracing::info!(
                        old_lr = self.lr,
                        new_lr = next,
                        best = self.best,
                        "validation loss plateaued; reducing learning rate"
                    );
                    self.lr = next;
                }
                self.bad_epochs = 0;
            }
        }
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improving_metrics_keep_the_rate() {
        let mut sched = ReduceOnPlateau::new(0.1, 2);
        for loss in [1.0, 0.9, 0.8, 0.7] {
            assert_eq!(sched.observe(loss), 0.1);
        }
    }

    #[test]
    fn stagnation_beyond_patience_reduces_by_factor() {
        let mut sched = ReduceOnPlateau::new(0.1, 2);
        sched.observe(1.0);
        sched.observe(1.0); // bad 1
        sched.observe(1.0); // bad 2
        assert_eq!(sched.lr(), 0.1);
        let lr = sched.observe(1.0); // bad 3 > patience
        assert!((lr - 0.01).abs() < 1e-12);
    }

    #[test]
    fn sub_threshold_improvement_counts_as_stagnation() {
        let mut sched = ReduceOnPlateau::new(0.1, 0);
        sched.observe(1.0);
        // Better, but not by the relative threshold.
        let lr = sched.observe(1.0 - 1e-6);
        assert!((lr - 0.01).abs() < 1e-12);
    }

    #[test]
    fn rate_never_drops_below_min_lr() {
        let mut sched = ReduceOnPlateau::new(1e-3, 0).with_min_lr(1e-4);
        sched.observe(1.0);
        sched.observe(1.0);
        sched.observe(1.0);
        assert!((sched.lr() - 1e-4).abs() < 1e-15);
    }

    #[test]
    fn non_finite_metric_is_ignored() {
        let mut sched = ReduceOnPlateau::new(0.1, 0);
        sched.observe(1.0);
        assert_eq!(sched.observe(f64::NAN), 0.1);
        assert_eq!(sched.lr(), 0.1);
    }
}
