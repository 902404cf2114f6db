/// Running average over scalar loss values within one epoch.
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    sum: f64,
    count: usize,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Arithmetic mean of all values since the last reset; zero when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_matches_arithmetic_mean() {
        let mut meter = AverageMeter::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            meter.update(v);
        }
        assert_eq!(meter.count(), 4);
        assert!((meter.mean() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn empty_meter_reports_zero() {
        assert_eq!(AverageMeter::new().mean(), 0.0);
    }

    #[test]
    fn reset_clears_history() {
        let mut meter = AverageMeter::new();
        meter.update(10.0);
        meter.reset();
        meter.update(2.0);
        assert!((meter.mean() - 2.0).abs() < 1e-12);
        assert_eq!(meter.count(), 1);
    }
}
