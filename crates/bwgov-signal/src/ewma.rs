/// Exponentially weighted moving average.
/// `smoothed = alpha * x + (1 - alpha) * smoothed_prev`; the first sample seeds it.
#[derive(Debug, Clone, Copy)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self { alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0), value: None }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}
