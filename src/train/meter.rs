//! Running averages of per-batch measurements

/// Incremental weighted mean
///
/// `avg = Σ value·weight / Σ weight`; a tracker that has seen nothing
/// reports `0.0`. Create a fresh tracker at the start of every phase.
///
/// # Example
///
/// ```
/// use segdepth::train::RunningAverage;
///
/// let mut loss = RunningAverage::new();
/// loss.update(2.0, 1.0);
/// loss.update(5.0, 2.0);
/// assert_eq!(loss.avg(), 4.0);
/// assert_eq!(loss.value(), 5.0);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverage {
    value: f32,
    sum: f64,
    count: f64,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` observed `weight` times
    pub fn update(&mut self, value: f32, weight: f64) {
        self.value = value;
        self.sum += value as f64 * weight;
        self.count += weight;
    }

    /// Record one unweighted observation
    pub fn push(&mut self, value: f32) {
        self.update(value, 1.0);
    }

    /// Last observed value
    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Total weight seen so far
    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn avg(&self) -> f32 {
        if self.count == 0.0 {
            0.0
        } else {
            (self.sum / self.count) as f32
        }
    }
}
