//! Population statistics for spend-series scoring.

/// Mean and population standard deviation of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

/// Summarize a series. Returns `None` for an empty series.
pub fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(Summary {
        count: values.len(),
        mean,
        std_dev: variance.sqrt(),
    })
}

impl Summary {
    /// Z-score of `value`, with the standard deviation floored at
    /// `floor_fraction * |mean|` (and at `f64::EPSILON`) so a flat baseline
    /// still yields a finite score.
    pub fn z_score(&self, value: f64, floor_fraction: f64) -> f64 {
        let floor = (self.mean.abs() * floor_fraction).max(f64::EPSILON);
        (value - self.mean) / self.std_dev.max(floor)
    }
}
