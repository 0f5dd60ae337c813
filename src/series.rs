/// A uniformly sampled real-valued signal with an absolute GPS start time.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    pub start: f64,
    pub sample_rate: f64,
    pub samples: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
