use hdrhistogram::Histogram;
use serde::Serialize;

/// Quantiles reported for every recording-cost histogram.
const QUANTILES: [f64; 5] = [0.5, 0.9, 0.95, 0.99, 0.999];

/// One quantile of a histogram, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuantileValue {
    pub quantile: f64,
    pub value_ns: u64,
}

/// Summary of how long a batch of recording calls took, in nanoseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PercentileSet {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub quantiles: Vec<QuantileValue>,
}

impl PercentileSet {
    /// Empty histograms summarize to all zeroes with no quantiles.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::default();
        }

        Self {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            quantiles: QUANTILES
                .iter()
                .map(|&q| QuantileValue {
                    quantile: q,
                    value_ns: hist.value_at_quantile(q),
                })
                .collect(),
        }
    }

    /// Value at `quantile` if it is one of the reported quantiles.
    pub fn value_at(&self, quantile: f64) -> Option<u64> {
        self.quantiles
            .iter()
            .find(|q| q.quantile == quantile)
            .map(|q| q.value_ns)
    }
}
