use crate::Sampler;
use anyhow::Result;
use rand::Rng;
use statmon_common::types::GaugeSet;

/// Reports `RandomValue`, a uniform draw in `[0, 1)`. Useful for checking
/// end to end that gauges actually change between reports.
pub struct RandomSampler;

impl RandomSampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RandomSampler {
    fn name(&self) -> &str {
        "random"
    }

    fn sample(&mut self) -> Result<GaugeSet> {
        let v: f64 = rand::thread_rng().gen();
        Ok(GaugeSet::from([("RandomValue".to_string(), v)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_in_unit_interval() {
        let mut s = RandomSampler::new();
        for _ in 0..100 {
            let v = s.sample().unwrap()["RandomValue"];
            assert!((0.0..1.0).contains(&v));
        }
    }
}
