//! Host statistics sampling for the statmon agent.
//!
//! Each [`Sampler`] reads one category of statistics and returns it as a
//! [`GaugeSet`]. Which statistics are reported is fixed at compile time by
//! the [`Stat`] tables in each module.

pub mod cpu;
pub mod load;
pub mod memory;
pub mod random;

use anyhow::Result;
use statmon_common::types::GaugeSet;

/// A source of named gauge readings, polled once per poll tick.
///
/// Implementations own whatever handle they need into the OS and may cache
/// it between calls, hence `&mut self`.
pub trait Sampler: Send {
    /// Short category name (e.g. `"memory"`), used for logging.
    fn name(&self) -> &str;

    /// Takes one reading of every statistic this sampler knows about.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn sample(&mut self) -> Result<GaugeSet>;
}

/// One row of a static stat table: the reported name and how to read it.
pub struct Stat<S> {
    pub name: &'static str,
    pub read: fn(&S) -> f64,
}

/// Evaluates every row of `table` against `source`.
pub fn read_table<S>(table: &[Stat<S>], source: &S, out: &mut GaugeSet) {
    for stat in table {
        out.insert(stat.name.to_string(), (stat.read)(source));
    }
}

/// The full set of samplers the agent polls.
pub fn default_samplers() -> Vec<Box<dyn Sampler>> {
    vec![
        Box::new(memory::MemorySampler::new()),
        Box::new(load::LoadSampler::new()),
        Box::new(cpu::CpuSampler::new()),
        Box::new(random::RandomSampler::new()),
    ]
}

/// Runs every sampler and merges the results. A failing sampler is logged
/// and skipped so one broken source does not starve the others.
pub fn sample_all(samplers: &mut [Box<dyn Sampler>]) -> GaugeSet {
    let mut merged = GaugeSet::new();
    for sampler in samplers.iter_mut() {
        match sampler.sample() {
            Ok(set) => merged.extend(set),
            Err(e) => tracing::warn!(sampler = sampler.name(), error = %e, "Sampling failed"),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, f64);

    impl Sampler for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn sample(&mut self) -> Result<GaugeSet> {
            Ok(GaugeSet::from([(self.0.to_string(), self.1)]))
        }
    }

    struct Broken;

    impl Sampler for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn sample(&mut self) -> Result<GaugeSet> {
            anyhow::bail!("no such device")
        }
    }

    #[test]
    fn test_sample_all_skips_failures() {
        let mut samplers: Vec<Box<dyn Sampler>> =
            vec![Box::new(Fixed("a", 1.0)), Box::new(Broken), Box::new(Fixed("b", 2.0))];
        let merged = sample_all(&mut samplers);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["a"], 1.0);
        assert_eq!(merged["b"], 2.0);
    }

    #[test]
    fn test_default_samplers_report_core_names() {
        let mut samplers = default_samplers();
        let merged = sample_all(&mut samplers);
        for name in ["TotalMemory", "FreeMemory", "CPUutilization1", "RandomValue"] {
            assert!(merged.contains_key(name), "missing {name}");
        }
    }
}
