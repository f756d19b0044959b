use crate::{read_table, Sampler, Stat};
use anyhow::Result;
use statmon_common::types::GaugeSet;
use sysinfo::{LoadAvg, System};

// CPUutilization1 is the one-minute load average.
static LOAD_STATS: &[Stat<LoadAvg>] = &[
    Stat { name: "CPUutilization1", read: |l| l.one },
    Stat { name: "LoadAverage5", read: |l| l.five },
    Stat { name: "LoadAverage15", read: |l| l.fifteen },
];

pub struct LoadSampler;

impl LoadSampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for LoadSampler {
    fn name(&self) -> &str {
        "load"
    }

    fn sample(&mut self) -> Result<GaugeSet> {
        let mut out = GaugeSet::new();
        read_table(LOAD_STATS, &System::load_average(), &mut out);
        out.insert("Uptime".to_string(), System::uptime() as f64);
        Ok(out)
    }
}
