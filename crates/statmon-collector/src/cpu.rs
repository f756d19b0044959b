use crate::Sampler;
use anyhow::Result;
use statmon_common::types::GaugeSet;
use sysinfo::System;

/// Global and per-core CPU usage in percent.
///
/// The first reading after construction may be zero; sysinfo needs two
/// refreshes to compute a delta.
pub struct CpuSampler {
    system: System,
}

impl CpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for CpuSampler {
    fn name(&self) -> &str {
        "cpu"
    }

    fn sample(&mut self) -> Result<GaugeSet> {
        self.system.refresh_cpu_all();
        let mut out = GaugeSet::new();
        out.insert("CPUUsage".to_string(), self.system.global_cpu_usage() as f64);
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            out.insert(format!("CPUCore{}", i + 1), cpu.cpu_usage() as f64);
        }
        Ok(out)
    }
}
