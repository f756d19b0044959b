use crate::{read_table, Sampler, Stat};
use anyhow::Result;
use statmon_common::types::GaugeSet;
use sysinfo::System;

static MEMORY_STATS: &[Stat<System>] = &[
    Stat { name: "TotalMemory", read: |s| s.total_memory() as f64 },
    Stat { name: "FreeMemory", read: |s| s.free_memory() as f64 },
    Stat { name: "AvailableMemory", read: |s| s.available_memory() as f64 },
    Stat { name: "UsedMemory", read: |s| s.used_memory() as f64 },
    Stat { name: "TotalSwap", read: |s| s.total_swap() as f64 },
    Stat { name: "UsedSwap", read: |s| s.used_swap() as f64 },
];

pub struct MemorySampler {
    system: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for MemorySampler {
    fn name(&self) -> &str {
        "memory"
    }

    fn sample(&mut self) -> Result<GaugeSet> {
        self.system.refresh_memory();
        let mut out = GaugeSet::new();
        read_table(MEMORY_STATS, &self.system, &mut out);
        Ok(out)
    }
}
