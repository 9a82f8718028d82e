use drover_core::events::HostUsage;
use sysinfo::System;

/// Samples host load and memory for the traffic snapshot.
pub struct HostSampler {
    system: System,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn sample(&mut self) -> HostUsage {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };

        HostUsage {
            cpu_load: System::load_average().one,
            memory_percent,
            uptime_secs: System::uptime(),
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_in_range() {
        let mut sampler = HostSampler::new();
        let usage = sampler.sample();
        assert!((0.0..=100.0).contains(&usage.memory_percent));
        assert!(usage.cpu_load >= 0.0);
    }
}
