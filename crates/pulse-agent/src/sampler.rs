// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Samplers refresh a local `name -> value` map on every poll cycle.
//!
//! A failed read leaves the previous value stale rather than failing the
//! probe; samplers never return errors.

use rand::Rng;
use std::collections::HashMap;
use sysinfo::{Pid, System};
use tracing::debug;

pub trait Sampler: Send {
    /// Short identifier used in logs and delivery outcomes.
    fn name(&self) -> &'static str;

    /// Recomputes the sample set into `samples`.
    fn refresh(&mut self, samples: &mut HashMap<String, f64>);
}

/// Process-level runtime statistics plus the `RandomValue` gauge.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            debug!("could not resolve own pid; process stats will be absent");
        }
        RuntimeSampler {
            system: System::new(),
            pid,
        }
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RuntimeSampler {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn refresh(&mut self, samples: &mut HashMap<String, f64>) {
        if let Some(pid) = self.pid {
            if self.system.refresh_process(pid) {
                if let Some(process) = self.system.process(pid) {
                    samples.insert("ResidentMemory".to_string(), process.memory() as f64);
                    samples.insert("VirtualMemory".to_string(), process.virtual_memory() as f64);
                    samples.insert("ProcessCpu".to_string(), f64::from(process.cpu_usage()));
                    samples.insert("RunTimeSeconds".to_string(), process.run_time() as f64);
                }
            } else {
                debug!("process stat refresh failed; keeping stale values");
            }
        }
        samples.insert("RandomValue".to_string(), rand::thread_rng().gen::<f64>());
    }
}

/// OS-level memory and per-CPU utilization figures.
pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        SystemSampler {
            system: System::new(),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn name(&self) -> &'static str {
        "system"
    }

    fn refresh(&mut self, samples: &mut HashMap<String, f64>) {
        self.system.refresh_memory();
        samples.insert("TotalMemory".to_string(), self.system.total_memory() as f64);
        samples.insert("FreeMemory".to_string(), self.system.free_memory() as f64);

        self.system.refresh_cpu_usage();
        for (index, cpu) in self.system.cpus().iter().enumerate() {
            samples.insert(
                format!("CPUutilization{index}"),
                f64::from(cpu.cpu_usage()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_sampler_emits_random_value_every_cycle() {
        let mut sampler = RuntimeSampler::new();
        let mut samples = HashMap::new();

        sampler.refresh(&mut samples);
        assert!(samples.contains_key("RandomValue"));
        let first = samples["RandomValue"];

        sampler.refresh(&mut samples);
        // Astronomically unlikely to collide.
        assert_ne!(samples["RandomValue"], first);
    }

    #[test]
    fn system_sampler_reports_memory_and_cpus() {
        let mut sampler = SystemSampler::new();
        let mut samples = HashMap::new();
        sampler.refresh(&mut samples);

        assert!(samples["TotalMemory"] > 0.0);
        assert!(samples.contains_key("FreeMemory"));
        assert!(samples.contains_key("CPUutilization0"));
    }

    #[test]
    fn stale_values_survive_refreshes() {
        let mut sampler = SystemSampler::new();
        let mut samples = HashMap::new();
        samples.insert("TotalMemory".to_string(), -1.0);

        sampler.refresh(&mut samples);
        assert_ne!(samples["TotalMemory"], -1.0);
    }
}
