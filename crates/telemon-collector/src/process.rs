use crate::Collector;
use anyhow::{anyhow, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use telemon_common::Metric;

/// Samples this agent process: memory, CPU, uptime, disk I/O and the
/// number of runtime worker threads.
pub struct ProcessCollector {
    system: System,
    pid: Pid,
}

impl ProcessCollector {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("current pid: {e}"))?;
        let mut collector = Self {
            system: System::new(),
            pid,
        };
        // CPU usage is a delta between two refreshes; prime the first one.
        collector.refresh();
        Ok(collector)
    }

    fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new()
                .with_cpu()
                .with_memory()
                .with_disk_usage(),
        );
    }
}

impl Collector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.refresh();
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow!("process {} not found", self.pid))?;
        let disk = process.disk_usage();

        let mut metrics = vec![
            Metric::gauge("ResidentMemory", process.memory() as f64),
            Metric::gauge("VirtualMemory", process.virtual_memory() as f64),
            Metric::gauge("ProcessCPUUsage", process.cpu_usage() as f64),
            Metric::gauge("RunTime", process.run_time() as f64),
            Metric::gauge("DiskReadBytes", disk.total_read_bytes as f64),
            Metric::gauge("DiskWrittenBytes", disk.total_written_bytes as f64),
        ];
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            metrics.push(Metric::gauge(
                "RuntimeWorkers",
                handle.metrics().num_workers() as f64,
            ));
        }
        Ok(metrics)
    }
}
