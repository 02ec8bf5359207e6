use anyhow::Result;
use serde::{Deserialize, Serialize};

use vcguard::bandwidth::Bandwidth;
use vcguard::stats::Stats;
use vcguard::{Brain, BrainSetting, Timestamp};

use crate::config::ExperimentConfig;
use crate::workload::Workload;

/// What a trial leaves behind: the brain's counters plus the revenue of the admitted tenants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub trial: usize,
    pub stats: Stats,
    /// sum of N * B * lifetime over admitted tenants, in Mb/s * seconds
    pub revenue: f64,
    /// largest backup bandwidth held at once across all links
    pub peak_backup: Bandwidth,
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "trial {}: {}, peak backup: {}, revenue: {:.1}",
            self.trial, self.stats, self.peak_backup, self.revenue
        )
    }
}

/// Revenue earned from the admitted tenants; requests still active are charged up to `now`.
pub fn revenue(brain: &Brain, now: Timestamp) -> f64 {
    brain
        .requests()
        .values()
        .filter(|r| r.admitted)
        .map(|r| {
            let start = r.arrival.unwrap_or(now);
            let end = r.departure.unwrap_or(now).max(start);
            let secs = (end - start) as f64 / 1000.0;
            r.n as f64 * r.bw.as_mbps_f64() * secs
        })
        .sum()
}

/// Replay one freshly generated workload against a fresh brain.
pub fn run_trial(config: &ExperimentConfig, trial: usize) -> Result<Report> {
    let setting = BrainSetting {
        seed: config.brain.seed + trial as u64,
        ..config.brain.clone()
    };
    let mut brain = Brain::new(setting)?;
    let workload = Workload::generate(config, config.seed + trial as u64)?;

    let mut peak_backup = Bandwidth::zero();
    let mut now = 0;
    for event in &workload.events {
        brain.process(event)?;
        now = event.ts;
        if config.audit {
            brain.audit()?;
        }
        peak_backup = peak_backup.max(brain.stats().reserved_backup);
    }

    let stats = brain.stats();
    log::info!("trial {} finished at {} ms: {}", trial, now, stats);

    Ok(Report {
        trial,
        revenue: revenue(&brain, now),
        peak_backup,
        stats,
    })
}
