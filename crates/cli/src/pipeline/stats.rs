//! Run statistics and summary output.

use std::time::Duration;

use orchestrator::{InstanceReport, ReportRecord};
use serde::Serialize;

/// Statistics from a bridge run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Wall-clock duration of the run
    pub duration: Duration,

    /// Why the run was cut short (`signal`, `timeout`), if it was
    pub interrupted: Option<&'static str>,

    /// Reports of the instances that ended cleanly
    pub reports: Vec<InstanceReport>,

    /// (instance, error) for the instances that failed
    pub failures: Vec<(String, String)>,
}

/// JSON form of [`RunStats`]
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<&'static str>,
    pub instances: Vec<ReportRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
}

#[derive(Debug, Serialize)]
pub struct FailureRecord {
    pub instance_id: String,
    pub error: String,
}

impl RunStats {
    /// Frames stepped across all instances
    pub fn total_frames(&self) -> u64 {
        self.reports.iter().map(|r| r.simulation.frames).sum()
    }

    /// Aggregate frames per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.total_frames() as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            duration_secs: self.duration.as_secs_f64(),
            interrupted: self.interrupted,
            instances: self.reports.iter().map(ReportRecord::from).collect(),
            failures: self
                .failures
                .iter()
                .map(|(instance_id, error)| FailureRecord {
                    instance_id: instance_id.clone(),
                    error: error.clone(),
                })
                .collect(),
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Traffic Bridge Summary                    ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Instances: {}", self.reports.len() + self.failures.len());
        println!("   ├─ Frames: {}", self.total_frames());
        println!("   ├─ FPS: {:.2}", self.fps());
        match self.interrupted {
            Some(reason) => println!("   └─ Stopped by: {}", reason),
            None => println!("   └─ Stopped by: frame limit"),
        }

        for report in &self.reports {
            let timing = &report.simulation.timing;
            let stats = &report.stats;
            println!("\n📈 Instance {}", report.instance_id);
            println!("   ├─ Frames: {} (collected {})", report.simulation.frames, report.frames_collected);
            println!("   ├─ Frame time (ms): {}", timing.frame_time_ms);
            println!("   ├─ Step timeouts: {}", timing.step_timeouts);
            println!("   ├─ Commands executed: {}", timing.commands_executed);
            if let Some(count) = report.simulation.vehicle_count {
                println!("   ├─ Vehicles at end: {}", count);
            }
            println!(
                "   ├─ Documents written: {} ({} failed)",
                stats.documents_written, stats.write_failures
            );
            println!(
                "   ├─ Hazards: {} recorded, {} stops planned",
                stats.hazards_recorded, stats.stops_planned
            );
            println!(
                "   ├─ Proximity: {} braked, {} removed",
                stats.vehicles_braked, stats.vehicles_removed
            );
            println!(
                "   └─ Egos: {} registered, {} removed, {} routes planned",
                stats.egos_registered, stats.egos_removed, stats.routes_planned
            );
        }

        if !self.failures.is_empty() {
            println!("\n⚠️  Failed Instances");
            for (instance, error) in &self.failures {
                println!("   ├─ {}: {}", instance, error);
            }
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_and_record() {
        let stats = RunStats {
            duration: Duration::from_secs(2),
            interrupted: Some("timeout"),
            reports: Vec::new(),
            failures: vec![("XD".into(), "boom".into())],
        };
        assert_eq!(stats.total_frames(), 0);
        assert_eq!(stats.fps(), 0.0);

        let json = serde_json::to_value(stats.to_record()).unwrap();
        assert_eq!(json["interrupted"], "timeout");
        assert_eq!(json["failures"][0]["instance_id"], "XD");
        assert_eq!(json["duration_secs"], 2.0);
    }
}
