//! Station statistics printed at shutdown.

use std::time::Duration;

use dispatcher::DispatchStats;
use ingestion::SourceStats;

/// Statistics from a station run
#[derive(Debug, Clone)]
pub struct StationStats {
    /// Total duration of the run
    pub duration: Duration,

    /// Capture source counters
    pub capture: SourceStats,

    /// Telemetry source counters
    pub telemetry: SourceStats,

    /// Dashboard viewers still attached at shutdown
    pub dashboard_viewers: usize,

    /// Dispatcher totals and final per-sink status
    pub dispatch: DispatchStats,
}

impl StationStats {
    /// Frames dispatched per second
    pub fn dispatch_fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.dispatch.frames as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     Station Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Ticks: {}", self.dispatch.ticks);
        println!("   ├─ Frames dispatched: {}", self.dispatch.frames);
        println!("   ├─ Snapshots dispatched: {}", self.dispatch.snapshots);
        println!("   ├─ Dispatch FPS: {:.2}", self.dispatch_fps());
        println!("   └─ Tick latency (ms): {}", self.dispatch.tick_latency_ms);

        println!("\n📥 Sources");
        println!(
            "   ├─ Capture: {} published, {} stale, {} errors",
            self.capture.published, self.capture.stale, self.capture.errors
        );
        println!(
            "   └─ Telemetry: {} published, {} errors",
            self.telemetry.published, self.telemetry.errors
        );

        println!("\n📤 Sinks ({})", self.dispatch.sinks.len());
        for (i, sink) in self.dispatch.sinks.iter().enumerate() {
            let is_last = i == self.dispatch.sinks.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            let m = &sink.metrics;
            println!(
                "   {} {} [{}]: delivered {}, dropped {}, failures {}, discarded {}, restarts {}",
                prefix,
                sink.name,
                sink.sink_type.map(|t| t.as_str()).unwrap_or("custom"),
                m.write_count,
                m.dropped_count,
                m.failure_count,
                m.discarded_count,
                m.restart_count
            );
        }

        if self.dashboard_viewers > 0 {
            println!("\n🖥  Dashboard viewers at shutdown: {}", self.dashboard_viewers);
        }

        println!();
    }
}
