//! Wall-clock accumulation and process memory sampling

use std::time::{Duration, Instant};

/// Accumulating stopwatch. Start/stop pairs add up; a second `start` while
/// running is a no-op.
#[derive(Debug, Default, Clone)]
pub struct Timer {
    total: Duration,
    started: Option<Instant>,
}

impl Timer {
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.total += started.elapsed();
        }
    }

    /// Accumulated seconds across all start/stop pairs.
    pub fn accumulated(&self) -> f64 {
        let mut total = self.total;
        if let Some(started) = self.started {
            total += started.elapsed();
        }
        total.as_secs_f64()
    }
}

/// Peak virtual memory and peak resident set of this process in kB, read
/// from /proc/self/status. Reports zeros on platforms without it.
pub fn process_mem_usage() -> (i64, i64) {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return (0, 0);
    };

    let mut vmpeak = 0;
    let mut vmhwm = 0;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmPeak:") {
            vmpeak = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("VmHWM:") {
            vmhwm = parse_kb(rest);
        }
    }
    (vmpeak, vmhwm)
}

fn parse_kb(rest: &str) -> i64 {
    rest.trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_accumulates() {
        let mut timer = Timer::default();
        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        timer.stop();

        let first = timer.accumulated();
        assert!(first > 0.0);

        timer.start();
        std::thread::sleep(Duration::from_millis(5));
        timer.stop();
        assert!(timer.accumulated() > first);
    }

    #[test]
    fn test_parse_kb() {
        assert_eq!(parse_kb("   123456 kB"), 123456);
        assert_eq!(parse_kb("garbage"), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_mem_usage_reports_something() {
        let (vmpeak, vmhwm) = process_mem_usage();
        assert!(vmpeak > 0);
        assert!(vmhwm > 0);
    }
}
