use std::time::{Duration, Instant};

use crate::logging::Logger;

pub struct ScopedExecutionTimer<'a> {
    task_name: &'a str,
    context: Option<&'a str>,
    started_at: Instant,
    logger: &'a Logger,
}

impl<'a> ScopedExecutionTimer<'a> {
    pub fn new(task_name: &'a str, context: Option<&'a str>, logger: &'a Logger) -> Self {
        Self {
            task_name,
            context,
            started_at: Instant::now(),
            logger,
        }
    }
}

impl Drop for ScopedExecutionTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.started_at.elapsed();
        self.logger.debug(
            self.context,
            &format!(
                "task '{}' finished in {}",
                self.task_name,
                format_duration_human_friendly(elapsed)
            ),
        );
    }
}

pub fn measure_execution<T, F>(
    task_name: &str,
    context: Option<&str>,
    logger: &Logger,
    task: F,
) -> T
where
    F: FnOnce() -> T,
{
    let timer = ScopedExecutionTimer::new(task_name, context, logger);
    let result = task();
    drop(timer);
    result
}

/// Splits one frame's wall time into consecutive stages.
#[derive(Clone, Copy, Debug)]
pub struct LapTimer {
    started_at: Instant,
    last_lap_at: Instant,
}

impl LapTimer {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started_at: now,
            last_lap_at: now,
        }
    }

    /// Time since the previous lap (or since start).
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now - self.last_lap_at;
        self.last_lap_at = now;
        lap
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn total(&self) -> Duration {
        self.last_lap_at - self.started_at
    }
}

/// Frames per second implied by one frame taking `frame_time`; 0 for an empty interval.
pub fn achieved_rate(frame_time: Duration) -> f64 {
    if frame_time.is_zero() {
        0.0
    } else {
        1.0 / frame_time.as_secs_f64()
    }
}

fn format_duration_human_friendly(duration: Duration) -> String {
    let total_ms = duration.as_secs_f64() * 1000.0;
    if total_ms < 1_000.0 {
        return format!("{total_ms:.2} ms");
    }

    let total_seconds = total_ms / 1_000.0;
    if total_seconds < 60.0 {
        return format!("{total_ms:.2} ms ({total_seconds:.2} s)");
    }

    let minutes = (total_seconds / 60.0).floor();
    let seconds_remainder = total_seconds - (minutes * 60.0);
    format!("{total_ms:.2} ms ({minutes:.0}m {seconds_remainder:.2}s)")
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use crate::logging::tests::memory_logger;

    use super::{achieved_rate, format_duration_human_friendly, measure_execution, LapTimer};

    #[test]
    fn formats_durations_by_magnitude() {
        assert_eq!(format_duration_human_friendly(Duration::from_millis(250)), "250.00 ms");
        assert_eq!(
            format_duration_human_friendly(Duration::from_millis(1_500)),
            "1500.00 ms (1.50 s)"
        );
        assert_eq!(
            format_duration_human_friendly(Duration::from_secs(90)),
            "90000.00 ms (1m 30.00s)"
        );
    }

    #[test]
    fn measure_execution_logs_debug_with_task_name() {
        let (logger, sink) = memory_logger();

        let value = measure_execution("render.pack_sequence", Some("tests::timing"), &logger, || 7);
        assert_eq!(value, 7);
        assert!(sink.contains("[DEBUG]"));
        assert!(sink.contains("task 'render.pack_sequence' finished in"));
    }

    #[test]
    fn laps_add_up_to_total() {
        let mut timer = LapTimer::start();
        thread::sleep(Duration::from_millis(5));
        let first = timer.lap();
        let second = timer.lap();

        assert!(first >= Duration::from_millis(5));
        assert_eq!(timer.total(), first + second);
    }

    #[test]
    fn achieved_rate_inverts_frame_time() {
        assert_eq!(achieved_rate(Duration::ZERO), 0.0);
        assert!((achieved_rate(Duration::from_millis(40)) - 25.0).abs() < 1e-9);
    }
}
