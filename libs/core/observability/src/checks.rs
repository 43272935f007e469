use metrics::{counter, histogram};
use std::time::Duration;

/// Metrics for the account lifecycle checks
pub struct CheckMetrics;

impl CheckMetrics {
    pub fn record_run(task_id: &str, occurrences: usize, elapsed: Duration) {
        counter!("account_check_runs_total", "task_id" => task_id.to_string(), "outcome" => "ok")
            .increment(1);
        counter!("account_check_occurrences_total", "task_id" => task_id.to_string())
            .increment(occurrences as u64);
        histogram!("account_check_duration_seconds", "task_id" => task_id.to_string())
            .record(elapsed.as_secs_f64());
    }

    pub fn record_failure(task_id: &str, elapsed: Duration) {
        counter!("account_check_runs_total", "task_id" => task_id.to_string(), "outcome" => "error")
            .increment(1);
        histogram!("account_check_duration_seconds", "task_id" => task_id.to_string())
            .record(elapsed.as_secs_f64());
    }
}
