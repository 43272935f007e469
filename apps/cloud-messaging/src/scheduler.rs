//! Cron-driven account checker ticks.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use domain_accounts::{AccountChecker, AccountStatusRepository, NotificationDispatcher, TaskReport};
use eyre::WrapErr;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// One line of the run dump
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDump {
    pub results: Vec<TaskReport>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Run every check once and append the outcome to `dump_path`.
pub async fn run_tick<R, D>(checker: &AccountChecker<R, D>, dump_path: &Path) -> eyre::Result<RunDump>
where
    R: AccountStatusRepository,
    D: NotificationDispatcher,
{
    let start_time = Utc::now();
    let results = checker.run_all().await;
    let dump = RunDump {
        results,
        start_time,
        end_time: Utc::now(),
    };

    append_line(dump_path, &serde_json::to_string(&dump)?).await?;
    Ok(dump)
}

async fn append_line(path: &Path, line: &str) -> eyre::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .wrap_err_with(|| format!("creating {}", parent.display()))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .wrap_err_with(|| format!("opening {}", path.display()))?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Register the account checker on `cron` (seconds first) in `timezone` and
/// start the scheduler. The caller owns shutdown.
pub async fn start_account_checker<R, D>(
    checker: Arc<AccountChecker<R, D>>,
    cron: &str,
    timezone: Tz,
    dump_path: PathBuf,
) -> eyre::Result<JobScheduler>
where
    R: AccountStatusRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    let sched = JobScheduler::new().await?;

    let job = Job::new_async_tz(cron, timezone, move |_uuid, _l| {
        let checker = checker.clone();
        let dump_path = dump_path.clone();

        Box::pin(async move {
            info!("Running scheduled account checks");
            match run_tick(&checker, &dump_path).await {
                Ok(dump) => {
                    let failed = dump.results.iter().filter(|r| r.is_failed()).count();
                    let notified: usize = dump.results.iter().map(TaskReport::occurrences).sum();
                    info!(notified, failed, "Scheduled account checks complete");
                }
                Err(e) => error!(error = %e, "Failed to record account check run"),
            }
        })
    })
    .wrap_err_with(|| format!("invalid account checker schedule '{cron}'"))?;

    sched.add(job).await?;
    sched.start().await?;
    info!(cron, timezone = %timezone, "Account checker scheduled");
    Ok(sched)
}
