//! Lifecycle checks.
//!
//! Every check is a read, notify, mark cycle: one query over the account
//! store, one notification per matched account, then the check's flag is
//! set on each of them. The flag is part of the query, so a second run
//! without elapsed time matches nothing.

use chrono::{DateTime, Utc};
use futures::future::{join_all, try_join_all};
use mongodb::bson::oid::ObjectId;
use observability::checks::CheckMetrics;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{error, info, instrument};

use crate::clock::{Clock, SystemClock};
use crate::dispatcher::NotificationDispatcher;
use crate::error::{AccountError, AccountResult};
use crate::models::{AccountStatus, NotificationFlag, PlanCatalog, TRIAL};
use crate::query::{AccountQuery, DateField, DateWindow};
use crate::repository::AccountStatusRepository;

const LOW_QUOTA_RATIO: f64 = 0.20;
const INACTIVITY_RATIO: f64 = 0.90;
const INACTIVITY_WINDOW_DAYS: i64 = 10;
const CLOSE_TO_END_WINDOW_DAYS: i64 = 2;

/// The monitored lifecycle conditions. The string form is the task id and
/// the notification event name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CheckKind {
    LowInteractionQuota,
    #[strum(serialize = "low_interactivity")]
    AccountInactivity,
    #[strum(serialize = "subscription_close_to_end_first_warning")]
    SubscriptionFirstWarning,
    #[strum(serialize = "subscription_close_to_end_last_warning")]
    SubscriptionLastWarning,
    SubscriptionEnded,
    #[strum(serialize = "trial_close_to_end_first_warning")]
    TrialFirstWarning,
    #[strum(serialize = "trial_close_to_end_last_warning")]
    TrialLastWarning,
    TrialEnded,
}

impl CheckKind {
    pub fn task_id(self) -> &'static str {
        self.into()
    }

    /// Flag written once an account has been notified
    pub fn flag(self) -> NotificationFlag {
        match self {
            CheckKind::LowInteractionQuota => NotificationFlag::LowInteractionQuota,
            CheckKind::AccountInactivity => NotificationFlag::LowInteractivity,
            CheckKind::SubscriptionFirstWarning | CheckKind::TrialFirstWarning => {
                NotificationFlag::SubscriptionAboutToEnd
            }
            CheckKind::SubscriptionLastWarning | CheckKind::TrialLastWarning => {
                NotificationFlag::SubscriptionAboutToEndLastWarning
            }
            CheckKind::SubscriptionEnded | CheckKind::TrialEnded => NotificationFlag::SubscriptionEnd,
        }
    }

    /// Quota checks run once per paid plan against that plan's baseline.
    pub fn is_per_plan(self) -> bool {
        matches!(self, CheckKind::LowInteractionQuota | CheckKind::AccountInactivity)
    }

    fn is_trial(self) -> bool {
        matches!(
            self,
            CheckKind::TrialFirstWarning | CheckKind::TrialLastWarning | CheckKind::TrialEnded
        )
    }

    /// Selection for the expiry family; the quota checks are built per plan.
    fn expiry_query(self, now: DateTime<Utc>) -> AccountQuery {
        let (base, field) = if self.is_trial() {
            (AccountQuery::new().status_is(TRIAL), DateField::TrialEndDate)
        } else {
            (AccountQuery::new().status_is_not(TRIAL), DateField::RenovationDate)
        };
        let close_to_end = DateWindow::upcoming(now, CLOSE_TO_END_WINDOW_DAYS);

        match self {
            CheckKind::SubscriptionFirstWarning | CheckKind::TrialFirstWarning => base
                .flag_unset(NotificationFlag::SubscriptionAboutToEnd)
                .date_within(field, close_to_end),
            CheckKind::SubscriptionLastWarning | CheckKind::TrialLastWarning => base
                .flag_set(NotificationFlag::SubscriptionAboutToEnd)
                .flag_unset(NotificationFlag::SubscriptionAboutToEndLastWarning)
                .date_within(field, close_to_end),
            _ => base
                .flag_set(NotificationFlag::SubscriptionAboutToEndLastWarning)
                .flag_unset(NotificationFlag::SubscriptionEnd)
                .date_within(field, DateWindow::until_now(now)),
        }
    }

    fn plan_query(self, plan: &str, baseline: f64, now: DateTime<Utc>) -> AccountQuery {
        let query = AccountQuery::new().status_is(plan).flag_unset(self.flag());
        match self {
            CheckKind::AccountInactivity => query
                .quota_at_least(INACTIVITY_RATIO * baseline)
                .date_within(
                    DateField::RenovationDate,
                    DateWindow::upcoming(now, INACTIVITY_WINDOW_DAYS),
                ),
            _ => query
                .quota_at_most(LOW_QUOTA_RATIO * baseline)
                .date_within(DateField::RenovationDate, DateWindow::from_now(now)),
        }
    }
}

/// Flag write issued for one notified account
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagUpdate {
    pub document_id: String,
    pub field: String,
    /// `false` when a concurrent run set the flag first
    pub modified: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub occurrences: usize,
    pub email_operations: Vec<Value>,
    pub database_operations: Vec<FlagUpdate>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlanTask {
    pub plan: String,
    #[serde(flatten)]
    pub batch: BatchOutcome,
}

/// Summary of one check run
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskReport {
    Single {
        task_id: String,
        #[serde(flatten)]
        batch: BatchOutcome,
    },
    PerPlan {
        task_id: String,
        #[serde(rename = "planTasks")]
        plan_tasks: Vec<PlanTask>,
    },
    Failed {
        task_id: String,
        error: String,
    },
}

impl TaskReport {
    pub fn task_id(&self) -> &str {
        match self {
            TaskReport::Single { task_id, .. }
            | TaskReport::PerPlan { task_id, .. }
            | TaskReport::Failed { task_id, .. } => task_id,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskReport::Failed { .. })
    }

    /// Notified accounts across every plan; zero for a failed run.
    pub fn occurrences(&self) -> usize {
        match self {
            TaskReport::Single { batch, .. } => batch.occurrences,
            TaskReport::PerPlan { plan_tasks, .. } => {
                plan_tasks.iter().map(|t| t.batch.occurrences).sum()
            }
            TaskReport::Failed { .. } => 0,
        }
    }
}

enum Selection {
    Single(Vec<AccountStatus>),
    PerPlan(Vec<(String, Vec<AccountStatus>)>),
}

/// Runs the lifecycle checks against an account store.
pub struct AccountChecker<R, D> {
    repository: Arc<R>,
    dispatcher: Arc<D>,
    plans: Arc<PlanCatalog>,
    clock: Arc<dyn Clock>,
}

impl<R, D> AccountChecker<R, D>
where
    R: AccountStatusRepository,
    D: NotificationDispatcher,
{
    pub fn new(repository: Arc<R>, dispatcher: Arc<D>, plans: Arc<PlanCatalog>) -> Self {
        Self {
            repository,
            dispatcher,
            plans,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    pub async fn low_interaction_quota(&self) -> TaskReport {
        self.run(CheckKind::LowInteractionQuota).await
    }

    pub async fn account_inactivity(&self) -> TaskReport {
        self.run(CheckKind::AccountInactivity).await
    }

    pub async fn subscription_period_close_to_end_first_warning(&self) -> TaskReport {
        self.run(CheckKind::SubscriptionFirstWarning).await
    }

    pub async fn subscription_period_close_to_end_last_warning(&self) -> TaskReport {
        self.run(CheckKind::SubscriptionLastWarning).await
    }

    pub async fn subscription_ended(&self) -> TaskReport {
        self.run(CheckKind::SubscriptionEnded).await
    }

    pub async fn trial_period_close_to_end_first_warning(&self) -> TaskReport {
        self.run(CheckKind::TrialFirstWarning).await
    }

    pub async fn trial_period_close_to_end_last_warning(&self) -> TaskReport {
        self.run(CheckKind::TrialLastWarning).await
    }

    pub async fn trial_ended(&self) -> TaskReport {
        self.run(CheckKind::TrialEnded).await
    }

    /// Every check of one tick. All selections are read before any check
    /// notifies or marks, so a tick sees a single account state and the
    /// warning stages stay disjoint.
    pub async fn run_all(&self) -> Vec<TaskReport> {
        let now = self.clock.now();
        let started = Instant::now();
        let kinds: Vec<CheckKind> = CheckKind::iter().collect();

        let selections = join_all(kinds.iter().map(|&kind| self.select(kind, now))).await;
        join_all(kinds.into_iter().zip(selections).map(|(kind, selection)| async move {
            let outcome = match selection {
                Ok(selection) => self.apply(kind, selection).await,
                Err(e) => Err(e),
            };
            Self::report(kind, outcome, started)
        }))
        .await
    }

    /// Run one check. Errors never escape: they become
    /// [`TaskReport::Failed`].
    #[instrument(skip(self), fields(task_id = kind.task_id()))]
    pub async fn run(&self, kind: CheckKind) -> TaskReport {
        let started = Instant::now();
        let outcome = match self.select(kind, self.clock.now()).await {
            Ok(selection) => self.apply(kind, selection).await,
            Err(e) => Err(e),
        };
        Self::report(kind, outcome, started)
    }

    fn report(kind: CheckKind, outcome: AccountResult<TaskReport>, started: Instant) -> TaskReport {
        let task_id = kind.task_id();
        match outcome {
            Ok(report) => {
                let occurrences = report.occurrences();
                CheckMetrics::record_run(task_id, occurrences, started.elapsed());
                info!(task_id, occurrences, "account check finished");
                report
            }
            Err(e) => {
                CheckMetrics::record_failure(task_id, started.elapsed());
                error!(task_id, error = %e, "account check failed");
                TaskReport::Failed {
                    task_id: task_id.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Matched accounts, grouped by plan for the quota checks.
    async fn select(&self, kind: CheckKind, now: DateTime<Utc>) -> AccountResult<Selection> {
        if !kind.is_per_plan() {
            let accounts = self.repository.find(&kind.expiry_query(now)).await?;
            return Ok(Selection::Single(accounts));
        }

        let lookups = self.plans.paid_plans().map(|plan| async move {
            let query = kind.plan_query(
                &plan.account_status,
                plan.default_values.interaction_quota,
                now,
            );
            let accounts = self.repository.find(&query).await?;
            Ok::<_, AccountError>((plan.account_status.clone(), accounts))
        });
        Ok(Selection::PerPlan(try_join_all(lookups).await?))
    }

    async fn apply(&self, kind: CheckKind, selection: Selection) -> AccountResult<TaskReport> {
        let task_id = kind.task_id().to_string();
        match selection {
            Selection::Single(accounts) => Ok(TaskReport::Single {
                task_id,
                batch: self.notify_and_mark(kind, accounts).await?,
            }),
            Selection::PerPlan(groups) => {
                let tasks = groups.into_iter().map(|(plan, accounts)| async move {
                    let batch = self.notify_and_mark(kind, accounts).await?;
                    Ok::<_, AccountError>(PlanTask { plan, batch })
                });
                Ok(TaskReport::PerPlan {
                    task_id,
                    plan_tasks: try_join_all(tasks).await?,
                })
            }
        }
    }

    /// Notify all, then mark all. Nothing is marked unless every
    /// notification of the batch went out.
    async fn notify_and_mark(
        &self,
        kind: CheckKind,
        accounts: Vec<AccountStatus>,
    ) -> AccountResult<BatchOutcome> {
        if accounts.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let ids = accounts
            .iter()
            .map(|a| a.id.ok_or_else(|| AccountError::MissingId(a.client_name.clone())))
            .collect::<AccountResult<Vec<ObjectId>>>()?;

        let event = kind.task_id();
        let email_operations =
            try_join_all(accounts.iter().map(|a| self.dispatcher.send(event, self.payload(a)))).await?;

        let flag = kind.flag();
        let database_operations = try_join_all(ids.iter().map(|&id| async move {
            let modified = self.repository.mark_notified(id, flag).await?;
            Ok::<_, AccountError>(FlagUpdate {
                document_id: id.to_hex(),
                field: flag.field().to_string(),
                modified,
            })
        }))
        .await?;

        Ok(BatchOutcome {
            occurrences: accounts.len(),
            email_operations,
            database_operations,
        })
    }

    fn payload(&self, account: &AccountStatus) -> Value {
        account.notification_payload(self.plans.baseline(&account.account_status))
    }
}
