//! Conjunctive account predicates.
//!
//! An [`AccountQuery`] renders to a MongoDB filter and can be evaluated
//! against a document in memory; both paths must agree.

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::{doc, Document};

use crate::models::{to_bson, AccountStatus, NotificationFlag};

/// Inclusive time range; a missing bound is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateWindow {
    /// `[now, now + days]`
    pub fn upcoming(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: Some(now),
            end: Some(now + Duration::days(days)),
        }
    }

    /// `[now, ∞)`
    pub fn from_now(now: DateTime<Utc>) -> Self {
        Self {
            start: Some(now),
            end: None,
        }
    }

    /// `(-∞, now]`
    pub fn until_now(now: DateTime<Utc>) -> Self {
        Self {
            start: None,
            end: Some(now),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && self.end.is_none_or(|end| at <= end)
    }

    fn to_bson(self) -> Document {
        let mut range = Document::new();
        if let Some(start) = self.start {
            range.insert("$gte", to_bson(start));
        }
        if let Some(end) = self.end {
            range.insert("$lte", to_bson(end));
        }
        range
    }
}

/// Which subscription boundary a window applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateField {
    RenovationDate,
    TrialEndDate,
}

impl DateField {
    pub fn field(self) -> &'static str {
        match self {
            DateField::RenovationDate => "renovationDate",
            DateField::TrialEndDate => "trialEndDate",
        }
    }

    fn value(self, account: &AccountStatus) -> Option<DateTime<Utc>> {
        let raw = match self {
            DateField::RenovationDate => account.renovation_date,
            DateField::TrialEndDate => account.trial_end_date,
        };
        raw.and_then(crate::models::to_chrono)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusMatch {
    Is(String),
    IsNot(String),
}

/// Conjunction of account predicates
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccountQuery {
    pub status: Option<StatusMatch>,
    pub flags_set: Vec<NotificationFlag>,
    pub flags_unset: Vec<NotificationFlag>,
    pub quota_at_most: Option<f64>,
    pub quota_at_least: Option<f64>,
    pub date: Option<(DateField, DateWindow)>,
}

impl AccountQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_is(mut self, plan: impl Into<String>) -> Self {
        self.status = Some(StatusMatch::Is(plan.into()));
        self
    }

    pub fn status_is_not(mut self, plan: impl Into<String>) -> Self {
        self.status = Some(StatusMatch::IsNot(plan.into()));
        self
    }

    pub fn flag_set(mut self, flag: NotificationFlag) -> Self {
        self.flags_set.push(flag);
        self
    }

    /// Matches documents where the flag is `false` or missing.
    pub fn flag_unset(mut self, flag: NotificationFlag) -> Self {
        self.flags_unset.push(flag);
        self
    }

    pub fn quota_at_most(mut self, limit: f64) -> Self {
        self.quota_at_most = Some(limit);
        self
    }

    pub fn quota_at_least(mut self, limit: f64) -> Self {
        self.quota_at_least = Some(limit);
        self
    }

    pub fn date_within(mut self, field: DateField, window: DateWindow) -> Self {
        self.date = Some((field, window));
        self
    }

    pub fn to_filter(&self) -> Document {
        let mut filter = Document::new();

        match &self.status {
            Some(StatusMatch::Is(plan)) => {
                filter.insert("accountStatus", plan.as_str());
            }
            Some(StatusMatch::IsNot(plan)) => {
                filter.insert("accountStatus", doc! { "$ne": plan.as_str() });
            }
            None => {}
        }

        for flag in &self.flags_set {
            filter.insert(flag.field(), true);
        }
        for flag in &self.flags_unset {
            filter.insert(flag.field(), doc! { "$ne": true });
        }

        let mut quota = Document::new();
        if let Some(limit) = self.quota_at_most {
            quota.insert("$lte", limit);
        }
        if let Some(limit) = self.quota_at_least {
            quota.insert("$gte", limit);
        }
        if !quota.is_empty() {
            filter.insert("interactionQuota", quota);
        }

        if let Some((field, window)) = self.date {
            filter.insert(field.field(), window.to_bson());
        }

        filter
    }

    pub fn matches(&self, account: &AccountStatus) -> bool {
        let status_ok = match &self.status {
            Some(StatusMatch::Is(plan)) => account.account_status == *plan,
            Some(StatusMatch::IsNot(plan)) => account.account_status != *plan,
            None => true,
        };

        status_ok
            && self.flags_set.iter().all(|f| account.flag(*f))
            && self.flags_unset.iter().all(|f| !account.flag(*f))
            && self
                .quota_at_most
                .is_none_or(|limit| account.interaction_quota <= limit)
            && self
                .quota_at_least
                .is_none_or(|limit| account.interaction_quota >= limit)
            && self.date.is_none_or(|(field, window)| {
                field.value(account).is_some_and(|at| window.contains(at))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TRIAL;
    use mongodb::bson::Bson;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-10T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let window = DateWindow::upcoming(now(), 2);
        assert!(window.contains(now()));
        assert!(window.contains(now() + Duration::days(2)));
        assert!(!window.contains(now() + Duration::days(2) + Duration::milliseconds(1)));
        assert!(!window.contains(now() - Duration::milliseconds(1)));

        assert!(DateWindow::until_now(now()).contains(now() - Duration::days(400)));
        assert!(DateWindow::from_now(now()).contains(now() + Duration::days(400)));
    }

    #[test]
    fn test_filter_shape() {
        let query = AccountQuery::new()
            .status_is_not(TRIAL)
            .flag_set(NotificationFlag::SubscriptionAboutToEnd)
            .flag_unset(NotificationFlag::SubscriptionAboutToEndLastWarning)
            .quota_at_most(100.0)
            .date_within(DateField::RenovationDate, DateWindow::until_now(now()));

        let filter = query.to_filter();
        assert_eq!(filter.get_document("accountStatus").unwrap(), &doc! { "$ne": "trial" });
        assert_eq!(filter.get_bool("subscriptionAboutToEndNotified").unwrap(), true);
        assert_eq!(
            filter
                .get_document("subscriptionAboutToEndLastWarningNotified")
                .unwrap(),
            &doc! { "$ne": true }
        );
        assert_eq!(
            filter.get_document("interactionQuota").unwrap(),
            &doc! { "$lte": 100.0 }
        );
        let range = filter.get_document("renovationDate").unwrap();
        assert!(matches!(range.get("$lte"), Some(Bson::DateTime(_))));
        assert!(range.get("$gte").is_none());
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert!(AccountQuery::new().to_filter().is_empty());
        assert!(AccountQuery::new().matches(&AccountStatus::new("a", "basic", 0.0)));
    }

    #[test]
    fn test_matches_agrees_with_predicates() {
        let query = AccountQuery::new()
            .status_is("basic")
            .flag_unset(NotificationFlag::LowInteractionQuota)
            .quota_at_most(1000.0)
            .date_within(DateField::RenovationDate, DateWindow::from_now(now()));

        let hit = AccountStatus::new("a", "basic", 900.0).with_renovation_date(now() + Duration::days(5));
        assert!(query.matches(&hit));

        assert!(!query.matches(&hit.clone().with_flag(NotificationFlag::LowInteractionQuota)));
        assert!(!query.matches(&AccountStatus { account_status: TRIAL.into(), ..hit.clone() }));
        assert!(!query.matches(&AccountStatus { interaction_quota: 1000.5, ..hit.clone() }));
        assert!(!query.matches(&hit.clone().with_renovation_date(now() - Duration::days(1))));
        // A missing boundary date never matches a window.
        assert!(!query.matches(&AccountStatus { renovation_date: None, ..hit }));
    }
}
