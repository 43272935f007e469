use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use strum::{EnumIter, IntoStaticStr};

use crate::error::{AccountError, AccountResult};

/// `accountStatus` tag of accounts still in their trial period
pub const TRIAL: &str = "trial";

/// Collection holding one [`AccountStatus`] per monitored account
pub const ACCOUNT_STATUS_COLLECTION: &str = "account_status";

/// Notification markers stored on the account document.
///
/// Flags only ever go from unset to `true`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum NotificationFlag {
    #[strum(serialize = "lowInteractionQuotaNotified")]
    LowInteractionQuota,
    #[strum(serialize = "lowInteractivityNotified")]
    LowInteractivity,
    #[strum(serialize = "subscriptionAboutToEndNotified")]
    SubscriptionAboutToEnd,
    #[strum(serialize = "subscriptionAboutToEndLastWarningNotified")]
    SubscriptionAboutToEndLastWarning,
    #[strum(serialize = "subscriptionEndNotified")]
    SubscriptionEnd,
}

impl NotificationFlag {
    /// Document field name
    pub fn field(self) -> &'static str {
        self.into()
    }
}

/// One monitored account as stored in `account_status`.
///
/// Scalar fields written as `null` read back as their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub client_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub account_status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub interaction_quota: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renovation_date: Option<BsonDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_end_date: Option<BsonDateTime>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub low_interaction_quota_notified: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub low_interactivity_notified: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subscription_about_to_end_notified: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subscription_about_to_end_last_warning_notified: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subscription_end_notified: bool,
}

impl AccountStatus {
    pub fn new(client_name: impl Into<String>, plan: impl Into<String>, interaction_quota: f64) -> Self {
        Self {
            id: None,
            client_name: client_name.into(),
            account_status: plan.into(),
            interaction_quota,
            renovation_date: None,
            trial_end_date: None,
            low_interaction_quota_notified: false,
            low_interactivity_notified: false,
            subscription_about_to_end_notified: false,
            subscription_about_to_end_last_warning_notified: false,
            subscription_end_notified: false,
        }
    }

    pub fn with_renovation_date(mut self, at: DateTime<Utc>) -> Self {
        self.renovation_date = Some(BsonDateTime::from_millis(at.timestamp_millis()));
        self
    }

    pub fn with_trial_end_date(mut self, at: DateTime<Utc>) -> Self {
        self.trial_end_date = Some(BsonDateTime::from_millis(at.timestamp_millis()));
        self
    }

    pub fn with_flag(mut self, flag: NotificationFlag) -> Self {
        self.set_flag(flag);
        self
    }

    pub fn is_trial(&self) -> bool {
        self.account_status == TRIAL
    }

    pub fn flag(&self, flag: NotificationFlag) -> bool {
        match flag {
            NotificationFlag::LowInteractionQuota => self.low_interaction_quota_notified,
            NotificationFlag::LowInteractivity => self.low_interactivity_notified,
            NotificationFlag::SubscriptionAboutToEnd => self.subscription_about_to_end_notified,
            NotificationFlag::SubscriptionAboutToEndLastWarning => {
                self.subscription_about_to_end_last_warning_notified
            }
            NotificationFlag::SubscriptionEnd => self.subscription_end_notified,
        }
    }

    pub fn set_flag(&mut self, flag: NotificationFlag) {
        let slot = match flag {
            NotificationFlag::LowInteractionQuota => &mut self.low_interaction_quota_notified,
            NotificationFlag::LowInteractivity => &mut self.low_interactivity_notified,
            NotificationFlag::SubscriptionAboutToEnd => &mut self.subscription_about_to_end_notified,
            NotificationFlag::SubscriptionAboutToEndLastWarning => {
                &mut self.subscription_about_to_end_last_warning_notified
            }
            NotificationFlag::SubscriptionEnd => &mut self.subscription_end_notified,
        };
        *slot = true;
    }

    /// Notification body: the projected account fields plus, when known,
    /// the baseline quota of the account's plan.
    pub fn notification_payload(&self, interaction_plan_quota: Option<f64>) -> Value {
        let mut body = Map::new();
        if let Some(quota) = interaction_plan_quota {
            body.insert("interactionPlanQuota".into(), json!(quota));
        }
        if let Some(id) = &self.id {
            body.insert("_id".into(), json!(id.to_hex()));
        }
        body.insert("clientName".into(), json!(self.client_name));
        body.insert("accountStatus".into(), json!(self.account_status));
        body.insert("interactionQuota".into(), json!(self.interaction_quota));
        if let Some(at) = self.renovation_date.and_then(to_chrono) {
            body.insert("renovationDate".into(), json!(at.to_rfc3339()));
        }
        if let Some(at) = self.trial_end_date.and_then(to_chrono) {
            body.insert("trialEndDate".into(), json!(at.to_rfc3339()));
        }
        Value::Object(body)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn to_chrono(at: BsonDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis())
}

pub(crate) fn to_bson(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(at.timestamp_millis())
}

/// Static limits of one plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDefinition {
    pub account_status: String,
    pub default_values: PlanDefaults,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDefaults {
    /// Baseline interaction quota the thresholds are computed from
    pub interaction_quota: f64,
    /// Remaining limits (entity, intent, workspace creation, ...)
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Every plan known to the service, loaded once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanCatalog {
    plans: Vec<PlanDefinition>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<PlanDefinition>) -> AccountResult<Self> {
        if plans.is_empty() {
            return Err(AccountError::PlanCatalog("no plans defined".to_string()));
        }
        let invalid = |p: &&PlanDefinition| {
            let quota = p.default_values.interaction_quota;
            !quota.is_finite() || quota < 0.0
        };
        if let Some(plan) = plans.iter().find(invalid) {
            return Err(AccountError::PlanCatalog(format!(
                "plan '{}' has an invalid interactionQuota",
                plan.account_status
            )));
        }
        Ok(Self { plans })
    }

    pub fn from_json(raw: &str) -> AccountResult<Self> {
        let plans: Vec<PlanDefinition> = serde_json::from_str(raw)
            .map_err(|e| AccountError::PlanCatalog(e.to_string()))?;
        Self::new(plans)
    }

    pub fn from_path(path: impl AsRef<Path>) -> AccountResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AccountError::PlanCatalog(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn plans(&self) -> &[PlanDefinition] {
        &self.plans
    }

    /// Plans with a renewal cycle, i.e. everything except `trial`.
    pub fn paid_plans(&self) -> impl Iterator<Item = &PlanDefinition> {
        self.plans.iter().filter(|p| p.account_status != TRIAL)
    }

    pub fn baseline(&self, account_status: &str) -> Option<f64> {
        self.plans
            .iter()
            .find(|p| p.account_status == account_status)
            .map(|p| p.default_values.interaction_quota)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson;
    use strum::IntoEnumIterator;

    const PLANS: &str = r#"[
        {"accountStatus": "trial", "defaultValues": {"interactionQuota": 1000, "entityCreationQuota": 5}},
        {"accountStatus": "basic", "defaultValues": {"interactionQuota": 5000, "entityCreationQuota": 10}}
    ]"#;

    #[test]
    fn test_flag_fields() {
        let fields: Vec<_> = NotificationFlag::iter().map(NotificationFlag::field).collect();
        assert_eq!(
            fields,
            vec![
                "lowInteractionQuotaNotified",
                "lowInteractivityNotified",
                "subscriptionAboutToEndNotified",
                "subscriptionAboutToEndLastWarningNotified",
                "subscriptionEndNotified",
            ]
        );
    }

    #[test]
    fn test_missing_flags_default_to_false() {
        let doc = bson::doc! {
            "_id": ObjectId::new(),
            "clientName": "Acme",
            "accountStatus": "basic",
            "interactionQuota": 900_i32,
            "entityCreationQuota": 3_i32,
        };
        let account: AccountStatus = bson::from_document(doc).unwrap();
        assert_eq!(account.interaction_quota, 900.0);
        assert!(NotificationFlag::iter().all(|f| !account.flag(f)));
        assert!(account.renovation_date.is_none());
    }

    #[test]
    fn test_null_fields_read_as_defaults() {
        let doc = bson::doc! {
            "_id": ObjectId::new(),
            "clientName": bson::Bson::Null,
            "accountStatus": "basic",
            "interactionQuota": bson::Bson::Null,
            "renovationDate": bson::Bson::Null,
            "subscriptionEndNotified": bson::Bson::Null,
        };
        let account: AccountStatus = bson::from_document(doc).unwrap();
        assert_eq!(account.client_name, "");
        assert_eq!(account.interaction_quota, 0.0);
        assert!(account.renovation_date.is_none());
        assert!(!account.flag(NotificationFlag::SubscriptionEnd));
    }

    #[test]
    fn test_set_flag_round_trips_through_field() {
        for flag in NotificationFlag::iter() {
            let account = AccountStatus::new("Acme", "basic", 1.0).with_flag(flag);
            let doc = bson::to_document(&account).unwrap();
            assert_eq!(doc.get_bool(flag.field()).unwrap(), true);
            assert!(account.flag(flag));
        }
    }

    #[test]
    fn test_payload_carries_plan_quota() {
        let at = Utc::now();
        let account = AccountStatus::new("Acme", "basic", 900.0).with_renovation_date(at);
        let payload = account.notification_payload(Some(5000.0));
        assert_eq!(payload["interactionPlanQuota"], 5000.0);
        assert_eq!(payload["clientName"], "Acme");
        assert_eq!(payload["interactionQuota"], 900.0);
        assert!(payload.get("renovationDate").is_some());
        assert!(payload.get("trialEndDate").is_none());
    }

    #[test]
    fn test_catalog_loads_and_excludes_trial() {
        let catalog = PlanCatalog::from_json(PLANS).unwrap();
        assert_eq!(catalog.plans().len(), 2);
        let paid: Vec<_> = catalog.paid_plans().map(|p| p.account_status.as_str()).collect();
        assert_eq!(paid, vec!["basic"]);
        assert_eq!(catalog.baseline("trial"), Some(1000.0));
        assert_eq!(catalog.baseline("gold"), None);
        assert_eq!(
            catalog.plans()[1].default_values.other["entityCreationQuota"],
            10
        );
    }

    #[test]
    fn test_catalog_rejects_empty_or_invalid() {
        assert!(matches!(
            PlanCatalog::from_json("[]"),
            Err(AccountError::PlanCatalog(_))
        ));
        assert!(PlanCatalog::from_json("{").is_err());
        assert!(PlanCatalog::from_json(
            r#"[{"accountStatus":"basic","defaultValues":{"interactionQuota":-1}}]"#
        )
        .is_err());
        assert!(PlanCatalog::from_path("/definitely/not/here.json").is_err());
    }
}
