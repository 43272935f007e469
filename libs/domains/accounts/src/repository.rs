use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::error::AccountResult;
use crate::models::{AccountStatus, NotificationFlag};
use crate::query::AccountQuery;

/// Account status persistence used by the checks
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStatusRepository: Send + Sync {
    /// Every account matching `query`, in no particular order
    async fn find(&self, query: &AccountQuery) -> AccountResult<Vec<AccountStatus>>;

    /// Set `flag` on one account unless it is already set.
    ///
    /// Returns `true` when this call flipped the flag.
    async fn mark_notified(&self, id: ObjectId, flag: NotificationFlag) -> AccountResult<bool>;
}
