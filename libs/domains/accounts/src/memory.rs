use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use parking_lot::RwLock;

use crate::error::AccountResult;
use crate::models::{AccountStatus, NotificationFlag};
use crate::query::AccountQuery;
use crate::repository::AccountStatusRepository;

/// Account store kept in process memory, evaluated with
/// [`AccountQuery::matches`]. Used in test mode and by the test suites.
#[derive(Debug, Default)]
pub struct InMemoryAccountStatusRepository {
    accounts: RwLock<Vec<AccountStatus>>,
}

impl InMemoryAccountStatusRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `account`, assigning an id when it has none.
    pub fn insert(&self, mut account: AccountStatus) -> ObjectId {
        let id = *account.id.get_or_insert_with(ObjectId::new);
        self.accounts.write().push(account);
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<AccountStatus> {
        self.accounts
            .read()
            .iter()
            .find(|a| a.id == Some(id))
            .cloned()
    }

    pub fn all(&self) -> Vec<AccountStatus> {
        self.accounts.read().clone()
    }
}

#[async_trait]
impl AccountStatusRepository for InMemoryAccountStatusRepository {
    async fn find(&self, query: &AccountQuery) -> AccountResult<Vec<AccountStatus>> {
        Ok(self
            .accounts
            .read()
            .iter()
            .filter(|a| query.matches(a))
            .cloned()
            .collect())
    }

    async fn mark_notified(&self, id: ObjectId, flag: NotificationFlag) -> AccountResult<bool> {
        let mut accounts = self.accounts.write();
        match accounts.iter_mut().find(|a| a.id == Some(id)) {
            Some(account) if !account.flag(flag) => {
                account.set_flag(flag);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
