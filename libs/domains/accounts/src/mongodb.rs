//! MongoDB implementation of AccountStatusRepository

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, oid::ObjectId, Document},
    Collection, Database,
};
use tracing::{instrument, warn};

use crate::error::AccountResult;
use crate::models::{AccountStatus, NotificationFlag, ACCOUNT_STATUS_COLLECTION};
use crate::query::AccountQuery;
use crate::repository::AccountStatusRepository;

pub struct MongoAccountStatusRepository {
    collection: Collection<AccountStatus>,
}

impl MongoAccountStatusRepository {
    pub fn new(db: &Database) -> Self {
        Self::with_collection(db, ACCOUNT_STATUS_COLLECTION)
    }

    pub fn with_collection(db: &Database, name: &str) -> Self {
        Self {
            collection: db.collection::<AccountStatus>(name),
        }
    }

    /// Single-document conditional write: the unset-flag guard is part of
    /// the match, so a concurrent run can never flip it twice.
    fn mark_filter(id: ObjectId, flag: NotificationFlag) -> Document {
        doc! { "_id": id, flag.field(): { "$ne": true } }
    }

    /// Decode each document on its own; one that does not fit is logged and
    /// skipped instead of failing the whole check.
    fn decode_batch(documents: Vec<Document>) -> Vec<AccountStatus> {
        documents
            .into_iter()
            .filter_map(|document| {
                let id = document.get_object_id("_id").ok();
                match bson::from_document::<AccountStatus>(document) {
                    Ok(account) => Some(account),
                    Err(e) => {
                        warn!(id = ?id, error = %e, "skipping undecodable account document");
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl AccountStatusRepository for MongoAccountStatusRepository {
    #[instrument(skip(self), fields(collection = %self.collection.name()))]
    async fn find(&self, query: &AccountQuery) -> AccountResult<Vec<AccountStatus>> {
        let cursor = self
            .collection
            .clone_with_type::<Document>()
            .find(query.to_filter())
            .await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        let accounts = Self::decode_batch(documents);
        tracing::debug!(matched = accounts.len(), "account query finished");
        Ok(accounts)
    }

    #[instrument(skip(self), fields(flag = flag.field()))]
    async fn mark_notified(&self, id: ObjectId, flag: NotificationFlag) -> AccountResult<bool> {
        let result = self
            .collection
            .update_one(
                Self::mark_filter(id, flag),
                doc! { "$set": { flag.field(): true } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_filter_guards_on_flag() {
        let id = ObjectId::new();
        let filter = MongoAccountStatusRepository::mark_filter(id, NotificationFlag::SubscriptionEnd);
        assert_eq!(filter.get_object_id("_id").unwrap(), id);
        assert_eq!(
            filter.get_document("subscriptionEndNotified").unwrap(),
            &doc! { "$ne": true }
        );
    }

    #[test]
    fn test_undecodable_document_is_skipped() {
        let documents = vec![
            doc! { "_id": ObjectId::new(), "clientName": "Acme", "accountStatus": "basic", "interactionQuota": 40_i32 },
            doc! { "_id": ObjectId::new(), "clientName": null, "accountStatus": "basic", "interactionQuota": null },
            doc! { "_id": ObjectId::new(), "clientName": "Broken", "accountStatus": "basic", "interactionQuota": "lots" },
            doc! { "_id": ObjectId::new(), "clientName": "Beta", "accountStatus": "trial", "trialEndDate": "tomorrow" },
        ];

        let accounts = MongoAccountStatusRepository::decode_batch(documents);
        let names: Vec<_> = accounts.iter().map(|a| a.client_name.as_str()).collect();
        assert_eq!(names, vec!["Acme", ""]);
        assert_eq!(accounts[1].interaction_quota, 0.0);
    }
}
