//! Account lifecycle notifications.
//!
//! Watches `account_status` documents for quota exhaustion, inactivity and
//! subscription or trial expiry. Each condition is an [`AccountChecker`]
//! check that notifies matching accounts once and records that with a flag
//! on the document.
//!
//! ```ignore
//! let checker = AccountChecker::new(repository, dispatcher, plans);
//! for report in checker.run_all().await {
//!     tracing::info!(task_id = report.task_id(), occurrences = report.occurrences());
//! }
//! ```

pub mod checker;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod models;
pub mod mongodb;
pub mod query;
pub mod repository;

pub use checker::{AccountChecker, BatchOutcome, CheckKind, FlagUpdate, PlanTask, TaskReport};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dispatcher::{
    conversion_body, ConversionConfig, ConversionDispatcher, NotificationDispatcher,
    RecordingDispatcher,
};
pub use error::{AccountError, AccountResult};
pub use memory::InMemoryAccountStatusRepository;
pub use models::{AccountStatus, NotificationFlag, PlanCatalog, PlanDefinition, PlanDefaults, TRIAL};
pub use self::mongodb::MongoAccountStatusRepository;
pub use query::{AccountQuery, DateField, DateWindow, StatusMatch};
pub use repository::AccountStatusRepository;
