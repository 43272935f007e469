//! Document store access shared by the domain crates.
//!
//! Only MongoDB is supported. The crate owns connection settings, the
//! connect/ping handshake, a health probe and the startup retry helper;
//! collections and queries stay in the domain crates behind their
//! repository traits.
//!
//! ```ignore
//! use core_config::FromEnv;
//! use database::{RetryConfig, mongodb::{self, MongoConfig}};
//!
//! let config = MongoConfig::from_env()?;
//! let db = mongodb::connect_database(&config, RetryConfig::default()).await?;
//! let accounts = db.collection::<Document>("account_status");
//! ```

pub mod common;
pub mod mongodb;

pub use common::{DatabaseError, DatabaseResult, RetryConfig, retry_with_backoff};
