//! MongoDB connection management.

mod config;
mod connector;
mod health;

pub use config::MongoConfig;
pub use connector::{connect, connect_database, connect_with_retry};
pub use health::{HealthStatus, check_health};

pub use ::mongodb::{Client, Collection, Database};
