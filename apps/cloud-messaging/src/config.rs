use chrono_tz::Tz;
use core_config::{env_or_default, server::ServerConfig, ConfigError, FromEnv};
use database::mongodb::MongoConfig;
use domain_accounts::ConversionConfig;
use queue_relay::RelayConfig;
use std::path::PathBuf;

pub use core_config::Environment;

/// Broker queues consumed by the ingest handlers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicConfig {
    pub logs: String,
    pub receipts: String,
    pub conversation_engage: String,
    pub conversation_increment: String,
    pub emails: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            logs: "logs".to_string(),
            receipts: "receipts".to_string(),
            conversation_engage: "conversation_analytics.engage".to_string(),
            conversation_increment: "conversation_analytics.increment".to_string(),
            emails: "emails".to_string(),
        }
    }
}

impl FromEnv for TopicConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            logs: env_or_default("LOGS_QUEUE_TOPIC", &defaults.logs),
            receipts: env_or_default("RECEIPTS_QUEUE_TOPIC", &defaults.receipts),
            conversation_engage: env_or_default(
                "CONVERSATION_ANALYTICS_ENGAGE_TOPIC",
                &defaults.conversation_engage,
            ),
            conversation_increment: env_or_default(
                "CONVERSATION_ANALYTICS_INCREMENT_TOPIC",
                &defaults.conversation_increment,
            ),
            emails: env_or_default("EMAIL_QUEUE_TOPIC", &defaults.emails),
        })
    }
}

/// Account checker schedule and artifacts
#[derive(Clone, Debug, PartialEq)]
pub struct CheckerConfig {
    pub plans_path: PathBuf,
    /// Six-field cron expression, seconds first
    pub cron: String,
    pub timezone: Tz,
    pub dump_path: PathBuf,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            plans_path: PathBuf::from("config/default_account_plans.json"),
            cron: "0 0 5 * * *".to_string(),
            timezone: chrono_tz::America::Sao_Paulo,
            dump_path: PathBuf::from("root/mail_logs/dump.log"),
        }
    }
}

impl FromEnv for CheckerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timezone = match std::env::var("ACCOUNT_CHECKER_TIMEZONE") {
            Ok(raw) => raw.trim().parse::<Tz>().map_err(|e| ConfigError::ParseError {
                key: "ACCOUNT_CHECKER_TIMEZONE".to_string(),
                details: e.to_string(),
            })?,
            Err(_) => defaults.timezone,
        };

        let cron = env_or_default("ACCOUNT_CHECKER_CRON", &defaults.cron);
        if cron.split_whitespace().count() < 6 {
            return Err(ConfigError::Invalid(format!(
                "ACCOUNT_CHECKER_CRON needs six fields (seconds first), got '{cron}'"
            )));
        }

        Ok(Self {
            plans_path: std::env::var("ACCOUNT_PLANS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.plans_path),
            cron,
            timezone,
            dump_path: std::env::var("ACCOUNT_CHECKER_DUMP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.dump_path),
        })
    }
}

/// Application configuration, composed from the shared config components
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    /// `None` only in test mode without a Mongo URL; in-memory stores are used then
    pub mongo: Option<MongoConfig>,
    pub relay: RelayConfig,
    pub topics: TopicConfig,
    pub checker: CheckerConfig,
    pub conversion: ConversionConfig,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();

        let mongo = match MongoConfig::for_environment(environment) {
            Ok(config) => Some(config),
            Err(ConfigError::MissingEnvVar(_)) if environment.is_test() => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            environment,
            server: ServerConfig::from_env()?,
            mongo,
            relay: RelayConfig::from_env()?,
            topics: TopicConfig::from_env()?,
            checker: CheckerConfig::from_env()?,
            conversion: ConversionConfig::from_env()?,
        })
    }
}
