use core_config::{ConfigError, Environment, FromEnv, env_optional, env_parse};

/// MongoDB connection settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MongoConfig {
    /// `mongodb://[username:password@]host[:port][/database][?options]`
    pub url: String,
    pub database: String,
    pub app_name: Option<String>,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connect_timeout_secs: u64,
    pub server_selection_timeout_secs: u64,
}

impl MongoConfig {
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_pool_size(mut self, max: u32, min: u32) -> Self {
        self.max_pool_size = max;
        self.min_pool_size = min;
        self
    }

    /// Load settings for a given runtime mode.
    ///
    /// - `MONGODB_URL` / `MONGO_URL` (required)
    /// - `MONGODB_DATABASE` / `MONGO_DB` (required outside test mode)
    /// - `MONGO_TEST_DB` (test mode, defaults to `test`)
    /// - `MONGODB_APP_NAME`, `MONGODB_MAX_POOL_SIZE`, `MONGODB_MIN_POOL_SIZE`,
    ///   `MONGODB_CONNECT_TIMEOUT_SECS`, `MONGODB_SERVER_SELECTION_TIMEOUT_SECS`
    pub fn for_environment(environment: Environment) -> Result<Self, ConfigError> {
        let url = env_optional("MONGODB_URL")
            .or_else(|| env_optional("MONGO_URL"))
            .ok_or_else(|| ConfigError::MissingEnvVar("MONGODB_URL or MONGO_URL".to_string()))?;

        let database = if environment.is_test() {
            env_optional("MONGO_TEST_DB").unwrap_or_else(|| "test".to_string())
        } else {
            env_optional("MONGODB_DATABASE")
                .or_else(|| env_optional("MONGO_DB"))
                .ok_or_else(|| {
                    ConfigError::MissingEnvVar("MONGODB_DATABASE or MONGO_DB".to_string())
                })?
        };

        let defaults = Self::default();
        Ok(Self {
            url,
            database,
            app_name: env_optional("MONGODB_APP_NAME"),
            max_pool_size: env_parse("MONGODB_MAX_POOL_SIZE", defaults.max_pool_size)?,
            min_pool_size: env_parse("MONGODB_MIN_POOL_SIZE", defaults.min_pool_size)?,
            connect_timeout_secs: env_parse(
                "MONGODB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            )?,
            server_selection_timeout_secs: env_parse(
                "MONGODB_SERVER_SELECTION_TIMEOUT_SECS",
                defaults.server_selection_timeout_secs,
            )?,
        })
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            database: "cloud_messaging".to_string(),
            app_name: None,
            max_pool_size: 50,
            min_pool_size: 2,
            connect_timeout_secs: 10,
            server_selection_timeout_secs: 30,
        }
    }
}

impl FromEnv for MongoConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Self::for_environment(Environment::from_env())
    }
}
