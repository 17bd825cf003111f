//! Process settings, read once at startup from the environment.
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use shardflow_glue::GlueConfig;
use shardflow_kinesis::KinesisConfig;

use crate::Error;
use crate::Result;
use crate::scheduler::SchedulerConfig;

const ENV_AWS_REGION: &str = "AWS_REGION";
const ENV_GLUE_REGISTRY_NAME: &str = "GLUE_REGISTRY_NAME";
const ENV_GLUE_SCHEMA_NAME: &str = "GLUE_SCHEMA_NAME";
const ENV_STREAM_NAME: &str = "STREAM_NAME";
const ENV_AWS_ENDPOINT_URL: &str = "AWS_ENDPOINT_URL";
const ENV_POOL_SIZE: &str = "SHARDFLOW_POOL_SIZE";
const ENV_TICK_INTERVAL_MS: &str = "SHARDFLOW_TICK_INTERVAL_MS";
const ENV_BATCH_SIZE: &str = "SHARDFLOW_BATCH_SIZE";
const ENV_IDLE_BACKOFF_BASE_MS: &str = "SHARDFLOW_IDLE_BACKOFF_BASE_MS";
const ENV_IDLE_BACKOFF_MAX_MS: &str = "SHARDFLOW_IDLE_BACKOFF_MAX_MS";
const ENV_SHUTDOWN_TIMEOUT_MS: &str = "SHARDFLOW_SHUTDOWN_TIMEOUT_MS";
const ENV_PRODUCE_INTERVAL_MS: &str = "SHARDFLOW_PRODUCE_INTERVAL_MS";

const DEFAULT_POOL_SIZE: usize = 2;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const DEFAULT_BATCH_SIZE: usize = 10;
/// GetRecords rejects limits above this.
const MAX_BATCH_SIZE: usize = 10_000;
const DEFAULT_IDLE_BACKOFF_BASE_MS: u64 = 200;
const DEFAULT_IDLE_BACKOFF_MAX_MS: u64 = 5000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PRODUCE_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub aws_region: String,
    pub registry_name: String,
    pub schema_name: String,
    pub stream_name: String,
    /// Overrides the AWS endpoint, e.g. for localstack.
    pub endpoint_url: Option<String>,
    /// Maximum number of shards consumed concurrently.
    pub pool_size: usize,
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub idle_backoff_base: Duration,
    pub idle_backoff_max: Duration,
    pub shutdown_timeout: Duration,
    pub produce_interval: Duration,
}

impl Settings {
    /// Loads the settings from a set of environment variables, e.g. `std::env::vars()`.
    pub fn load(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        vars.into_iter()
            .collect::<HashMap<String, String>>()
            .try_into()
    }
}

fn required(env_vars: &HashMap<String, String>, key: &str) -> Result<String> {
    match env_vars.get(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_owned()),
        _ => Err(Error::Config(format!(
            "Environment variable {key} is not set"
        ))),
    }
}

fn optional<T>(env_vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = env_vars.get(key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Parsing {key}(set to '{value}'): {e}")))
}

fn optional_millis(env_vars: &HashMap<String, String>, key: &str, default: u64) -> Result<Duration> {
    optional(env_vars, key, default).map(Duration::from_millis)
}

impl TryFrom<HashMap<String, String>> for Settings {
    type Error = Error;

    fn try_from(env_vars: HashMap<String, String>) -> Result<Self> {
        let settings = Settings {
            aws_region: required(&env_vars, ENV_AWS_REGION)?,
            registry_name: required(&env_vars, ENV_GLUE_REGISTRY_NAME)?,
            schema_name: required(&env_vars, ENV_GLUE_SCHEMA_NAME)?,
            stream_name: required(&env_vars, ENV_STREAM_NAME)?,
            endpoint_url: env_vars
                .get(ENV_AWS_ENDPOINT_URL)
                .filter(|url| !url.is_empty())
                .cloned(),
            pool_size: optional(&env_vars, ENV_POOL_SIZE, DEFAULT_POOL_SIZE)?,
            tick_interval: optional_millis(&env_vars, ENV_TICK_INTERVAL_MS, DEFAULT_TICK_INTERVAL_MS)?,
            batch_size: optional(&env_vars, ENV_BATCH_SIZE, DEFAULT_BATCH_SIZE)?,
            idle_backoff_base: optional_millis(
                &env_vars,
                ENV_IDLE_BACKOFF_BASE_MS,
                DEFAULT_IDLE_BACKOFF_BASE_MS,
            )?,
            idle_backoff_max: optional_millis(
                &env_vars,
                ENV_IDLE_BACKOFF_MAX_MS,
                DEFAULT_IDLE_BACKOFF_MAX_MS,
            )?,
            shutdown_timeout: optional_millis(
                &env_vars,
                ENV_SHUTDOWN_TIMEOUT_MS,
                DEFAULT_SHUTDOWN_TIMEOUT_MS,
            )?,
            produce_interval: optional_millis(
                &env_vars,
                ENV_PRODUCE_INTERVAL_MS,
                DEFAULT_PRODUCE_INTERVAL_MS,
            )?,
        };

        if settings.pool_size == 0 {
            return Err(Error::Config(format!("{ENV_POOL_SIZE} must be at least 1")));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&settings.batch_size) {
            return Err(Error::Config(format!(
                "{ENV_BATCH_SIZE} must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        if settings.tick_interval.is_zero() || settings.produce_interval.is_zero() {
            return Err(Error::Config("intervals must be greater than zero".to_string()));
        }
        if settings.idle_backoff_base > settings.idle_backoff_max {
            return Err(Error::Config(format!(
                "{ENV_IDLE_BACKOFF_BASE_MS} must not exceed {ENV_IDLE_BACKOFF_MAX_MS}"
            )));
        }

        Ok(settings)
    }
}

impl Settings {
    pub fn kinesis_config(&self) -> KinesisConfig {
        KinesisConfig {
            region: self.aws_region.clone(),
            endpoint_url: self.endpoint_url.clone(),
        }
    }

    pub fn glue_config(&self) -> GlueConfig {
        GlueConfig {
            region: self.aws_region.clone(),
            endpoint_url: self.endpoint_url.clone(),
        }
    }
}

impl From<&Settings> for SchedulerConfig {
    fn from(settings: &Settings) -> Self {
        SchedulerConfig {
            stream_name: settings.stream_name.clone(),
            pool_size: settings.pool_size,
            tick_interval: settings.tick_interval,
            batch_size: settings.batch_size,
            idle_backoff_base: settings.idle_backoff_base,
            idle_backoff_max: settings.idle_backoff_max,
            shutdown_timeout: settings.shutdown_timeout,
        }
    }
}
