//! Environment-driven service configuration.
//!
//! A `.env` file in the working directory is loaded first; variables already
//! set in the environment win over it.

use crate::application::gate::FailurePolicy;
use crate::application::relay::RelayConfig;
use crate::domain::tier::{PolicyError, Tier, TierPolicies, TierPolicy};
use crate::http::client_ip::ClientIpSource;
use std::collections::HashMap;
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default Redis URL for both the counting store and the broker.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable could not be parsed
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// Parser message
        reason: String,
    },

    /// A tier's points and window do not form a valid policy
    #[error("invalid {tier} tier policy: {source}")]
    Policy {
        /// Affected tier
        tier: Tier,
        /// Why the policy was rejected
        #[source]
        source: PolicyError,
    },
}

/// Settings of one service process.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service label for logs, responses and the broker consumer group
    pub service_name: String,
    /// Listen host
    pub host: IpAddr,
    /// Listen port
    pub port: u16,
    /// Counting store URL
    pub redis_url: String,
    /// Broker URL
    pub broker_url: String,
    /// Prefix of rate limit keys in the store
    pub key_prefix: String,
    /// Limits per tier
    pub policies: TierPolicies,
    /// Bound on one store call
    pub store_timeout: Duration,
    /// What to do when the store fails
    pub failure_policy: FailurePolicy,
    /// Take the client address from `X-Forwarded-For`
    pub trust_proxy: bool,
    /// Wait before the first broker connection attempt
    pub connect_delay: Duration,
    /// Broker connection attempts before degrading, `None` for no limit
    pub max_connect_attempts: Option<u32>,
    /// Bound on one publish
    pub publish_timeout: Duration,
}

impl ServiceConfig {
    /// Read the configuration of `service` from the environment.
    ///
    /// # Errors
    /// Returns `ConfigError` naming the first invalid variable.
    pub fn from_env(service: &str, default_port: u16) -> Result<Self, ConfigError> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(service, default_port, |name| std::env::var(name).ok())
    }

    /// Read the configuration from a map of variables.
    pub fn from_map(
        service: &str,
        default_port: u16,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup(service, default_port, |name| vars.get(name).cloned())
    }

    fn from_lookup<F>(service: &str, default_port: u16, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let redis_url = var("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        let broker_url = var("BROKER_URL").unwrap_or_else(|| redis_url.clone());

        let global = policy(
            Tier::Global,
            parse(&var, "GLOBAL_LIMIT_POINTS")?.unwrap_or(10),
            parse(&var, "GLOBAL_LIMIT_WINDOW_SECS")?.unwrap_or(1),
        )?;
        let sensitive = policy(
            Tier::Sensitive,
            parse(&var, "SENSITIVE_LIMIT_POINTS")?.unwrap_or(50),
            parse(&var, "SENSITIVE_LIMIT_WINDOW_SECS")?.unwrap_or(15 * 60),
        )?;

        let max_connect_attempts = match parse::<u32, _>(&var, "BROKER_MAX_CONNECT_ATTEMPTS")? {
            None | Some(0) => None,
            Some(n) => Some(n),
        };

        Ok(Self {
            service_name: var("SERVICE_NAME").unwrap_or_else(|| service.to_string()),
            host: parse(&var, "BIND_HOST")?.unwrap_or(IpAddr::from([0, 0, 0, 0])),
            port: parse(&var, "PORT")?.unwrap_or(default_port),
            redis_url,
            broker_url,
            key_prefix: var("RATE_LIMIT_KEY_PREFIX").unwrap_or_else(|| "rate:".to_string()),
            policies: TierPolicies::new(global, sensitive),
            store_timeout: Duration::from_millis(parse(&var, "STORE_TIMEOUT_MS")?.unwrap_or(250)),
            failure_policy: parse(&var, "STORE_FAILURE_POLICY")?.unwrap_or_default(),
            trust_proxy: parse_flag(&var, "TRUST_PROXY")?.unwrap_or(false),
            connect_delay: Duration::from_millis(
                parse(&var, "BROKER_CONNECT_DELAY_MS")?.unwrap_or(2_000),
            ),
            max_connect_attempts,
            publish_timeout: Duration::from_millis(
                parse(&var, "PUBLISH_TIMEOUT_MS")?.unwrap_or(1_000),
            ),
        })
    }

    /// Address to listen on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Where client addresses come from.
    pub fn client_ip_source(&self) -> ClientIpSource {
        ClientIpSource::from_trust_proxy(self.trust_proxy)
    }

    /// Relay settings derived from this configuration.
    pub fn relay_config(&self) -> RelayConfig {
        let defaults = RelayConfig::default();
        RelayConfig {
            connect_delay: self.connect_delay,
            reconnect: defaults.reconnect.with_max_attempts(self.max_connect_attempts),
            publish_timeout: self.publish_timeout,
            ..defaults
        }
    }
}

fn parse<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

fn parse_flag<F>(var: &F, name: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid {
                name,
                value,
                reason: "expected true or false".to_string(),
            }),
        },
    }
}

fn policy(tier: Tier, points: u32, window_secs: u64) -> Result<TierPolicy, ConfigError> {
    TierPolicy::new(points, Duration::from_secs(window_secs))
        .map_err(|source| ConfigError::Policy { tier, source })
}
