use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_LISTEN_PORT: u16 = 9210;
const DEFAULT_SCRAPE_TIMEOUT: u64 = 20;
const DEFAULT_FETCH_TIMEOUT: u64 = 10;
const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_SESSION_TIMEOUT: u64 = 300;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}, {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// The credential pair applied to every target.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"**REDACTED**")
            .finish()
    }
}

/// Process level configuration, read from the environment once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// `None` when `USERNAME` or `PASSWORD` is unset, every scrape request
    /// is rejected in that case.
    pub credentials: Option<Credentials>,

    pub listen: SocketAddr,

    /// The deadline of a whole scrape.
    pub scrape_timeout: Duration,

    /// Timeout of a single request to the BMC.
    pub fetch_timeout: Duration,

    /// Max in-flight resource fetches of one scrape.
    pub concurrency: usize,

    /// Session lifetime used when the BMC does not advertise one.
    pub session_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            credentials: None,
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            scrape_timeout: Duration::from_secs(DEFAULT_SCRAPE_TIMEOUT),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT),
            concurrency: DEFAULT_CONCURRENCY,
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = match (lookup("USERNAME"), lookup("PASSWORD")) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials { username, password })
            }
            _ => None,
        };

        let port = parse(&lookup, "LISTEN_PORT", DEFAULT_LISTEN_PORT)?;
        let scrape_timeout = parse(&lookup, "TIMEOUT_SECONDS", DEFAULT_SCRAPE_TIMEOUT)?;
        let fetch_timeout = parse(&lookup, "TIMEOUT", DEFAULT_FETCH_TIMEOUT)?;
        let concurrency = parse(&lookup, "CONCURRENCY", DEFAULT_CONCURRENCY)?;
        let session_timeout = parse(&lookup, "SESSION_TIMEOUT_SECONDS", DEFAULT_SESSION_TIMEOUT)?;

        if scrape_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TIMEOUT_SECONDS",
                value: scrape_timeout.to_string(),
                reason: "must be greater than zero".into(),
            });
        }

        if concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CONCURRENCY",
                value: concurrency.to_string(),
                reason: "must be greater than zero".into(),
            });
        }

        // a single fetch can never outlive the scrape it belongs to
        let fetch_timeout = fetch_timeout.clamp(1, scrape_timeout);

        Ok(Config {
            credentials,
            listen: SocketAddr::from(([0, 0, 0, 0], port)),
            scrape_timeout: Duration::from_secs(scrape_timeout),
            fetch_timeout: Duration::from_secs(fetch_timeout),
            concurrency,
            session_timeout: Duration::from_secs(session_timeout),
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| ConfigError::InvalidValue {
                key,
                value,
                reason: err.to_string(),
            }),
        None => Ok(default),
    }
}
