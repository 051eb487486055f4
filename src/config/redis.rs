//! Redis-specific connection configuration

use std::time::Duration;

use crate::EventBusError;

#[cfg_attr(not(feature = "redis"), allow(dead_code))]
const DEFAULT_PORT: u16 = 6379;

/// Connection configuration for the Redis pub/sub backend
#[derive(Clone, Debug)]
pub struct RedisConnectionConfig {
    address: String,
    username: Option<String>,
    password: Option<String>,
    database: i64,
    connect_timeout: Duration,
    subscription_capacity: usize,
}

impl RedisConnectionConfig {
    /// Create a new connection configuration for `address`.
    ///
    /// `address` is either `host:port` or a complete `redis://` / `rediss://` URL.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: None,
            password: None,
            database: 0,
            connect_timeout: Duration::from_secs(5),
            subscription_capacity: 256,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn database(&self) -> i64 {
        self.database
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Messages buffered per subscription before the reader waits on the session.
    pub fn subscription_capacity(&self) -> usize {
        self.subscription_capacity
    }

    /// Build the connection settings handed to the Redis client.
    ///
    /// A full URL passed to [`RedisConnectionConfig::new`] is parsed as-is.
    /// Otherwise the address is split into host and port and the credentials
    /// are passed through untouched, so they may contain any character.
    #[cfg(feature = "redis")]
    pub fn connection_info(&self) -> Result<::redis::ConnectionInfo, EventBusError> {
        use ::redis::IntoConnectionInfo;

        if self.is_url() {
            return self
                .address
                .as_str()
                .into_connection_info()
                .map_err(|e| EventBusError::Config(format!("invalid Redis URL: {e}")));
        }

        let (host, port) = split_host_port(&self.address)?;
        Ok(::redis::ConnectionInfo {
            addr: ::redis::ConnectionAddr::Tcp(host, port),
            redis: ::redis::RedisConnectionInfo {
                db: self.database,
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        })
    }

    fn is_url(&self) -> bool {
        self.address.starts_with("redis://") || self.address.starts_with("rediss://")
    }

    pub fn set_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into()).filter(|u: &String| !u.is_empty());
        self
    }

    pub fn set_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into()).filter(|p: &String| !p.is_empty());
        self
    }

    pub fn set_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn set_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self::new("localhost:6379")
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 hosts.
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
fn split_host_port(address: &str) -> Result<(String, u16), EventBusError> {
    let invalid = || EventBusError::Config(format!("invalid Redis address `{address}`"));

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match address.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}
