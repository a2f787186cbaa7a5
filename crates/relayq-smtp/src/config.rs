//! Relay connection and queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Greeting name used when none is configured.
pub const DEFAULT_HELLO: &str = "localhost";

/// Default connect deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default floor between two sends.
pub const DEFAULT_MIN_INTERVAL_BETWEEN_MESSAGES: Duration = Duration::from_millis(100);

/// Default idle time after which the connection is recycled.
pub const DEFAULT_MAX_INTERVAL_BETWEEN_MESSAGES: Duration = Duration::from_secs(60);

/// Default number of messages sent over one connection.
pub const DEFAULT_MAX_MESSAGES_PER_CONNECTION: usize = 500;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Plain TCP.
    #[default]
    None,
    /// TLS from the start (port 465).
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::Implicit => 465,
        }
    }
}

/// SMTP relay settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    /// Relay hostname.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Name sent with EHLO/HELO.
    #[serde(default)]
    pub hello: Option<String>,
    /// Username for AUTH LOGIN.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for AUTH LOGIN.
    #[serde(default)]
    pub password: Option<String>,
    /// Security mode.
    #[serde(default)]
    pub security: Security,
    /// Connect deadline; zero disables it.
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("hello", &self.hello)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("security", &self.security)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl SmtpSettings {
    /// Creates plain-TCP settings on port 25 without credentials.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self::builder(host).build()
    }

    /// Creates a settings builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> SmtpSettingsBuilder {
        SmtpSettingsBuilder::new(host)
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns the greeting name, falling back to `localhost`.
    #[must_use]
    pub fn hello_name(&self) -> &str {
        self.hello
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_HELLO)
    }

    /// Returns the credentials when both username and password are set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username.as_deref().zip(self.password.as_deref())
    }
}

/// Builder for [`SmtpSettings`].
#[derive(Debug, Clone)]
pub struct SmtpSettingsBuilder {
    host: String,
    port: Option<u16>,
    hello: Option<String>,
    username: Option<String>,
    password: Option<String>,
    security: Security,
    connect_timeout: Duration,
}

impl SmtpSettingsBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            hello: None,
            username: None,
            password: None,
            security: Security::None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the greeting name.
    #[must_use]
    pub fn hello(mut self, hello: impl Into<String>) -> Self {
        self.hello = Some(hello.into());
        self
    }

    /// Sets the AUTH LOGIN credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builds the settings.
    #[must_use]
    pub fn build(self) -> SmtpSettings {
        SmtpSettings {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            hello: self.hello,
            username: self.username,
            password: self.password,
            security: self.security,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Pacing and recycling limits for the message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Idle time after which the next send reconnects first.
    #[serde(
        default = "default_max_interval_between_messages",
        with = "duration_secs"
    )]
    pub max_interval_between_messages: Duration,
    /// Minimum time between the end of one send and the start of the next.
    #[serde(
        default = "default_min_interval_between_messages",
        with = "duration_secs"
    )]
    pub min_interval_between_messages: Duration,
    /// Messages sent over one connection before it is recycled.
    #[serde(default = "default_max_messages_per_connection")]
    pub max_messages_per_connection: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_interval_between_messages: DEFAULT_MAX_INTERVAL_BETWEEN_MESSAGES,
            min_interval_between_messages: DEFAULT_MIN_INTERVAL_BETWEEN_MESSAGES,
            max_messages_per_connection: DEFAULT_MAX_MESSAGES_PER_CONNECTION,
        }
    }
}

impl QueueSettings {
    /// Sets the idle recycling interval.
    #[must_use]
    pub const fn max_interval_between_messages(mut self, interval: Duration) -> Self {
        self.max_interval_between_messages = interval;
        self
    }

    /// Sets the minimum spacing between sends.
    #[must_use]
    pub const fn min_interval_between_messages(mut self, interval: Duration) -> Self {
        self.min_interval_between_messages = interval;
        self
    }

    /// Sets the per-connection message limit.
    #[must_use]
    pub const fn max_messages_per_connection(mut self, limit: usize) -> Self {
        self.max_messages_per_connection = limit;
        self
    }
}

const fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

const fn default_max_interval_between_messages() -> Duration {
    DEFAULT_MAX_INTERVAL_BETWEEN_MESSAGES
}

const fn default_min_interval_between_messages() -> Duration {
    DEFAULT_MIN_INTERVAL_BETWEEN_MESSAGES
}

const fn default_max_messages_per_connection() -> usize {
    DEFAULT_MAX_MESSAGES_PER_CONNECTION
}

/// Serde helpers for durations written as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    #[allow(clippy::trivially_copy_pass_by_ref)] // Required by serde with= signature
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 25);
        assert_eq!(Security::Implicit.default_port(), 465);
    }

    #[test]
    fn test_settings_builder() {
        let settings = SmtpSettings::builder("smtp.example.com")
            .port(587)
            .hello("client.example.com")
            .credentials("user", "secret")
            .connect_timeout(Duration::from_secs(10))
            .build();

        assert_eq!(settings.address(), "smtp.example.com:587");
        assert_eq!(settings.hello_name(), "client.example.com");
        assert_eq!(settings.credentials(), Some(("user", "secret")));
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = SmtpSettings::new("smtp.example.com");
        assert_eq!(settings.port, 25);
        assert_eq!(settings.hello_name(), DEFAULT_HELLO);
        assert_eq!(settings.credentials(), None);
        assert_eq!(settings.connect_timeout, DEFAULT_CONNECT_TIMEOUT);

        let settings = SmtpSettings::builder("smtp.example.com")
            .security(Security::Implicit)
            .build();
        assert_eq!(settings.port, 465);
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let mut settings = SmtpSettings::new("smtp.example.com");
        settings.username = Some("user".into());
        assert_eq!(settings.credentials(), None);
    }

    #[test]
    fn test_ipv6_address() {
        let settings = SmtpSettings::builder("::1").port(2525).build();
        assert_eq!(settings.address(), "[::1]:2525");
    }

    #[test]
    fn test_debug_hides_password() {
        let settings = SmtpSettings::builder("smtp.example.com")
            .credentials("user", "hunter2")
            .build();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_settings_from_json() {
        let settings: SmtpSettings = serde_json::from_str(
            r#"{"host":"smtp.example.com","port":587,"username":"u","password":"p","connect_timeout":1.5}"#,
        )
        .unwrap();
        assert_eq!(settings.security, Security::None);
        assert_eq!(settings.connect_timeout, Duration::from_millis(1500));
        assert_eq!(settings.credentials(), Some(("u", "p")));
    }

    #[test]
    fn test_queue_settings_defaults_from_empty_json() {
        let settings: QueueSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, QueueSettings::default());
        assert_eq!(settings.min_interval_between_messages, Duration::from_millis(100));
        assert_eq!(settings.max_interval_between_messages, Duration::from_secs(60));
        assert_eq!(settings.max_messages_per_connection, 500);
    }
}
