//! Server configuration.

use crate::{DEFAULT_BIND, DEFAULT_HZ, DEFAULT_MAX_CLIENTS, DEFAULT_PORT, DEFAULT_QUERY_BUFFER_LIMIT};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Highest accepted reactor tick frequency.
const MAX_HZ: u32 = 500;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bind address
    pub bind: String,
    /// Port number (0 picks a free port)
    pub port: u16,
    /// Primary to follow; `None` runs as a primary
    pub replicaof: Option<(String, u16)>,
    /// Maximum number of clients
    pub max_clients: usize,
    /// Reactor ticks per second when idle
    pub hz: u32,
    /// Unprocessed input a client may accumulate before it is disconnected
    pub query_buffer_limit: usize,
    /// Log level
    pub loglevel: LogLevel,
    /// Log file path (stdout when unset)
    pub logfile: Option<PathBuf>,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    Verbose,
    #[default]
    Notice,
    Warning,
}

impl LogLevel {
    /// The matching `tracing` filter directive.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "trace",
            LogLevel::Verbose => "debug",
            LogLevel::Notice => "info",
            LogLevel::Warning => "warn",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            "notice" => Ok(LogLevel::Notice),
            "warning" => Ok(LogLevel::Warning),
            _ => Err(format!("Invalid loglevel: {s}")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            replicaof: None,
            max_clients: DEFAULT_MAX_CLIENTS,
            hz: DEFAULT_HZ,
            query_buffer_limit: DEFAULT_QUERY_BUFFER_LIMIT,
            loglevel: LogLevel::default(),
            logfile: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Follow the primary at `host:port`.
    pub fn replicaof(mut self, host: impl Into<String>, port: u16) -> Self {
        self.replicaof = Some((host.into(), port));
        self
    }

    /// Set max clients.
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Set the reactor tick frequency, clamped to `1..=500`.
    pub fn hz(mut self, hz: u32) -> Self {
        self.hz = hz.clamp(1, MAX_HZ);
        self
    }

    /// Set the per-client input buffer limit in bytes.
    pub fn query_buffer_limit(mut self, bytes: usize) -> Self {
        self.query_buffer_limit = bytes;
        self
    }

    /// Set the log level.
    pub fn loglevel(mut self, level: LogLevel) -> Self {
        self.loglevel = level;
        self
    }

    /// Address string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Load configuration from a file (redis.conf compatible format).
    ///
    /// # Format
    /// ```text
    /// # Comment
    /// directive value
    /// directive "value with spaces"
    /// ```
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (directive, value) = Self::parse_line(line);
            config.apply_directive(&directive.to_ascii_lowercase(), value, line_num + 1)?;
        }
        Ok(config)
    }

    /// Split a config line into directive and value.
    fn parse_line(line: &str) -> (&str, &str) {
        let mut parts = line.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or_default().trim();
        let value = parts.next().map(str::trim).unwrap_or_default();

        let value = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            &value[1..value.len() - 1]
        } else {
            value
        };
        (directive, value)
    }

    /// Apply a single directive. Also used for command-line overrides.
    pub fn apply_directive(
        &mut self,
        directive: &str,
        value: &str,
        line: usize,
    ) -> Result<(), ConfigError> {
        match directive {
            "bind" => {
                // Only the first address of a list is used.
                self.bind = value
                    .split_whitespace()
                    .next()
                    .unwrap_or(DEFAULT_BIND)
                    .to_string();
            }
            "port" => self.port = parse_number(value, line)?,
            "replicaof" | "slaveof" => self.replicaof = parse_replicaof(value, line)?,
            "maxclients" => {
                let max: usize = parse_number(value, line)?;
                if max == 0 {
                    return Err(ConfigError::Parse {
                        line,
                        message: "maxclients must be at least 1".to_string(),
                    });
                }
                self.max_clients = max;
            }
            "hz" => self.hz = parse_number::<u32>(value, line)?.clamp(1, MAX_HZ),
            "client-query-buffer-limit" => self.query_buffer_limit = parse_memory(value, line)?,
            "loglevel" => {
                self.loglevel = value
                    .parse()
                    .map_err(|message| ConfigError::Parse { line, message })?;
            }
            "logfile" => {
                self.logfile = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            _ => {
                tracing::warn!(line, directive, "ignoring unknown config directive");
            }
        }
        Ok(())
    }
}

/// Configuration parsing error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O error reading the config file.
    #[error("cannot read {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// Malformed directive value.
    #[error("config error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

fn parse_number<T: FromStr>(value: &str, line: usize) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Parse {
        line,
        message: format!("Invalid number: {value}"),
    })
}

/// A byte count with an optional `k`, `m` or `g` suffix (`kb`, `mb`, `gb`
/// also accepted), in powers of 1024.
fn parse_memory(value: &str, line: usize) -> Result<usize, ConfigError> {
    let value = value.trim().to_ascii_lowercase();
    let digits = value.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let multiplier: usize = match &value[digits.len()..] {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        unit => {
            return Err(ConfigError::Parse {
                line,
                message: format!("Invalid memory unit: {unit}"),
            })
        }
    };
    let num: usize = parse_number(digits.trim(), line)?;
    num.checked_mul(multiplier).ok_or_else(|| ConfigError::Parse {
        line,
        message: format!("Memory value out of range: {value}"),
    })
}

/// `<host> <port>`, or `no one` to stay a primary.
fn parse_replicaof(value: &str, line: usize) -> Result<Option<(String, u16)>, ConfigError> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        [no, one] if no.eq_ignore_ascii_case("no") && one.eq_ignore_ascii_case("one") => Ok(None),
        [host, port] => Ok(Some((host.to_string(), parse_number(port, line)?))),
        _ => Err(ConfigError::Parse {
            line,
            message: format!("replicaof expects <host> <port>, got: {value}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 6379);
        assert_eq!(config.replicaof, None);
        assert_eq!(config.hz, 10);
        assert_eq!(config.listen_addr(), "127.0.0.1:6379");
    }

    #[test]
    fn test_parse_config() {
        let config_str = r#"
# Test config
bind 0.0.0.0 ::1
port 6380
replicaof "localhost 6379"
maxclients 1000
hz 50
loglevel warning
logfile /tmp/rivulet.log
save 900 1
"#;

        let config = Config::parse(config_str).unwrap();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 6380);
        assert_eq!(config.replicaof, Some(("localhost".to_string(), 6379)));
        assert_eq!(config.max_clients, 1000);
        assert_eq!(config.hz, 50);
        assert_eq!(config.loglevel, LogLevel::Warning);
        assert_eq!(config.logfile, Some(PathBuf::from("/tmp/rivulet.log")));
    }

    #[test]
    fn test_query_buffer_limit() {
        assert_eq!(Config::default().query_buffer_limit, 1024 * 1024 * 1024);
        let config = Config::parse("client-query-buffer-limit 64mb\n").unwrap();
        assert_eq!(config.query_buffer_limit, 64 * 1024 * 1024);
        assert_eq!(parse_memory("512k", 1).unwrap(), 512 * 1024);
        assert_eq!(parse_memory("4096", 1).unwrap(), 4096);
        assert!(parse_memory("1tb", 3).is_err());
    }

    #[test]
    fn test_replicaof_no_one() {
        let config = Config::parse("replicaof localhost 6379\nreplicaof no one\n").unwrap();
        assert_eq!(config.replicaof, None);
    }

    #[test]
    fn test_parse_errors_carry_line() {
        assert_eq!(
            Config::parse("\nport many\n"),
            Err(ConfigError::Parse {
                line: 2,
                message: "Invalid number: many".to_string()
            })
        );
        assert!(matches!(
            Config::parse("replicaof localhost"),
            Err(ConfigError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            Config::parse("loglevel loud"),
            Err(ConfigError::Parse { line: 1, .. })
        ));
        assert!(Config::parse("maxclients 0").is_err());
    }

    #[test]
    fn test_hz_is_clamped() {
        assert_eq!(Config::parse("hz 0").unwrap().hz, 1);
        assert_eq!(Config::parse("hz 100000").unwrap().hz, MAX_HZ);
        assert_eq!(Config::new().hz(0).hz, 1);
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .bind("0.0.0.0")
            .port(0)
            .replicaof("primary", 7000)
            .max_clients(5)
            .loglevel(LogLevel::Debug);
        assert_eq!(config.listen_addr(), "0.0.0.0:0");
        assert_eq!(config.replicaof, Some(("primary".to_string(), 7000)));
        assert_eq!(config.max_clients, 5);
        assert_eq!(config.loglevel.as_filter(), "trace");
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load_from_file("/nonexistent/rivulet.conf"),
            Err(ConfigError::Io { .. })
        ));
    }
}
