use crate::dns::name;
use crate::error::ConfigError;
use crate::zone::constants;
use regex::Regex;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port used for transfer targets given without one
const DNS_PORT: u16 = 53;

#[derive(Debug, Clone, PartialEq)]
pub struct AutoConfig {
    /// Address to bind the DNS listeners (UDP and TCP) to
    pub bind_addr: SocketAddr,

    /// HTTP server bind address for metrics and health checks (None = disabled)
    pub http_bind_addr: Option<SocketAddr>,

    /// Names this server claims authority under
    pub origins: Vec<String>,

    /// Directory scanned for zone files
    pub directory: PathBuf,

    /// Regular expression a file name must match to be loaded
    pub name_pattern: String,

    /// Template expanded with the pattern captures to form the zone name
    pub name_template: String,

    /// Time between directory scans (None = load once)
    pub reload_interval: Option<Duration>,

    /// Disable reloading regardless of the interval
    pub no_reload: bool,

    /// Rescan as soon as the directory changes
    pub watch: bool,

    /// Secondaries allowed to transfer and notified of changes ("*" = any client)
    pub transfer_to: Vec<String>,

    /// Upstream servers used to resolve out-of-zone name servers
    pub upstream: Vec<SocketAddr>,

    /// Timeout for upstream queries
    pub upstream_timeout: Duration,

    /// Zone files larger than this are not loaded
    pub max_zone_file_size: u64,

    /// Largest message of an AXFR stream
    pub transfer_message_size: usize,
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 1053)),
            http_bind_addr: None,
            origins: vec![".".to_string()],
            directory: PathBuf::from("."),
            name_pattern: r"db\.(.*)".to_string(),
            name_template: "${1}".to_string(),
            reload_interval: Some(Duration::from_secs(60)),
            no_reload: false,
            watch: false,
            transfer_to: Vec::new(),
            upstream: Vec::new(),
            upstream_timeout: Duration::from_secs(5),
            max_zone_file_size: constants::MAX_ZONE_FILE_SIZE,
            transfer_message_size: constants::TRANSFER_MESSAGE_SIZE,
        }
    }
}

/// On-disk form of [`AutoConfig`]; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_addr: Option<String>,
    http_bind_addr: Option<String>,
    origins: Option<Vec<String>>,
    directory: Option<PathBuf>,
    name_pattern: Option<String>,
    name_template: Option<String>,
    reload_interval: Option<String>,
    no_reload: Option<bool>,
    watch: Option<bool>,
    transfer_to: Option<Vec<String>>,
    upstream: Option<Vec<String>>,
    upstream_timeout: Option<String>,
    max_zone_file_size: Option<u64>,
    transfer_message_size: Option<usize>,
}

impl AutoConfig {
    /// Load a TOML file on top of the defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut config = Self::default();
        if let Some(addr) = file.bind_addr {
            config.bind_addr = parse_socket_addr("bind_addr", &addr)?;
        }
        if let Some(addr) = file.http_bind_addr {
            config.http_bind_addr = Some(parse_socket_addr("http_bind_addr", &addr)?);
        }
        if let Some(origins) = file.origins {
            config.origins = origins;
        }
        if let Some(directory) = file.directory {
            config.directory = directory;
        }
        if let Some(pattern) = file.name_pattern {
            config.name_pattern = pattern;
        }
        if let Some(template) = file.name_template {
            config.name_template = template;
        }
        if let Some(interval) = file.reload_interval {
            config.reload_interval = parse_reload_interval(&interval)?;
        }
        if let Some(no_reload) = file.no_reload {
            config.no_reload = no_reload;
        }
        if let Some(watch) = file.watch {
            config.watch = watch;
        }
        if let Some(transfer_to) = file.transfer_to {
            config.transfer_to = transfer_to;
        }
        if let Some(upstream) = file.upstream {
            config.upstream = parse_upstream(&upstream)?;
        }
        if let Some(timeout) = file.upstream_timeout {
            config.upstream_timeout = parse_duration(&timeout)?;
        }
        if let Some(size) = file.max_zone_file_size {
            config.max_zone_file_size = size;
        }
        if let Some(size) = file.transfer_message_size {
            config.transfer_message_size = size;
        }

        Ok(config)
    }

    /// Apply `AUTOZONE_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("AUTOZONE_BIND_ADDR") {
            self.bind_addr = parse_socket_addr("bind_addr", &addr)?;
        }
        if let Some(addr) = lookup("AUTOZONE_HTTP_BIND_ADDR") {
            self.http_bind_addr = Some(parse_socket_addr("http_bind_addr", &addr)?);
        }
        if let Some(origins) = lookup("AUTOZONE_ORIGINS") {
            self.origins = split_list(&origins);
        }
        if let Some(directory) = lookup("AUTOZONE_DIRECTORY") {
            self.directory = PathBuf::from(directory);
        }
        if let Some(pattern) = lookup("AUTOZONE_NAME_PATTERN") {
            self.name_pattern = pattern;
        }
        if let Some(template) = lookup("AUTOZONE_NAME_TEMPLATE") {
            self.name_template = template;
        }
        if let Some(interval) = lookup("AUTOZONE_RELOAD_INTERVAL") {
            self.reload_interval = parse_reload_interval(&interval)?;
        }
        if let Some(no_reload) = lookup("AUTOZONE_NO_RELOAD") {
            self.no_reload = parse_bool("no_reload", &no_reload)?;
        }
        if let Some(watch) = lookup("AUTOZONE_WATCH") {
            self.watch = parse_bool("watch", &watch)?;
        }
        if let Some(transfer_to) = lookup("AUTOZONE_TRANSFER_TO") {
            self.transfer_to = split_list(&transfer_to);
        }
        if let Some(upstream) = lookup("AUTOZONE_UPSTREAM") {
            self.upstream = parse_upstream(&split_list(&upstream))?;
        }
        if let Some(timeout) = lookup("AUTOZONE_UPSTREAM_TIMEOUT") {
            self.upstream_timeout = parse_duration(&timeout)?;
        }
        if let Some(size) = lookup("AUTOZONE_MAX_ZONE_FILE_SIZE") {
            self.max_zone_file_size = size.parse().map_err(|_| ConfigError::InvalidValue {
                field: "max_zone_file_size",
                value: size.clone(),
            })?;
        }
        if let Some(size) = lookup("AUTOZONE_TRANSFER_MESSAGE_SIZE") {
            self.transfer_message_size = size.parse().map_err(|_| ConfigError::InvalidValue {
                field: "transfer_message_size",
                value: size.clone(),
            })?;
        }

        Ok(())
    }

    /// Check the settings that can only be judged as a whole
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pattern = self.compiled_pattern()?;
        validate_template(&self.name_template, &pattern)?;

        let mut seen = Vec::new();
        for origin in &self.origins {
            let normalized = name::fqdn(origin);
            if !name::is_valid_fqdn(&normalized) {
                return Err(ConfigError::InvalidOrigin(origin.clone()));
            }
            if seen.contains(&normalized) {
                return Err(ConfigError::DuplicateOrigin(normalized));
            }
            seen.push(normalized);
        }

        for target in &self.transfer_to {
            if target != "*" {
                parse_target(target)?;
            }
        }

        if !(512..=u16::MAX as usize).contains(&self.transfer_message_size) {
            return Err(ConfigError::InvalidValue {
                field: "transfer_message_size",
                value: self.transfer_message_size.to_string(),
            });
        }
        if self.max_zone_file_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_zone_file_size",
                value: "0".to_string(),
            });
        }

        Ok(())
    }

    /// The compiled file name pattern, anchored to the whole name
    pub fn compiled_pattern(&self) -> Result<Regex, ConfigError> {
        Regex::new(&format!("^(?:{})$", self.name_pattern))
            .map_err(|e| ConfigError::InvalidPattern(e.to_string()))
    }

    /// Interval between scans, `None` when the loader runs once
    pub fn effective_reload_interval(&self) -> Option<Duration> {
        if self.no_reload {
            None
        } else {
            self.reload_interval
        }
    }

    /// Secondaries that receive NOTIFY messages
    pub fn notify_targets(&self) -> Vec<SocketAddr> {
        self.transfer_to
            .iter()
            .filter(|t| t.as_str() != "*")
            .filter_map(|t| parse_target(t).ok())
            .collect()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_socket_addr(field: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}

/// `ip`, `ip:port` or `[ipv6]:port`; the port defaults to 53
pub fn parse_target(value: &str) -> Result<SocketAddr, ConfigError> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    value
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| ConfigError::InvalidAddress {
            field: "transfer_to",
            value: value.to_string(),
        })
}

fn parse_upstream(values: &[String]) -> Result<Vec<SocketAddr>, ConfigError> {
    values
        .iter()
        .map(|v| {
            parse_target(v).map_err(|_| ConfigError::InvalidAddress {
                field: "upstream",
                value: v.clone(),
            })
        })
        .collect()
}

/// Parse durations such as `500ms`, `30s`, `5m`, `1h` or plain seconds
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: u64 = number.parse().map_err(|_| invalid())?;

    match unit {
        "" | "s" => Ok(Duration::from_secs(number)),
        "ms" => Ok(Duration::from_millis(number)),
        "m" => number
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        "h" => number
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// A duration, or `disabled`/`0` for a loader that runs once
pub fn parse_reload_interval(value: &str) -> Result<Option<Duration>, ConfigError> {
    if value.trim().eq_ignore_ascii_case("disabled") {
        return Ok(None);
    }
    let interval = parse_duration(value)?;
    Ok((!interval.is_zero()).then_some(interval))
}

/// Capture groups referenced by the template must exist in the pattern
fn validate_template(template: &str, pattern: &Regex) -> Result<(), ConfigError> {
    if template.trim().is_empty() {
        return Err(ConfigError::InvalidTemplate("empty template".to_string()));
    }

    let groups = pattern.captures_len();
    let mut chars = template.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        if ch != '$' {
            continue;
        }
        let braced = chars.next_if(|(_, c)| *c == '{').is_some();
        let mut reference = String::new();
        while let Some((_, c)) = chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        {
            reference.push(c);
        }
        if braced && chars.next_if(|(_, c)| *c == '}').is_none() {
            return Err(ConfigError::InvalidTemplate(format!(
                "unclosed group reference in {}",
                template
            )));
        }

        if let Ok(index) = reference.parse::<usize>() {
            if index >= groups {
                return Err(ConfigError::InvalidTemplate(format!(
                    "{} references group {} but the pattern has {}",
                    template,
                    index,
                    groups - 1
                )));
            }
        } else if !reference.is_empty() && pattern.capture_names().flatten().all(|n| n != reference)
        {
            return Err(ConfigError::InvalidTemplate(format!(
                "{} references unknown group {}",
                template, reference
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = AutoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.origins, vec!["."]);
        assert_eq!(config.effective_reload_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_from_toml() {
        let config = AutoConfig::from_toml(
            r#"
bind_addr = "0.0.0.0:53"
origins = ["example.com", "example.org."]
directory = "/var/lib/zones"
name_pattern = '(.*)\.zone'
name_template = "${1}"
reload_interval = "disabled"
transfer_to = ["*", "192.0.2.10", "192.0.2.11:5353"]
upstream = ["8.8.8.8"]
"#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:53".parse().unwrap());
        assert_eq!(config.directory, PathBuf::from("/var/lib/zones"));
        assert_eq!(config.reload_interval, None);
        assert_eq!(config.upstream, vec!["8.8.8.8:53".parse().unwrap()]);
        assert_eq!(
            config.notify_targets(),
            vec![
                "192.0.2.10:53".parse().unwrap(),
                "192.0.2.11:5353".parse().unwrap()
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            AutoConfig::from_toml("reload = true"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AUTOZONE_BIND_ADDR", "127.0.0.1:5300"),
            ("AUTOZONE_ORIGINS", "example.com., example.net."),
            ("AUTOZONE_RELOAD_INTERVAL", "0"),
            ("AUTOZONE_WATCH", "yes"),
        ]);

        let mut config = AutoConfig::default();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bind_addr.port(), 5300);
        assert_eq!(config.origins, vec!["example.com.", "example.net."]);
        assert_eq!(config.effective_reload_interval(), None);
        assert!(config.watch);

        let mut bad = AutoConfig::default();
        assert!(
            bad.apply_env_from(|key| (key == "AUTOZONE_BIND_ADDR").then(|| "nowhere".to_string()))
                .is_err()
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("soon").is_err());
        assert_eq!(parse_reload_interval("0").unwrap(), None);
        assert_eq!(parse_reload_interval("Disabled").unwrap(), None);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = AutoConfig {
            name_pattern: "db\\.(".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPattern(_))));

        let config = AutoConfig {
            name_template: "${2}".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTemplate(_))));

        let config = AutoConfig {
            origins: vec!["example.com".to_string(), "example.com.".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateOrigin(_))));

        let config = AutoConfig {
            transfer_to: vec!["not-an-address".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
