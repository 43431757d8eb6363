// cqgbridge/src/config.rs
//
// Explicit configuration passed into session construction.

use crate::base::BridgeError;
use chrono_tz::Tz;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_DISPLAY_TIME_ZONE: &str = "Asia/Kolkata";
pub const DEFAULT_SUBSCRIPTION_LEVEL: u32 = 1;

/// Logon credentials presented to the backend.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
  pub username: String,
  pub password: String,
  pub client_app_id: String,
  pub client_version: String,
  pub protocol_version_major: u32,
  #[serde(default)]
  pub protocol_version_minor: u32,
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("username", &self.username)
      .field("password", &"***")
      .field("client_app_id", &self.client_app_id)
      .field("client_version", &self.client_version)
      .field("protocol_version_major", &self.protocol_version_major)
      .field("protocol_version_minor", &self.protocol_version_minor)
      .finish()
  }
}

impl Credentials {
  pub fn validate(&self) -> Result<(), BridgeError> {
    let fields = [
      ("username", &self.username),
      ("password", &self.password),
      ("client_app_id", &self.client_app_id),
      ("client_version", &self.client_version),
    ];
    for (name, value) in fields {
      if value.is_empty() {
        return Err(BridgeError::InvalidArgument(format!("{} must not be empty", name)));
      }
    }
    if self.protocol_version_major == 0 {
      return Err(BridgeError::InvalidArgument("protocol_version_major must not be zero".to_string()));
    }
    Ok(())
  }
}

/// Where the raw frame log goes, if enabled.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FrameLogConfig {
  pub db_path: PathBuf,
  /// Generated when absent.
  #[serde(default)]
  pub session_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
  /// Backend WebSocket URL, e.g. `ws://host:port/path`.
  pub endpoint: String,
  pub credentials: Credentials,
  #[serde(default = "default_subscription_level")]
  pub subscription_level: u32,
  /// IANA zone used to render trade times for display.
  #[serde(default = "default_display_time_zone")]
  pub display_time_zone: String,
  #[serde(default)]
  pub persistence_db: Option<PathBuf>,
  #[serde(default)]
  pub frame_log: Option<FrameLogConfig>,
}

fn default_subscription_level() -> u32 { DEFAULT_SUBSCRIPTION_LEVEL }
fn default_display_time_zone() -> String { DEFAULT_DISPLAY_TIME_ZONE.to_string() }

impl BridgeConfig {
  pub fn new(endpoint: &str, credentials: Credentials) -> Self {
    BridgeConfig {
      endpoint: endpoint.to_string(),
      credentials,
      subscription_level: DEFAULT_SUBSCRIPTION_LEVEL,
      display_time_zone: DEFAULT_DISPLAY_TIME_ZONE.to_string(),
      persistence_db: None,
      frame_log: None,
    }
  }

  pub fn from_json_str(text: &str) -> Result<Self, BridgeError> {
    let config: BridgeConfig = serde_json::from_str(text)
      .map_err(|e| BridgeError::ConfigurationError(format!("Invalid config: {}", e)))?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, BridgeError> {
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
      BridgeError::ConfigurationError(format!("Reading config {:?}: {}", path.as_ref(), e))
    })?;
    Self::from_json_str(&text)
  }

  pub fn validate(&self) -> Result<(), BridgeError> {
    if self.endpoint.is_empty() {
      return Err(BridgeError::ConfigurationError("endpoint must not be empty".to_string()));
    }
    self.credentials.validate()
      .map_err(|e| BridgeError::ConfigurationError(e.to_string()))?;
    self.display_tz()?;
    Ok(())
  }

  pub fn display_tz(&self) -> Result<Tz, BridgeError> {
    parse_time_zone(&self.display_time_zone)
  }
}

pub fn parse_time_zone(name: &str) -> Result<Tz, BridgeError> {
  name.parse::<Tz>()
    .map_err(|e| BridgeError::ConfigurationError(format!("Unknown time zone '{}': {}", name, e)))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn creds() -> Credentials {
    Credentials {
      username: "user".to_string(),
      password: "secret".to_string(),
      client_app_id: "WebApiTest".to_string(),
      client_version: "python-client".to_string(),
      protocol_version_major: 2,
      protocol_version_minor: 240,
    }
  }

  #[test]
  fn parses_minimal_config_with_defaults() {
    let text = r#"{
      "endpoint": "ws://127.0.0.1:9000/",
      "credentials": {
        "username": "user", "password": "secret",
        "client_app_id": "WebApiTest", "client_version": "python-client",
        "protocol_version_major": 2
      }
    }"#;
    let config = BridgeConfig::from_json_str(text).unwrap();
    assert_eq!(config.subscription_level, 1);
    assert_eq!(config.display_time_zone, "Asia/Kolkata");
    assert_eq!(config.credentials.protocol_version_minor, 0);
    assert!(config.persistence_db.is_none());
    assert!(config.frame_log.is_none());
  }

  #[test]
  fn rejects_empty_credential_field() {
    let mut c = creds();
    c.client_version.clear();
    assert!(matches!(c.validate(), Err(BridgeError::InvalidArgument(_))));
    let config = BridgeConfig::new("ws://x/", c);
    assert!(matches!(config.validate(), Err(BridgeError::ConfigurationError(_))));
  }

  #[test]
  fn rejects_unknown_time_zone() {
    let mut config = BridgeConfig::new("ws://x/", creds());
    config.display_time_zone = "Mars/Olympus".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn debug_hides_password() {
    let text = format!("{:?}", creds());
    assert!(!text.contains("secret"));
  }
}
