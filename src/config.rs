use crate::error::ConfigError;
use crate::snapshot::DeviceGroup;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://cliente.sunthalpy.com:12345/api/client";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_STATE_FILE: &str = "sunthalpy_state.json";

/// Every vendor call is bounded by this, exceeding it is a communication error.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_SETS_UUID: &str = "0e115d1a-9786-403b-831d-10ec07b7d906";
const MAIN_DATA_UUID: &str = "be539f06-ed9c-4a84-96c2-0cf2b002ac31";
const OTHER_DATA_UUID: &str = "5f1b91c4-2311-49eb-804c-7d73e6e7fbcc";

#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Everything the API client needs to talk to the vendor backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub group_uuids: HashMap<DeviceGroup, String>,
    pub user_agent: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        let group_uuids = HashMap::from([
            (DeviceGroup::UserSettings, USER_SETS_UUID.to_string()),
            (DeviceGroup::MainTelemetry, MAIN_DATA_UUID.to_string()),
            (DeviceGroup::SecondaryTelemetry, OTHER_DATA_UUID.to_string()),
        ]);
        Self {
            base_url: base_url.into(),
            credentials: Credentials {
                email: email.into(),
                password: password.into(),
            },
            group_uuids,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn uuid(&self, group: DeviceGroup) -> Option<&str> {
        self.group_uuids.get(&group).map(String::as_str)
    }
}

/// Runtime configuration of the bridge binary, read from the environment.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub client: ClientConfig,
    pub poll_interval: Duration,
    pub state_file: PathBuf,
    pub log_values: bool,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let email = required_var("SUNTHALPY_EMAIL")?;
        let password = required_var("SUNTHALPY_PASSWORD")?;
        let base_url = env::var("SUNTHALPY_BASE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let poll_interval = match env::var("SUNTHALPY_POLL_INTERVAL_SECS") {
            Ok(raw) if !raw.is_empty() => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    var: "SUNTHALPY_POLL_INTERVAL_SECS",
                    value: raw.clone(),
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        var: "SUNTHALPY_POLL_INTERVAL_SECS",
                        value: raw,
                    });
                }
                Duration::from_secs(secs)
            }
            _ => DEFAULT_POLL_INTERVAL,
        };

        let state_file = env::var("SUNTHALPY_STATE_FILE")
            .ok()
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string())
            .into();

        Ok(Self {
            client: ClientConfig::new(base_url, email, password),
            poll_interval,
            state_file,
            log_values: parse_bool_safe(env::var("SUNTHALPY_LOG_VALUES").ok()),
        })
    }
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
