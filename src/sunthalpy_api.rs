use crate::config::{ClientConfig, Credentials};
use crate::error::{ApiError, ApiResult, ConfigError};
use crate::snapshot::{DeviceGroup, GroupPayload, Snapshot};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Client for the Sunthalpy cloud API.
///
/// A fresh token is requested for every public operation, tokens are never
/// cached between calls.
pub struct SunthalpyApi {
    base_url: String,
    credentials: RwLock<Credentials>,
    config: ClientConfig,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandValue {
    Bool(bool),
    Number(f64),
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    pass: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    obj: TokenObject,
}

#[derive(Deserialize)]
struct TokenObject {
    token: String,
}

#[derive(Serialize)]
struct DeviceRequest<'a> {
    uuid: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandRequest<'a> {
    uuid: &'a str,
    value: CommandValue,
    device_internal_address: &'a str,
}

impl SunthalpyApi {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // The backend presents a self-signed certificate
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials: RwLock::new(config.credentials.clone()),
            config,
            client,
        })
    }

    /// Replaces the login credentials, used after a re-auth prompt.
    pub fn set_credentials(&self, credentials: Credentials) {
        match self.credentials.write() {
            Ok(mut current) => *current = credentials,
            Err(poisoned) => *poisoned.into_inner() = credentials,
        }
    }

    fn current_credentials(&self) -> Credentials {
        match self.credentials.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn authenticate(&self) -> ApiResult<String> {
        let credentials = self.current_credentials();
        let body = LoginRequest {
            email: &credentials.email,
            pass: &credentials.password,
        };
        let response: LoginResponse = self.post("login", &body, None).await?;
        debug!("Acquired API token");
        Ok(response.obj.token)
    }

    pub async fn fetch_group(&self, group: DeviceGroup) -> ApiResult<GroupPayload> {
        let token = self.authenticate().await?;
        self.fetch_group_with_token(group, &token).await
    }

    async fn fetch_group_with_token(&self, group: DeviceGroup, token: &str) -> ApiResult<GroupPayload> {
        let uuid = self.uuid(group)?;
        self.post("get/device-data/last", &DeviceRequest { uuid }, Some(token))
            .await
    }

    /// Fetches every device group with a single token.
    pub async fn fetch_all(&self) -> ApiResult<Snapshot> {
        debug!("Getting data from the API");
        let token = self.authenticate().await?;

        let mut snapshot = Snapshot::new();
        for group in DeviceGroup::FETCHED {
            let payload = self.fetch_group_with_token(group, &token).await?;
            snapshot.insert_group(group, payload);
        }
        Ok(snapshot)
    }

    pub async fn send_command(
        &self,
        group: DeviceGroup,
        address: &str,
        value: CommandValue,
    ) -> ApiResult<Value> {
        let uuid = self.uuid(group)?;
        let token = self.authenticate().await?;
        info!("Sending command {group}--{address} = {value:?}");
        let body = CommandRequest {
            uuid,
            value,
            device_internal_address: address,
        };
        self.post("send/device/command", &body, Some(&token)).await
    }

    pub async fn switch_on(&self, group: DeviceGroup, address: &str) -> ApiResult<Value> {
        self.send_command(group, address, CommandValue::Bool(true))
            .await
    }

    pub async fn switch_off(&self, group: DeviceGroup, address: &str) -> ApiResult<Value> {
        self.send_command(group, address, CommandValue::Bool(false))
            .await
    }

    /// Numeric set points are sent with one decimal.
    pub async fn update_number(&self, group: DeviceGroup, address: &str, value: f64) -> ApiResult<Value> {
        let rounded = (value * 10.0).round() / 10.0;
        self.send_command(group, address, CommandValue::Number(rounded))
            .await
    }

    fn uuid(&self, group: DeviceGroup) -> ApiResult<&str> {
        self.config
            .uuid(group)
            .ok_or_else(|| ApiError::Client(format!("No device UUID configured for group {group}")))
    }

    async fn post<B, T>(&self, path: &str, body: &B, token: Option<&str>) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .json(body);
        if let Some(token) = token {
            request = request.header("auth", token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("Backend rejected credentials on /{path}");
                Err(ApiError::Authentication(format!(
                    "HTTP {} on /{path}",
                    response.status().as_u16()
                )))
            }
            status if !status.is_success() => Err(ApiError::Communication(format!(
                "HTTP {} on /{path}",
                status.as_u16()
            ))),
            _ => Ok(response.json().await?),
        }
    }
}

#[async_trait]
impl crate::poll_coordinator::TelemetrySource for SunthalpyApi {
    async fn fetch_all(&self) -> ApiResult<Snapshot> {
        SunthalpyApi::fetch_all(self).await
    }
}

#[async_trait]
impl crate::entities::DeviceCommands for SunthalpyApi {
    async fn switch(&self, group: DeviceGroup, address: &str, on: bool) -> ApiResult<Value> {
        if on {
            self.switch_on(group, address).await
        } else {
            self.switch_off(group, address).await
        }
    }

    async fn set_number(&self, group: DeviceGroup, address: &str, value: f64) -> ApiResult<Value> {
        self.update_number(group, address, value).await
    }
}
