pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Failures surfaced by the vendor API client.
///
/// Messages are kept as owned strings so the coordinator can hand the last
/// error to every subscriber without holding on to transport types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// Bad credentials (HTTP 401/403). Needs a re-auth, not a retry.
    #[error("Invalid credentials: {0}")]
    Authentication(String),
    /// Timeout, DNS/socket failure or any other transport problem.
    #[error("Error fetching information - {0}")]
    Communication(String),
    /// Anything unexpected, usually a schema mismatch with the backend.
    #[error("Something really wrong happened! - {0}")]
    Client(String),
}

impl ApiError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, ApiError::Authentication(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Communication(format!("Timeout error fetching information - {err}"))
        } else if err.is_decode() {
            ApiError::Client(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => ApiError::Authentication(err.to_string()),
                _ => ApiError::Communication(err.to_string()),
            }
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ApiError::Communication(err.to_string())
        } else {
            ApiError::Client(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    MissingVar(&'static str),
    #[error("Invalid value '{value}' for {var}")]
    InvalidValue { var: &'static str, value: String },
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State file I/O error")]
    Io(#[from] std::io::Error),
    #[error("State file is not valid JSON")]
    Json(#[from] serde_json::Error),
}
