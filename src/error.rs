use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RavelinError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request to {url} timed out: {message}")]
    Timeout { url: String, message: String },

    #[error("Could not connect to {url}: {message}")]
    Connection { url: String, message: String },

    #[error("{url} returned {status}: {message}")]
    Http {
        url: String,
        status: StatusCode,
        message: String,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error(
        "Attempted to connect to master and all replicas have failed, giving up. \
         Failed to get in touch with any of the {attempted} instances{}",
        last_error_suffix(.last_error)
    )]
    AllDestinationsFailed {
        attempted: usize,
        last_error: Option<String>,
    },
}

pub type Result<T> = std::result::Result<T, RavelinError>;

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

impl From<std::io::Error> for RavelinError {
    fn from(e: std::io::Error) -> Self {
        RavelinError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RavelinError {
    fn from(e: serde_json::Error) -> Self {
        RavelinError::Json(e.to_string())
    }
}

impl RavelinError {
    /// Transient, network-level failure: the node is unreachable or shedding
    /// load, so the request may be redirected to another destination.
    pub fn is_server_down(&self) -> bool {
        match self {
            RavelinError::Timeout { .. } | RavelinError::Connection { .. } => true,
            RavelinError::Http { status, .. } => matches!(
                *status,
                StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RavelinError::Timeout { .. })
    }

    pub fn is_http_status(&self, codes: &[StatusCode]) -> bool {
        match self {
            RavelinError::Http { status, .. } => codes.contains(status),
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            RavelinError::Http { status, .. } => Some(*status),
            RavelinError::Timeout { .. } => Some(StatusCode::GATEWAY_TIMEOUT),
            RavelinError::Connection { .. } | RavelinError::AllDestinationsFailed { .. } => {
                Some(StatusCode::SERVICE_UNAVAILABLE)
            }
            _ => None,
        }
    }
}
