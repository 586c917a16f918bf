use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl OperationCredentials {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        OperationCredentials {
            api_key: Some(api_key.into()),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// The concrete endpoint and credentials a single request is sent with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub url: String,
    #[serde(default)]
    pub credentials: OperationCredentials,
}

impl OperationMetadata {
    pub fn new(url: impl Into<String>) -> Self {
        OperationMetadata {
            url: url.into(),
            credentials: OperationCredentials::default(),
        }
    }

    pub fn with_credentials(url: impl Into<String>, credentials: OperationCredentials) -> Self {
        OperationMetadata {
            url: url.into(),
            credentials,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        };
        f.write_str(name)
    }
}

/// Emitted when a URL starts failing (first failure) or recovers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverStatusChanged {
    pub url: String,
    pub failing: bool,
}
