use crate::types::{OperationCredentials, OperationMetadata};
use serde::{Deserialize, Deserializer, Serialize};

/// Key of the topology document on the primary.
pub const REPLICATION_DESTINATIONS_KEY: &str = "Raven/Replication/Destinations";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitiveReplicationOptions {
    /// Replicate only documents changed on the source.
    #[default]
    None,
    /// Also forward documents the source received by replication.
    Replicate,
}

fn deserialize_trimmed_url<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let url = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    Ok(url.trim_end_matches('/').to_string())
}

fn deserialize_null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<bool>::deserialize(deserializer).map(|opt| opt.unwrap_or(false))
}

/// One replica as declared by the primary's replication topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReplicationDestination {
    #[serde(deserialize_with = "deserialize_trimmed_url")]
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_visible_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub transitive_replication_behavior: TransitiveReplicationOptions,
    #[serde(deserialize_with = "deserialize_null_as_false")]
    pub ignored_client: bool,
    #[serde(deserialize_with = "deserialize_null_as_false")]
    pub disabled: bool,
}

impl ReplicationDestination {
    pub fn new(url: &str) -> Self {
        ReplicationDestination {
            url: url.trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// URL requests for this destination are sent to, or `None` when the
    /// destination carries no usable URL.
    pub fn operation_url(&self) -> Option<String> {
        let url = match self.client_visible_url.as_deref() {
            Some(visible) if !visible.is_empty() => visible,
            _ => self.url.as_str(),
        };
        if url.is_empty() {
            return None;
        }

        match self.database.as_deref() {
            Some(db) if !db.is_empty() => {
                Some(format!("{}/databases/{}", root_database_url(url), db))
            }
            _ => Some(url.trim_end_matches('/').to_string()),
        }
    }

    pub fn to_operation_metadata(&self) -> Option<OperationMetadata> {
        let credentials = OperationCredentials {
            api_key: self.api_key.clone(),
        };
        self.operation_url()
            .map(|url| OperationMetadata::with_credentials(url, credentials))
    }
}

/// Server URL with any `/databases/<name>` suffix removed.
pub fn root_database_url(url: &str) -> &str {
    let root = match url.find("/databases/") {
        Some(idx) => &url[..idx],
        None => url,
    };
    root.trim_end_matches('/')
}

/// The topology document stored under [`REPLICATION_DESTINATIONS_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicationDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub destinations: Option<Vec<ReplicationDestination>>,
}

impl ReplicationDocument {
    pub fn new(destinations: Vec<ReplicationDestination>) -> Self {
        ReplicationDocument {
            id: Some(REPLICATION_DESTINATIONS_KEY.to_string()),
            source: None,
            destinations: Some(destinations),
        }
    }

    /// Parse a raw server document, rejecting ones without a `Destinations` list.
    pub fn from_value(document: &serde_json::Value) -> ravelin::Result<Self> {
        if is_invalid_destinations_document(document) {
            return Err(ravelin::RavelinError::Json(
                "document has no Destinations list".into(),
            ));
        }
        Ok(serde_json::from_value(document.clone())?)
    }

    pub fn destinations(&self) -> &[ReplicationDestination] {
        self.destinations.as_deref().unwrap_or_default()
    }
}

pub fn is_invalid_destinations_document(document: &serde_json::Value) -> bool {
    match document.get("Destinations") {
        None | Some(serde_json::Value::Null) => true,
        Some(destinations) => !destinations.is_array(),
    }
}
