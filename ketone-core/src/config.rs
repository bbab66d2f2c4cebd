use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

/// Settings for the REST adapter and its serializer.
///
/// ```toml
/// url = "http://api.example.com"
/// namespace = "v1"
/// bulk_commit = true
///
/// [plurals]
/// person = "people"
///
/// [sideload_as]
/// person = "person"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Root URL prepended to every path. Empty means relative URLs.
    pub url: String,
    pub namespace: Option<String>,
    /// Group same-type, same-operation records into one request.
    pub bulk_commit: bool,
    /// Singular -> plural overrides.
    pub plurals: IndexMap<String, String>,
    /// Sideload key -> type name, for sideload keys that are not the
    /// plural of a registered type.
    pub sideload_as: IndexMap<String, String>,
    /// Top-level response key carrying metadata.
    pub meta_key: String,
    /// Field of the metadata object holding the incremental-sync token.
    pub since_key: String,
    /// Request parameter the token is sent back under.
    pub since_param: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            url: String::new(),
            namespace: None,
            bulk_commit: false,
            plurals: IndexMap::new(),
            sideload_as: IndexMap::new(),
            meta_key: "meta".to_string(),
            since_key: "since".to_string(),
            since_param: "since".to_string(),
        }
    }
}

impl AdapterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AdapterConfig = toml::from_str(text)?;
        Ok(config.normalized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self.normalized()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self.normalized()
    }

    /// Strips the slashes URL building adds itself: trailing on `url`, both
    /// ends of `namespace`. An empty namespace is no namespace.
    pub(crate) fn normalized(mut self) -> Self {
        self.url.truncate(self.url.trim_end_matches('/').len());
        self.namespace = self
            .namespace
            .as_deref()
            .map(|namespace| namespace.trim_matches('/'))
            .filter(|namespace| !namespace.is_empty())
            .map(str::to_string);
        self
    }

    pub fn with_bulk_commit(mut self, bulk_commit: bool) -> Self {
        self.bulk_commit = bulk_commit;
        self
    }

    pub fn with_plural(mut self, singular: impl Into<String>, plural: impl Into<String>) -> Self {
        self.plurals.insert(singular.into(), plural.into());
        self
    }

    pub fn with_sideload_alias(mut self, key: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.sideload_as.insert(key.into(), type_name.into());
        self
    }

    pub fn with_meta_key(mut self, key: impl Into<String>) -> Self {
        self.meta_key = key.into();
        self
    }

    pub fn with_since_key(mut self, key: impl Into<String>) -> Self {
        self.since_key = key.into();
        self
    }

    pub fn with_since_param(mut self, param: impl Into<String>) -> Self {
        self.since_param = param.into();
        self
    }
}
