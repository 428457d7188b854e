//! Service provider configuration.
//!
//! Feature flags and limits read by the dispatcher and advertised at
//! `/ServiceProviderConfig`. Configuration is read-mostly: consumers reach
//! it through a [`ConfigAccessor`] supplier, and runtime updates are atomic
//! swaps of the whole structure.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};

/// A feature that is simply on or off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Whether the feature is supported
    pub supported: bool,
}

/// Filtering support and its result ceiling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Whether filtering is supported
    pub supported: bool,
    /// Maximum number of resources returned from any query
    pub max_results: usize,
}

/// Bulk support and its request ceilings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkConfig {
    /// Whether bulk requests are supported
    pub supported: bool,
    /// Maximum number of operations per bulk request
    pub max_operations: usize,
    /// Maximum bulk payload size in bytes
    pub max_payload_size: usize,
}

/// Process-wide service provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderConfig {
    /// Link to the provider's documentation, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation_uri: Option<String>,
    /// PATCH support
    pub patch: FeatureConfig,
    /// Bulk support and limits
    pub bulk: BulkConfig,
    /// Filter support and limits
    pub filter: FilterConfig,
    /// Password change support
    pub change_password: FeatureConfig,
    /// Sort support
    pub sort: FeatureConfig,
    /// ETag concurrency support
    pub etag: FeatureConfig,
}

impl Default for ServiceProviderConfig {
    fn default() -> Self {
        Self {
            documentation_uri: None,
            patch: FeatureConfig { supported: true },
            bulk: BulkConfig {
                supported: true,
                max_operations: 1000,
                max_payload_size: 1_048_576,
            },
            filter: FilterConfig {
                supported: true,
                max_results: 200,
            },
            change_password: FeatureConfig { supported: false },
            sort: FeatureConfig { supported: true },
            etag: FeatureConfig { supported: true },
        }
    }
}

impl ServiceProviderConfig {
    /// Render the `/ServiceProviderConfig` discovery document.
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "schemas": [crate::protocol::SCHEMA_SERVICE_PROVIDER_CONFIG],
            "patch": {"supported": self.patch.supported},
            "bulk": {
                "supported": self.bulk.supported,
                "maxOperations": self.bulk.max_operations,
                "maxPayloadSize": self.bulk.max_payload_size,
            },
            "filter": {
                "supported": self.filter.supported,
                "maxResults": self.filter.max_results,
            },
            "changePassword": {"supported": self.change_password.supported},
            "sort": {"supported": self.sort.supported},
            "etag": {"supported": self.etag.supported},
            "authenticationSchemes": [],
        });
        if let Some(uri) = &self.documentation_uri {
            body["documentationUri"] = Value::String(uri.clone());
        }
        body
    }
}

/// Supplier of the current configuration.
///
/// Handlers and the dispatcher never hold a config reference across
/// requests; they re-read it through this accessor so swapped configuration
/// takes effect on the next request.
pub trait ConfigAccessor: Send + Sync {
    /// The configuration to use for the current request.
    fn get(&self) -> Arc<ServiceProviderConfig>;
}

/// A fixed configuration, set once at startup.
#[derive(Debug, Clone)]
pub struct StaticConfig(Arc<ServiceProviderConfig>);

impl StaticConfig {
    /// Wrap a configuration value.
    pub fn new(config: ServiceProviderConfig) -> Self {
        Self(Arc::new(config))
    }
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self::new(ServiceProviderConfig::default())
    }
}

impl ConfigAccessor for StaticConfig {
    fn get(&self) -> Arc<ServiceProviderConfig> {
        Arc::clone(&self.0)
    }
}

/// A configuration that can be atomically replaced at runtime.
#[derive(Debug, Default)]
pub struct SharedConfig {
    inner: RwLock<Arc<ServiceProviderConfig>>,
}

impl SharedConfig {
    /// Wrap an initial configuration value.
    pub fn new(config: ServiceProviderConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Replace the whole configuration in one atomic swap.
    pub fn swap(&self, config: ServiceProviderConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
    }
}

impl ConfigAccessor for SharedConfig {
    fn get(&self) -> Arc<ServiceProviderConfig> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_document_carries_limits() {
        let config = ServiceProviderConfig::default();
        let body = config.to_json();
        assert_eq!(body["bulk"]["maxOperations"], 1000);
        assert_eq!(body["filter"]["maxResults"], 200);
        assert_eq!(body["patch"]["supported"], true);
        assert_eq!(
            body["schemas"][0],
            "urn:ietf:params:scim:schemas:core:2.0:ServiceProviderConfig"
        );
    }

    #[test]
    fn shared_config_swaps_whole_structure() {
        let shared = SharedConfig::new(ServiceProviderConfig::default());
        assert!(shared.get().patch.supported);
        let mut next = ServiceProviderConfig::default();
        next.patch.supported = false;
        shared.swap(next);
        assert!(!shared.get().patch.supported);
    }
}
