//! Bootstrap Loader.
//!
//! # Responsibilities
//! - One flat read of the whole configuration namespace at startup
//! - Partition the keys into one synthetic read result per resource
//! - Hand each bucket to its cache exactly once
//! - Provide the snapshot revision the watch broker starts after
//!
//! # Design Decisions
//! - Every configured resource gets a bucket, even an empty one, so no
//!   cache needs a network round trip for its first load
//! - Keys outside the resource table are dropped here
//! - A failed scan is not fatal: caches fall back to their own reads

use dashmap::DashMap;

use crate::client::{key_belongs_to, ConfigClient, ReadResponse, Revision};
use crate::config::ResourceConfig;
use crate::error::ClientError;

/// Directories mirrored when the configuration lists none.
pub const DEFAULT_RESOURCES: &[(&str, bool)] = &[
    ("routes", false),
    ("services", false),
    ("upstreams", false),
    ("ssls", false),
    ("global_rules", false),
    ("consumers", false),
    ("consumer_groups", false),
    ("plugin_configs", false),
    ("plugin_metadata", false),
    ("protos", false),
    ("stream_routes", false),
    ("secrets", false),
    ("plugins", true),
];

pub fn default_resources() -> Vec<ResourceConfig> {
    DEFAULT_RESOURCES
        .iter()
        .map(|(name, single)| ResourceConfig {
            name: name.to_string(),
            single_item: *single,
        })
        .collect()
}

/// Store key of `resource` under `prefix`.
pub fn resource_key(prefix: &str, resource: &str) -> String {
    format!("{}/{}", prefix, resource)
}

/// Pre-partitioned snapshot of the namespace.
#[derive(Debug)]
pub struct BootstrapLoader {
    revision: Revision,
    buckets: DashMap<String, ReadResponse>,
}

impl BootstrapLoader {
    /// Scan `prefix` once and partition the result.
    pub async fn load(
        client: &dyn ConfigClient,
        prefix: &str,
        resources: &[ResourceConfig],
    ) -> Result<Self, ClientError> {
        let response = client.readdir(prefix).await?;
        let loader = Self::partition(prefix, resources, response);
        tracing::info!(
            prefix,
            revision = loader.revision,
            resources = loader.buckets.len(),
            "Bootstrap snapshot loaded"
        );
        Ok(loader)
    }

    /// Split one flat read into per-resource buckets.
    pub fn partition(prefix: &str, resources: &[ResourceConfig], response: ReadResponse) -> Self {
        let buckets = DashMap::new();
        let mut keys = Vec::with_capacity(resources.len());
        for resource in resources {
            let key = resource_key(prefix, &resource.name);
            buckets.insert(
                key.clone(),
                ReadResponse {
                    revision: response.revision,
                    kvs: Vec::new(),
                },
            );
            keys.push((key, resource.single_item));
        }

        let mut ignored = 0usize;
        for kv in response.kvs {
            let target = keys.iter().find(|(key, single)| {
                if *single {
                    kv.key == *key
                } else {
                    key_belongs_to(&kv.key, key)
                }
            });
            match target {
                Some((key, _)) => {
                    if let Some(mut bucket) = buckets.get_mut(key) {
                        bucket.kvs.push(kv);
                    }
                }
                None => ignored += 1,
            }
        }
        if ignored > 0 {
            tracing::debug!(prefix, ignored, "Bootstrap skipped keys outside known resources");
        }

        Self {
            revision: response.revision,
            buckets,
        }
    }

    /// Store revision of the snapshot.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Remove and return the bucket for `key`.
    pub fn take(&self, key: &str) -> Option<ReadResponse> {
        self.buckets.remove(key).map(|(_, bucket)| bucket)
    }

    /// Buckets not consumed yet.
    pub fn pending(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{KeyValue, MemoryStore};

    fn kv(key: &str, revision: Revision) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: b"{}".to_vec(),
            create_revision: revision,
            mod_revision: revision,
        }
    }

    #[test]
    fn test_partition() {
        let response = ReadResponse {
            revision: 9,
            kvs: vec![
                kv("/apisix/routes", 1),
                kv("/apisix/routes/1", 2),
                kv("/apisix/routes/2", 3),
                kv("/apisix/upstreams/1", 4),
                kv("/apisix/plugins", 5),
                kv("/apisix/plugins/extra", 6),
                kv("/apisix/unknown/1", 7),
            ],
        };
        let loader = BootstrapLoader::partition("/apisix", &default_resources(), response);
        assert_eq!(loader.revision(), 9);
        assert_eq!(loader.pending(), DEFAULT_RESOURCES.len());

        let routes = loader.take("/apisix/routes").unwrap();
        // Directory placeholder travels with the bucket; the cache skips it.
        assert_eq!(routes.kvs.len(), 3);
        assert_eq!(routes.revision, 9);

        let plugins = loader.take("/apisix/plugins").unwrap();
        assert_eq!(plugins.kvs.len(), 1);
        assert_eq!(plugins.kvs[0].key, "/apisix/plugins");

        let ssls = loader.take("/apisix/ssls").unwrap();
        assert!(ssls.kvs.is_empty());

        // Single consumption.
        assert!(loader.take("/apisix/routes").is_none());
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let store = MemoryStore::new();
        store.put("/apisix/routes/1", "{}");
        store.put("/apisix/services/1", "{}");

        let resources = vec![ResourceConfig::directory("routes")];
        let loader = BootstrapLoader::load(&store, "/apisix", &resources).await.unwrap();
        assert_eq!(loader.revision(), 2);
        assert_eq!(loader.take("/apisix/routes").unwrap().kvs.len(), 1);
        assert_eq!(loader.pending(), 0);
    }
}
