//! The registry of containers in the utility VM.
//!
//! Lock order is the container registry first, then the adapter cache.
//! The namespace map is lock-free with respect to both.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use gcs_common::config::GcsConfig;
use gcs_common::constants::BUNDLE_CONFIG_FILE;
use gcs_common::error::{GcsError, Result};
use gcs_common::types::{ContainerId, ContainerSettings, ModifySettingRequest, NetworkAdapter};
use gcs_core::oslayer::OsLayer;
use gcs_core::transport::Transport;
use parking_lot::Mutex;

use crate::backend::Runtime;
use crate::container::Container;
use crate::modify;

/// Process-wide registry of containers and entry point for hot-plug.
pub struct Host {
    containers: Mutex<HashMap<ContainerId, Arc<Container>>>,
    cached_adapters: Mutex<HashMap<String, Vec<NetworkAdapter>>>,
    namespace_to_container: DashMap<String, ContainerId>,
    runtime: Arc<dyn Runtime>,
    os: Arc<dyn OsLayer>,
    transport: Arc<dyn Transport>,
    config: Arc<GcsConfig>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("containers", &self.container_ids())
            .field("namespaces", &self.namespace_to_container.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Creates an empty host over the given collaborators.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn Runtime>,
        os: Arc<dyn OsLayer>,
        transport: Arc<dyn Transport>,
        config: GcsConfig,
    ) -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            cached_adapters: Mutex::new(HashMap::new()),
            namespace_to_container: DashMap::new(),
            runtime,
            os,
            transport,
            config: Arc::new(config),
        }
    }

    /// OS layer used for mounts, devices, and helpers.
    #[must_use]
    pub fn os(&self) -> &dyn OsLayer {
        self.os.as_ref()
    }

    /// Transport to the host side of the VM.
    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Service configuration.
    #[must_use]
    pub fn config(&self) -> &GcsConfig {
        &self.config
    }

    /// Creates a container, or returns the existing one with the same id.
    ///
    /// Writes the specification into the bundle, asks the runtime to create
    /// the container, and attaches any adapters that were cached for its
    /// network namespace. The registry lock is held throughout, so
    /// concurrent creates of the same id yield one container.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be written, the runtime
    /// rejects the container, or a cached adapter cannot be attached.
    pub fn create_container(
        &self,
        id: &ContainerId,
        settings: ContainerSettings,
    ) -> Result<Arc<Container>> {
        let mut containers = self.containers.lock();
        if let Some(existing) = containers.get(id) {
            tracing::debug!(cid = %id, "container already exists");
            return Ok(Arc::clone(existing));
        }

        let ContainerSettings { bundle_path, spec } = settings;
        self.os
            .mkdir_all(&bundle_path, self.config.dir_mode)
            .map_err(|e| GcsError::io(&bundle_path, e))?;
        let config_path = bundle_path.join(BUNDLE_CONFIG_FILE);
        let encoded = serde_json::to_vec(&spec)?;
        self.os
            .write_file(&config_path, &encoded)
            .map_err(|e| GcsError::io(&config_path, e))?;

        let runtime = self.runtime.create_container(id, &bundle_path, &spec)?;
        let namespace = spec.network_namespace().map(str::to_lowercase);
        let container = Arc::new(Container::new(
            id.clone(),
            spec,
            bundle_path,
            runtime,
            Arc::clone(&self.transport),
            Arc::clone(&self.config),
        )?);

        if let Some(namespace) = namespace {
            let attached = self.claim_namespace(&namespace, id, &container)?;
            tracing::debug!(cid = %id, namespace = %namespace, attached, "namespace claimed");
        }

        let _ = containers.insert(id.clone(), Arc::clone(&container));
        tracing::info!(
            cid = %id,
            pid = container.init_process().pid(),
            bundle = %container.bundle_path().display(),
            "container created"
        );
        Ok(container)
    }

    /// Attaches the adapters cached for `namespace` to `container`, then
    /// records the container as the namespace owner.
    ///
    /// Adapters are attached with the cache unlocked. Anything cached while
    /// they attach is picked up by the next pass, and ownership is recorded
    /// under the cache lock once a pass finds nothing left.
    fn claim_namespace(
        &self,
        namespace: &str,
        id: &ContainerId,
        container: &Container,
    ) -> Result<usize> {
        let mut attached = 0;
        loop {
            let pending = {
                let mut cache = self.cached_adapters.lock();
                match cache.remove(namespace) {
                    Some(adapters) if !adapters.is_empty() => adapters,
                    _ => {
                        let _ = self
                            .namespace_to_container
                            .insert(namespace.to_owned(), id.clone());
                        return Ok(attached);
                    }
                }
            };

            for (i, adapter) in pending.iter().enumerate() {
                if let Err(e) = container.add_network_adapter(self.os.as_ref(), adapter) {
                    let mut cache = self.cached_adapters.lock();
                    let queued = cache.entry(namespace.to_owned()).or_default();
                    let _ = queued.splice(0..0, pending[i..].iter().cloned());
                    return Err(e);
                }
                attached += 1;
            }
        }
    }

    /// Looks up a container.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::NotFound`] if the id is unknown.
    pub fn get_container(&self, id: &ContainerId) -> Result<Arc<Container>> {
        self.containers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| GcsError::container_not_found(id.as_str()))
    }

    /// Ids of every registered container, sorted.
    #[must_use]
    pub fn container_ids(&self) -> Vec<ContainerId> {
        let mut ids: Vec<_> = self.containers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Applies a hot-plug modification to a VM-wide resource.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::Modify`] wrapping the handler's error.
    pub fn modify_host_settings(&self, request: &ModifySettingRequest) -> Result<()> {
        modify::apply(self, request)
    }

    /// Attaches `adapter` to the container owning its namespace, or caches
    /// it until such a container is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the owning container is gone or the attach fails.
    pub fn add_network_adapter(&self, adapter: &NetworkAdapter) -> Result<()> {
        let namespace = adapter.namespace_id.to_lowercase();
        let owner = {
            let mut cache = self.cached_adapters.lock();
            let owner = self
                .namespace_to_container
                .get(&namespace)
                .map(|entry| entry.value().clone());
            if owner.is_none() {
                cache
                    .entry(namespace.clone())
                    .or_default()
                    .push(adapter.clone());
                tracing::info!(
                    namespace = %namespace,
                    adapter_id = %adapter.id,
                    "network adapter cached until its container exists"
                );
            }
            owner
        };

        match owner {
            Some(cid) => self
                .get_container(&cid)?
                .add_network_adapter(self.os.as_ref(), adapter),
            None => Ok(()),
        }
    }

    /// Detaches `adapter` from its container, or drops it from the cache.
    ///
    /// Removing an adapter that is in neither place is not an error.
    ///
    /// # Errors
    ///
    /// Returns the container's error when the adapter is attached.
    pub fn remove_network_adapter(&self, adapter: &NetworkAdapter) -> Result<()> {
        let namespace = adapter.namespace_id.to_lowercase();
        let owner = {
            let mut cache = self.cached_adapters.lock();
            let owner = self
                .namespace_to_container
                .get(&namespace)
                .map(|entry| entry.value().clone());
            if owner.is_none() {
                if let Some(adapters) = cache.get_mut(&namespace) {
                    if let Some(pos) = adapters.iter().position(|a| a.id == adapter.id) {
                        let _ = adapters.remove(pos);
                        tracing::info!(
                            namespace = %namespace,
                            adapter_id = %adapter.id,
                            "cached network adapter removed"
                        );
                    }
                    if adapters.is_empty() {
                        let _ = cache.remove(&namespace);
                    }
                }
            }
            owner
        };

        let Some(cid) = owner else { return Ok(()) };
        match self.get_container(&cid) {
            Ok(container) => container.remove_network_adapter(self.os.as_ref(), &adapter.id),
            Err(_) => {
                tracing::warn!(
                    cid = %cid,
                    namespace = %namespace,
                    "dropping namespace mapping of a missing container"
                );
                let _ = self.namespace_to_container.remove(&namespace);
                Ok(())
            }
        }
    }

    /// Adapters cached for `namespace`, in arrival order.
    #[must_use]
    pub fn cached_adapters(&self, namespace: &str) -> Vec<NetworkAdapter> {
        self.cached_adapters
            .lock()
            .get(&namespace.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Container that has claimed `namespace`, if any.
    #[must_use]
    pub fn namespace_owner(&self, namespace: &str) -> Option<ContainerId> {
        self.namespace_to_container
            .get(&namespace.to_lowercase())
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of every known process id across all containers.
    #[must_use]
    pub fn get_all_process_pids(&self) -> Vec<u32> {
        self.containers
            .lock()
            .values()
            .flat_map(|c| c.process_pids())
            .collect()
    }

    /// Powers off the VM.
    ///
    /// # Errors
    ///
    /// Returns an error if the power-off request is rejected.
    pub fn shutdown(&self) -> Result<()> {
        tracing::info!("powering off the utility VM");
        self.os
            .power_off()
            .map_err(|e| GcsError::os("power off", e))
    }
}
