//! Named coordinator instances
//!
//! A host may index several trackers at once, each with its own coordinator.
//! The registry owns them by name and routes management requests.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::coordinator::{Coordinator, CoordinatorStatus};
use crate::error::CoordinatorError;
use crate::runtime::JobHandle;

/// Registry of running coordinators keyed by instance name
#[derive(Default)]
pub struct CoordinatorRegistry {
    instances: RwLock<HashMap<String, Arc<Coordinator>>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a coordinator under its own name
    pub async fn register(&self, coordinator: Arc<Coordinator>) -> Result<(), CoordinatorError> {
        let mut instances = self.instances.write().await;
        let name = coordinator.name().to_string();
        if instances.contains_key(&name) {
            return Err(CoordinatorError::DuplicateInstance { name });
        }

        info!("Registered coordinator {}", name);
        instances.insert(name, coordinator);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Coordinator>> {
        self.instances.read().await.get(name).cloned()
    }

    /// Remove a coordinator and shut it down
    pub async fn remove(&self, name: &str) -> Result<Vec<JobHandle>, CoordinatorError> {
        let coordinator = self
            .instances
            .write()
            .await
            .remove(name)
            .ok_or_else(|| CoordinatorError::UnknownInstance {
                name: name.to_string(),
            })?;

        info!("Removed coordinator {}", name);
        Ok(coordinator.shutdown().await)
    }

    /// Instance names in sorted order
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Request a full reindex on one instance
    pub async fn force_full_reindex(
        &self,
        instance: &str,
        project_key: Option<&str>,
    ) -> Result<Vec<String>, CoordinatorError> {
        let coordinator = self
            .get(instance)
            .await
            .ok_or_else(|| CoordinatorError::UnknownInstance {
                name: instance.to_string(),
            })?;
        coordinator.force_full_reindex(project_key).await
    }

    pub async fn statuses(&self) -> Vec<CoordinatorStatus> {
        let coordinators: Vec<Arc<Coordinator>> =
            self.instances.read().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(coordinators.len());
        for coordinator in coordinators {
            statuses.push(coordinator.status().await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Shut down and forget every coordinator
    pub async fn shutdown_all(&self) -> Vec<JobHandle> {
        let coordinators: Vec<Arc<Coordinator>> =
            self.instances.write().await.drain().map(|(_, c)| c).collect();

        let mut handles = Vec::new();
        for coordinator in coordinators {
            handles.extend(coordinator.shutdown().await);
        }
        handles
    }
}
