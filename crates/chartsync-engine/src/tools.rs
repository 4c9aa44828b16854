//! The collaborator set a run is driven through

use std::sync::Arc;

use chartsync_repo::{ChartTooling, CloudIdentity, RegistryTooling};

/// Chart, registry and (optional) cloud collaborators
#[derive(Clone)]
pub struct Tools {
    pub charts: Arc<dyn ChartTooling>,
    pub registry: Arc<dyn RegistryTooling>,
    /// Absent when the target registry and its password are given explicitly
    pub identity: Option<Arc<dyn CloudIdentity>>,
}

impl Tools {
    pub fn new(charts: Arc<dyn ChartTooling>, registry: Arc<dyn RegistryTooling>) -> Self {
        Self {
            charts,
            registry,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn CloudIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }
}

impl std::fmt::Debug for Tools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tools")
            .field("identity", &self.identity.is_some())
            .finish_non_exhaustive()
    }
}
