use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use nova_cache::{CancellationToken, VersionCache};
use nova_core::ProjectId;
use parking_lot::Mutex;

use crate::{SolutionState, WorkspaceError, WorkspaceServices};

/// Per-project artifacts keyed by the project's dependent semantic version.
///
/// An artifact computed for a project stays valid across forks until the
/// project or one of its dependencies changes a top-level declaration. Each
/// project keeps only its newest few versions.
pub struct ProjectArtifactCache<T> {
    capacity: usize,
    caches: Mutex<HashMap<ProjectId, Arc<VersionCache<T>>>>,
}

impl<T: Clone> ProjectArtifactCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Capacity from `version_cache_capacity` in the workspace config.
    pub fn for_services(services: &WorkspaceServices) -> Self {
        Self::new(services.config().version_cache_capacity)
    }

    /// The artifact of `project` in `solution`, computed by `compute` unless
    /// one was cached for the same dependent semantic version.
    pub fn get_or_compute(
        &self,
        solution: &SolutionState,
        project: ProjectId,
        cancel: &CancellationToken,
        compute: impl FnOnce() -> Result<T, WorkspaceError>,
    ) -> Result<T, WorkspaceError> {
        let version = solution.dependent_semantic_version(project, cancel)?;
        let cache = self.cache_for(project);
        cache.try_get_or_insert_with(version, || {
            tracing::trace!(
                target = "nova.workspace",
                project = %project,
                ?version,
                "computing project artifact"
            );
            compute()
        })
    }

    /// The cached artifact for the current version of `project`, if any.
    pub fn get(
        &self,
        solution: &SolutionState,
        project: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, WorkspaceError> {
        let version = solution.dependent_semantic_version(project, cancel)?;
        Ok(self
            .caches
            .lock()
            .get(&project)
            .and_then(|cache| cache.get(version)))
    }

    pub fn remove_project(&self, project: ProjectId) {
        self.caches.lock().remove(&project);
    }

    /// Drops the caches of projects no longer in `solution`.
    pub fn retain_projects(&self, solution: &SolutionState) {
        self.caches
            .lock()
            .retain(|project, _| solution.contains_project(*project));
    }

    pub fn cached_versions(&self, project: ProjectId) -> usize {
        self.caches
            .lock()
            .get(&project)
            .map_or(0, |cache| cache.len())
    }

    fn cache_for(&self, project: ProjectId) -> Arc<VersionCache<T>> {
        self.caches
            .lock()
            .entry(project)
            .or_insert_with(|| Arc::new(VersionCache::new(self.capacity)))
            .clone()
    }
}

impl<T> fmt::Debug for ProjectArtifactCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectArtifactCache")
            .field("capacity", &self.capacity)
            .field("projects", &self.caches.lock().len())
            .finish()
    }
}
