use std::fmt;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use nova_config::WorkspaceModelConfig;
use nova_core::{DocumentId, ProjectId, VersionStamp};
use nova_memory::{MemoryPressure, MemoryReport};
use parking_lot::Mutex;

use crate::{ProjectState, SolutionState, WorkspaceError, WorkspaceServices};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceChange {
    ProjectAdded(ProjectId),
    ProjectRemoved(ProjectId),
    /// Project-level attributes, options or references changed.
    ProjectChanged(ProjectId),
    DocumentAdded(DocumentId),
    DocumentRemoved(DocumentId),
    DocumentChanged(DocumentId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    SolutionChanged {
        old_version: VersionStamp,
        new_version: VersionStamp,
        changes: Vec<WorkspaceChange>,
    },
    MemoryEnforced {
        pressure: MemoryPressure,
    },
}

struct Current {
    version: u64,
    solution: SolutionState,
}

/// Owner of the current solution.
///
/// Readers take a snapshot with [`Workspace::current_solution`], fork it,
/// and hand the fork back to [`Workspace::try_apply_changes`]. Only forks of
/// the current solution are adopted.
pub struct Workspace {
    services: WorkspaceServices,
    current: Mutex<Current>,
    subscribers: Mutex<Vec<Sender<WorkspaceEvent>>>,
}

impl Workspace {
    pub fn new(services: WorkspaceServices) -> Self {
        Self {
            current: Mutex::new(Current {
                version: 0,
                solution: SolutionState::new(services.clone()),
            }),
            services,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: WorkspaceModelConfig) -> Result<Self, WorkspaceError> {
        Ok(Self::new(WorkspaceServices::new(config)?))
    }

    pub fn services(&self) -> &WorkspaceServices {
        &self.services
    }

    pub fn current_solution(&self) -> SolutionState {
        self.current.lock().solution.clone()
    }

    pub fn workspace_version(&self) -> u64 {
        self.current.lock().version
    }

    /// Adopts `solution` if it was forked from the current solution.
    pub fn try_apply_changes(&self, solution: SolutionState) -> Result<SolutionState, WorkspaceError> {
        let mut current = self.current.lock();
        self.adopt(&mut current, solution)
    }

    /// Forks the current solution with `f` and adopts the result.
    ///
    /// `f` runs without the workspace lock. When another change is adopted
    /// first, `f` runs again on the newer solution.
    pub fn update(
        &self,
        mut f: impl FnMut(&SolutionState) -> Result<SolutionState, WorkspaceError>,
    ) -> Result<SolutionState, WorkspaceError> {
        loop {
            let base = self.current_solution();
            let next = f(&base)?;
            let forked = next.id() == base.id() && next.workspace_version() == base.workspace_version();
            match self.try_apply_changes(next) {
                Err(WorkspaceError::StaleSolution { current, found }) if forked => {
                    tracing::trace!(
                        target = "nova.workspace",
                        current,
                        found,
                        "update raced with another change; retrying"
                    );
                }
                result => return result,
            }
        }
    }

    /// Subscribes to workspace events.
    ///
    /// The channel is bounded; events are dropped for subscribers that fall
    /// behind.
    pub fn subscribe(&self) -> Receiver<WorkspaceEvent> {
        let (tx, rx) = async_channel::bounded(SUBSCRIBER_QUEUE_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Runs one memory enforcement pass. Retained texts under pressure are
    /// spilled to temporary storage.
    pub fn enforce_memory(&self) -> MemoryReport {
        let report = self.services.memory().enforce();
        tracing::debug!(
            target = "nova.workspace",
            pressure = ?report.pressure,
            usage = report.usage_total_bytes(),
            "memory enforced"
        );
        self.publish(WorkspaceEvent::MemoryEnforced {
            pressure: report.pressure,
        });
        report
    }

    fn adopt(
        &self,
        current: &mut Current,
        solution: SolutionState,
    ) -> Result<SolutionState, WorkspaceError> {
        if solution.id() != current.solution.id() || solution.workspace_version() != current.version
        {
            tracing::debug!(
                target = "nova.workspace",
                current = current.version,
                found = solution.workspace_version(),
                "rejected stale solution"
            );
            return Err(WorkspaceError::StaleSolution {
                current: current.version,
                found: solution.workspace_version(),
            });
        }

        current.version += 1;
        let adopted = solution.with_workspace_version(current.version);
        let previous = std::mem::replace(&mut current.solution, adopted.clone());
        let changes = diff_solutions(&previous, &adopted);
        tracing::debug!(
            target = "nova.workspace",
            workspace_version = current.version,
            changes = changes.len(),
            "adopted solution"
        );
        if !changes.is_empty() {
            self.publish(WorkspaceEvent::SolutionChanged {
                old_version: previous.version(),
                new_version: adopted.version(),
                changes,
            });
        }
        Ok(adopted)
    }

    fn publish(&self, event: WorkspaceEvent) {
        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(async_channel::TrySendError::Full(_)) => true,
                Err(async_channel::TrySendError::Closed(_)) => false,
            });
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.lock();
        f.debug_struct("Workspace")
            .field("version", &current.version)
            .field("solution", &current.solution)
            .finish()
    }
}

fn diff_solutions(old: &SolutionState, new: &SolutionState) -> Vec<WorkspaceChange> {
    let mut changes = Vec::new();
    for project in old.project_ids() {
        if !new.contains_project(*project) {
            changes.push(WorkspaceChange::ProjectRemoved(*project));
        }
    }
    for project in new.projects() {
        match old.project(project.id()) {
            None => changes.push(WorkspaceChange::ProjectAdded(project.id())),
            Some(previous) if Arc::ptr_eq(previous, project) => {}
            Some(previous) => diff_projects(previous, project, &mut changes),
        }
    }
    changes
}

fn diff_projects(old: &ProjectState, new: &ProjectState, changes: &mut Vec<WorkspaceChange>) {
    if old.version() != new.version() {
        changes.push(WorkspaceChange::ProjectChanged(new.id()));
    }
    for document in old.document_ids() {
        if !new.contains_document(*document) {
            changes.push(WorkspaceChange::DocumentRemoved(*document));
        }
    }
    for document in new.documents() {
        match old.document(document.id()) {
            None => changes.push(WorkspaceChange::DocumentAdded(document.id())),
            Some(previous) if Arc::ptr_eq(previous, document) => {}
            Some(_) => changes.push(WorkspaceChange::DocumentChanged(document.id())),
        }
    }
}
