//! The root of the snapshot graph.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nova_cache::{CancellationToken, LazyError, LazyValue};
use nova_core::{DocumentId, ProjectId, SolutionId, TextAndVersion, TextEdit, VersionStamp};
use nova_syntax::{ParseOptions, SyntaxTree};

use crate::graph::ProjectMap;
use crate::{
    CompilationOptions, DocumentInfo, DocumentState, ProjectDependencyGraph, ProjectInfo,
    ProjectState, TextLoader, WorkspaceError, WorkspaceServices,
};

type FilePathIndex = BTreeMap<PathBuf, BTreeSet<DocumentId>>;

/// An immutable view of every project in a workspace.
///
/// Mutations return a new solution sharing all untouched projects and
/// documents with `self`. A failed mutation leaves nothing behind.
#[derive(Clone)]
pub struct SolutionState {
    id: SolutionId,
    version: VersionStamp,
    workspace_version: u64,
    services: WorkspaceServices,
    project_ids: Arc<Vec<ProjectId>>,
    projects: Arc<ProjectMap>,
    file_paths: Arc<FilePathIndex>,
    latest_project_version: LazyValue<VersionStamp>,
    dependency_graph: LazyValue<Arc<ProjectDependencyGraph>>,
}

impl SolutionState {
    pub fn new(services: WorkspaceServices) -> Self {
        let id = SolutionId::new_unique();
        let projects = Arc::new(ProjectMap::new());
        Self {
            id,
            version: VersionStamp::create(),
            workspace_version: 0,
            services,
            project_ids: Arc::new(Vec::new()),
            latest_project_version: LazyValue::from_value(VersionStamp::default()),
            dependency_graph: LazyValue::from_value(Arc::new(ProjectDependencyGraph::build(
                id, &projects,
            ))),
            projects,
            file_paths: Arc::new(FilePathIndex::new()),
        }
    }

    pub fn id(&self) -> SolutionId {
        self.id
    }

    pub fn version(&self) -> VersionStamp {
        self.version
    }

    /// The workspace version this solution was forked from.
    pub fn workspace_version(&self) -> u64 {
        self.workspace_version
    }

    pub fn services(&self) -> &WorkspaceServices {
        &self.services
    }

    pub fn project_ids(&self) -> &[ProjectId] {
        &self.project_ids
    }

    /// Projects in the order they were added.
    pub fn projects(&self) -> impl Iterator<Item = &Arc<ProjectState>> + '_ {
        self.project_ids
            .iter()
            .filter_map(|id| self.projects.get(id))
    }

    pub fn project(&self, id: ProjectId) -> Option<&Arc<ProjectState>> {
        self.projects.get(&id)
    }

    pub fn contains_project(&self, id: ProjectId) -> bool {
        self.projects.contains_key(&id)
    }

    pub fn document(&self, id: DocumentId) -> Option<&Arc<DocumentState>> {
        self.projects.get(&id.project_id())?.document(id)
    }

    pub fn contains_document(&self, id: DocumentId) -> bool {
        self.document(id).is_some()
    }

    pub fn document_ids_with_file_path(&self, path: &Path) -> Vec<DocumentId> {
        self.file_paths
            .get(path)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest_project_version(&self) -> VersionStamp {
        self.latest_project_version
            .get(&CancellationToken::new())
            .unwrap_or_else(|_| latest_version_of(&self.projects))
    }

    pub fn dependency_graph(&self) -> Arc<ProjectDependencyGraph> {
        match self.dependency_graph.get(&CancellationToken::new()) {
            Ok(graph) => graph,
            Err(err) => {
                tracing::warn!(
                    target = "nova.workspace",
                    solution = %self.id,
                    error = %err,
                    "dependency graph derivation failed; rebuilding"
                );
                Arc::new(ProjectDependencyGraph::build(self.id, &self.projects))
            }
        }
    }

    pub fn try_dependency_graph(&self) -> Option<Arc<ProjectDependencyGraph>> {
        self.dependency_graph.try_peek()
    }

    /// Newest text or project version over `project` and everything it
    /// transitively references.
    pub fn dependent_version(
        &self,
        project: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, WorkspaceError> {
        let mut version = self.require_project(project)?.dependent_version(cancel)?;
        for dependency in self.transitive_projects(project) {
            version = version.newer_of(dependency.dependent_version(cancel)?);
        }
        Ok(version)
    }

    pub async fn dependent_version_async(
        &self,
        project: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, WorkspaceError> {
        let mut version = self
            .require_project(project)?
            .dependent_version_async(cancel)
            .await?;
        for dependency in self.transitive_projects(project) {
            version = version.newer_of(dependency.dependent_version_async(cancel).await?);
        }
        Ok(version)
    }

    /// Like [`SolutionState::dependent_version`], but only top-level changes
    /// of documents count. Body edits in a dependency leave it unchanged.
    pub fn dependent_semantic_version(
        &self,
        project: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, WorkspaceError> {
        let mut version = self
            .require_project(project)?
            .dependent_semantic_version(cancel)?;
        for dependency in self.transitive_projects(project) {
            version = version.newer_of(dependency.dependent_semantic_version(cancel)?);
        }
        Ok(version)
    }

    pub async fn dependent_semantic_version_async(
        &self,
        project: ProjectId,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, WorkspaceError> {
        let mut version = self
            .require_project(project)?
            .dependent_semantic_version_async(cancel)
            .await?;
        for dependency in self.transitive_projects(project) {
            version = version.newer_of(dependency.dependent_semantic_version_async(cancel).await?);
        }
        Ok(version)
    }

    pub fn add_project(&self, info: ProjectInfo) -> Result<Self, WorkspaceError> {
        let id = info.id;
        if self.projects.contains_key(&id) {
            return Err(WorkspaceError::DuplicateProject(id));
        }
        if let Some(missing) = info
            .project_references
            .iter()
            .find(|to| !self.projects.contains_key(to))
        {
            return Err(WorkspaceError::ProjectReferenceNotFound {
                from: id,
                to: *missing,
            });
        }

        let project = ProjectState::new(info, self.services.clone())?;
        let mut projects = (*self.projects).clone();
        let mut file_paths = (*self.file_paths).clone();
        index_paths(&mut file_paths, &project);
        projects.insert(id, Arc::new(project));

        let mut project_ids = (*self.project_ids).clone();
        project_ids.push(id);
        Ok(self.fork(Arc::new(project_ids), projects, Arc::new(file_paths)))
    }

    /// Removes `project` and every reference other projects hold to it.
    pub fn remove_project(&self, project: ProjectId) -> Result<Self, WorkspaceError> {
        let removed = self.require_project(project)?;
        let mut projects = (*self.projects).clone();
        projects.remove(&project);
        for state in projects.values_mut() {
            if state.project_references().contains(&project) {
                *state = Arc::new(state.remove_project_reference(project)?);
            }
        }

        let mut file_paths = (*self.file_paths).clone();
        unindex_paths(&mut file_paths, removed);
        let project_ids = self
            .project_ids
            .iter()
            .copied()
            .filter(|id| *id != project)
            .collect();
        Ok(self.fork(Arc::new(project_ids), projects, Arc::new(file_paths)))
    }

    pub fn add_project_reference(
        &self,
        project: ProjectId,
        reference: ProjectId,
    ) -> Result<Self, WorkspaceError> {
        self.require_reference_target(project, reference)?;
        self.update_project(project, |state| state.add_project_reference(reference))
    }

    pub fn remove_project_reference(
        &self,
        project: ProjectId,
        reference: ProjectId,
    ) -> Result<Self, WorkspaceError> {
        self.update_project(project, |state| state.remove_project_reference(reference))
    }

    pub fn with_project_references(
        &self,
        project: ProjectId,
        references: Vec<ProjectId>,
    ) -> Result<Self, WorkspaceError> {
        for reference in &references {
            self.require_reference_target(project, *reference)?;
        }
        self.update_project(project, |state| state.with_project_references(references))
    }

    pub fn with_project_parse_options(
        &self,
        project: ProjectId,
        options: ParseOptions,
    ) -> Result<Self, WorkspaceError> {
        self.update_project(project, |state| Ok(state.with_parse_options(options)))
    }

    pub fn with_project_compilation_options(
        &self,
        project: ProjectId,
        options: CompilationOptions,
    ) -> Result<Self, WorkspaceError> {
        self.update_project(project, |state| Ok(state.with_compilation_options(options)))
    }

    pub fn with_project_name(
        &self,
        project: ProjectId,
        name: impl Into<String>,
    ) -> Result<Self, WorkspaceError> {
        let name = name.into();
        self.update_project(project, |state| Ok(state.with_name(name)))
    }

    pub fn with_documents_order(
        &self,
        project: ProjectId,
        order: Vec<DocumentId>,
    ) -> Result<Self, WorkspaceError> {
        self.update_project(project, |state| state.with_documents_order(order))
    }

    pub fn add_document(&self, info: DocumentInfo) -> Result<Self, WorkspaceError> {
        let project = info.attributes.id.project_id();
        let old = self.require_project(project)?;
        let new = old.add_documents(vec![info])?;
        Ok(self.replace_project(old, new, true))
    }

    pub fn remove_document(&self, document: DocumentId) -> Result<Self, WorkspaceError> {
        let old = self.project_of(document)?;
        let new = old.remove_documents(&[document])?;
        Ok(self.replace_project(old, new, true))
    }

    pub fn with_document_text(
        &self,
        document: DocumentId,
        text: impl Into<String>,
    ) -> Result<Self, WorkspaceError> {
        let text = text.into();
        self.update_document(document, false, |doc| Ok(doc.with_text(text)))
    }

    pub fn with_document_text_and_version(
        &self,
        document: DocumentId,
        value: TextAndVersion,
    ) -> Result<Self, WorkspaceError> {
        self.update_document(document, false, |doc| Ok(doc.with_text_and_version(value)))
    }

    pub fn with_document_text_edits(
        &self,
        document: DocumentId,
        edits: Vec<TextEdit>,
        cancel: &CancellationToken,
    ) -> Result<Self, WorkspaceError> {
        self.update_document(document, false, |doc| doc.with_text_edits(edits, cancel))
    }

    pub fn with_document_text_loader(
        &self,
        document: DocumentId,
        loader: Arc<dyn TextLoader>,
    ) -> Result<Self, WorkspaceError> {
        self.update_document(document, false, |doc| Ok(doc.with_text_loader(loader)))
    }

    pub fn with_document_syntax_tree(
        &self,
        document: DocumentId,
        tree: Arc<dyn SyntaxTree>,
    ) -> Result<Self, WorkspaceError> {
        self.update_document(document, false, |doc| Ok(doc.with_syntax_tree(tree)))
    }

    pub fn with_document_name(
        &self,
        document: DocumentId,
        name: impl Into<String>,
    ) -> Result<Self, WorkspaceError> {
        let name = name.into();
        self.update_document(document, false, |doc| Ok(doc.with_name(name)))
    }

    pub fn with_document_folders(
        &self,
        document: DocumentId,
        folders: Vec<String>,
    ) -> Result<Self, WorkspaceError> {
        self.update_document(document, false, |doc| Ok(doc.with_folders(folders)))
    }

    pub fn with_document_file_path(
        &self,
        document: DocumentId,
        file_path: Option<PathBuf>,
    ) -> Result<Self, WorkspaceError> {
        self.update_document(document, true, |doc| Ok(doc.with_file_path(file_path)))
    }

    pub(crate) fn project_map(&self) -> &ProjectMap {
        &self.projects
    }

    pub(crate) fn with_workspace_version(mut self, workspace_version: u64) -> Self {
        self.workspace_version = workspace_version;
        self
    }

    fn require_project(&self, project: ProjectId) -> Result<&Arc<ProjectState>, WorkspaceError> {
        self.projects
            .get(&project)
            .ok_or(WorkspaceError::ProjectNotFound(project))
    }

    fn require_reference_target(
        &self,
        project: ProjectId,
        reference: ProjectId,
    ) -> Result<(), WorkspaceError> {
        self.require_project(project)?;
        if !self.projects.contains_key(&reference) {
            return Err(WorkspaceError::ProjectReferenceNotFound {
                from: project,
                to: reference,
            });
        }
        Ok(())
    }

    fn project_of(&self, document: DocumentId) -> Result<&Arc<ProjectState>, WorkspaceError> {
        self.projects
            .get(&document.project_id())
            .filter(|project| project.contains_document(document))
            .ok_or(WorkspaceError::DocumentNotFound(document))
    }

    fn transitive_projects(&self, project: ProjectId) -> Vec<Arc<ProjectState>> {
        self.dependency_graph()
            .transitive_dependencies(project)
            .iter()
            .filter_map(|id| self.projects.get(id).cloned())
            .collect()
    }

    fn update_project(
        &self,
        project: ProjectId,
        f: impl FnOnce(&ProjectState) -> Result<ProjectState, WorkspaceError>,
    ) -> Result<Self, WorkspaceError> {
        let old = self.require_project(project)?;
        let new = f(old)?;
        Ok(self.replace_project(old, new, false))
    }

    fn update_document(
        &self,
        document: DocumentId,
        paths_changed: bool,
        f: impl FnOnce(&DocumentState) -> Result<DocumentState, WorkspaceError>,
    ) -> Result<Self, WorkspaceError> {
        let old = self.project_of(document)?;
        let current = old
            .document(document)
            .ok_or(WorkspaceError::DocumentNotFound(document))?;
        let new = old.update_document(f(current)?)?;
        Ok(self.replace_project(old, new, paths_changed))
    }

    fn replace_project(&self, old: &ProjectState, new: ProjectState, paths_changed: bool) -> Self {
        let file_paths = if paths_changed {
            let mut file_paths = (*self.file_paths).clone();
            unindex_paths(&mut file_paths, old);
            index_paths(&mut file_paths, &new);
            Arc::new(file_paths)
        } else {
            self.file_paths.clone()
        };
        let mut projects = (*self.projects).clone();
        projects.insert(new.id(), Arc::new(new));
        self.fork(self.project_ids.clone(), projects, file_paths)
    }

    fn fork(
        &self,
        project_ids: Arc<Vec<ProjectId>>,
        projects: ProjectMap,
        file_paths: Arc<FilePathIndex>,
    ) -> Self {
        let projects = Arc::new(projects);
        let id = self.id;

        let latest_projects = projects.clone();
        let latest_project_version =
            LazyValue::new(move |_: &CancellationToken| Ok(latest_version_of(&latest_projects)));

        let new_projects = projects.clone();
        let dependency_graph = match self.dependency_graph.try_peek() {
            Some(previous) => {
                let old_projects = self.projects.clone();
                LazyValue::new(move |_: &CancellationToken| {
                    let derived = previous.with_project_changes(&old_projects, id, &new_projects);
                    if derived.is_consistent_with_projects(id, &new_projects) {
                        Ok(derived)
                    } else {
                        Err(LazyError::message(
                            "derived dependency graph does not match the solution",
                        ))
                    }
                })
            }
            None => LazyValue::new(move |_: &CancellationToken| {
                Ok(Arc::new(ProjectDependencyGraph::build(id, &new_projects)))
            }),
        };

        Self {
            id,
            version: self.version.newer(),
            workspace_version: self.workspace_version,
            services: self.services.clone(),
            project_ids,
            projects,
            file_paths,
            latest_project_version,
            dependency_graph,
        }
    }
}

impl fmt::Debug for SolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolutionState")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("workspace_version", &self.workspace_version)
            .field("projects", &self.project_ids)
            .finish()
    }
}

fn latest_version_of(projects: &ProjectMap) -> VersionStamp {
    projects
        .values()
        .map(|project| project.version())
        .fold(VersionStamp::default(), VersionStamp::newer_of)
}

fn index_paths(index: &mut FilePathIndex, project: &ProjectState) {
    for document in project.documents() {
        if let Some(path) = document.file_path() {
            index
                .entry(path.to_path_buf())
                .or_default()
                .insert(document.id());
        }
    }
}

fn unindex_paths(index: &mut FilePathIndex, project: &ProjectState) {
    for document in project.documents() {
        let Some(path) = document.file_path() else {
            continue;
        };
        if let Some(ids) = index.get_mut(path) {
            ids.remove(&document.id());
            if ids.is_empty() {
                index.remove(path);
            }
        }
    }
}
