//! Immutable project snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::FutureExt;
use nova_cache::{AsyncProducer, CancellationToken, LazyError, LazyValue, SyncProducer};
use nova_core::{DocumentId, ProjectId, VersionStamp};
use nova_syntax::{ParseOptions, ParserService};

use crate::{
    AnalyzerReference, CompilationOptions, DocumentInfo, DocumentState, MetadataReference,
    ProjectInfo, WorkspaceError, WorkspaceServices,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectAttributes {
    pub id: ProjectId,
    /// Bumped by project-level changes. Document content edits leave it alone.
    pub version: VersionStamp,
    pub name: String,
    pub language: String,
    pub file_path: Option<PathBuf>,
}

/// One project of a solution: ordered documents, references and options.
#[derive(Clone)]
pub struct ProjectState {
    attributes: Arc<ProjectAttributes>,
    services: WorkspaceServices,
    parser: Arc<dyn ParserService>,
    parse_options: Arc<ParseOptions>,
    compilation_options: Arc<CompilationOptions>,
    document_ids: Arc<Vec<DocumentId>>,
    documents: Arc<BTreeMap<DocumentId, Arc<DocumentState>>>,
    project_references: Arc<BTreeSet<ProjectId>>,
    metadata_references: Arc<Vec<MetadataReference>>,
    analyzer_references: Arc<Vec<AnalyzerReference>>,
    /// Newest text version over non-generated documents.
    latest_document_version: LazyValue<VersionStamp>,
    /// Newest top-level change version over all documents.
    latest_top_level_version: LazyValue<VersionStamp>,
}

impl ProjectState {
    pub fn new(info: ProjectInfo, services: WorkspaceServices) -> Result<Self, WorkspaceError> {
        let parser = services.parser(&info.language)?;
        let project_references = reference_set(info.id, info.project_references)?;

        let mut this = Self {
            attributes: Arc::new(ProjectAttributes {
                id: info.id,
                version: VersionStamp::create(),
                name: info.name,
                language: info.language,
                file_path: info.file_path,
            }),
            services,
            parser,
            parse_options: Arc::new(info.parse_options),
            compilation_options: Arc::new(info.compilation_options),
            document_ids: Arc::new(Vec::new()),
            documents: Arc::new(BTreeMap::new()),
            project_references: Arc::new(project_references),
            metadata_references: Arc::new(info.metadata_references),
            analyzer_references: Arc::new(info.analyzer_references),
            latest_document_version: LazyValue::from_value(VersionStamp::default()),
            latest_top_level_version: LazyValue::from_value(VersionStamp::default()),
        };
        this.insert_documents(info.documents)?;
        this.recompute_aggregates();
        Ok(this)
    }

    pub fn id(&self) -> ProjectId {
        self.attributes.id
    }

    pub fn attributes(&self) -> &ProjectAttributes {
        &self.attributes
    }

    pub fn version(&self) -> VersionStamp {
        self.attributes.version
    }

    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    pub fn language(&self) -> &str {
        &self.attributes.language
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.attributes.file_path.as_deref()
    }

    pub fn parse_options(&self) -> &ParseOptions {
        &self.parse_options
    }

    pub fn compilation_options(&self) -> &CompilationOptions {
        &self.compilation_options
    }

    pub fn document_ids(&self) -> &[DocumentId] {
        &self.document_ids
    }

    /// Documents in project order.
    pub fn documents(&self) -> impl Iterator<Item = &Arc<DocumentState>> + '_ {
        self.document_ids
            .iter()
            .filter_map(|id| self.documents.get(id))
    }

    pub fn document(&self, id: DocumentId) -> Option<&Arc<DocumentState>> {
        self.documents.get(&id)
    }

    pub fn contains_document(&self, id: DocumentId) -> bool {
        self.documents.contains_key(&id)
    }

    pub fn document_count(&self) -> usize {
        self.document_ids.len()
    }

    pub fn project_references(&self) -> &BTreeSet<ProjectId> {
        &self.project_references
    }

    pub fn metadata_references(&self) -> &[MetadataReference] {
        &self.metadata_references
    }

    pub fn analyzer_references(&self) -> &[AnalyzerReference] {
        &self.analyzer_references
    }

    pub fn try_latest_document_version(&self) -> Option<VersionStamp> {
        self.latest_document_version.try_peek()
    }

    pub fn latest_document_version(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        self.latest_document_version.get(cancel)
    }

    pub async fn latest_document_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        self.latest_document_version.get_async(cancel).await
    }

    pub fn try_latest_top_level_version(&self) -> Option<VersionStamp> {
        self.latest_top_level_version.try_peek()
    }

    pub fn latest_top_level_version(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        self.latest_top_level_version.get(cancel)
    }

    pub async fn latest_top_level_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        self.latest_top_level_version.get_async(cancel).await
    }

    /// Newest of the project version and any document text version.
    pub fn dependent_version(&self, cancel: &CancellationToken) -> Result<VersionStamp, LazyError> {
        Ok(self.latest_document_version(cancel)?.newer_of(self.version()))
    }

    pub async fn dependent_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        Ok(self
            .latest_document_version_async(cancel)
            .await?
            .newer_of(self.version()))
    }

    /// Newest of the project version and any top-level change version.
    pub fn dependent_semantic_version(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        Ok(self.latest_top_level_version(cancel)?.newer_of(self.version()))
    }

    pub async fn dependent_semantic_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        Ok(self
            .latest_top_level_version_async(cancel)
            .await?
            .newer_of(self.version()))
    }

    pub fn add_documents(&self, documents: Vec<DocumentInfo>) -> Result<Self, WorkspaceError> {
        let mut this = self.bumped();
        this.insert_documents(documents)?;
        this.recompute_aggregates();
        Ok(this)
    }

    pub fn remove_documents(&self, ids: &[DocumentId]) -> Result<Self, WorkspaceError> {
        let mut documents = (*self.documents).clone();
        for id in ids {
            if documents.remove(id).is_none() {
                return Err(WorkspaceError::DocumentNotFound(*id));
            }
        }
        let document_ids = self
            .document_ids
            .iter()
            .copied()
            .filter(|id| documents.contains_key(id))
            .collect();

        let mut this = self.bumped();
        this.documents = Arc::new(documents);
        this.document_ids = Arc::new(document_ids);
        this.recompute_aggregates();
        Ok(this)
    }

    /// Replaces one document with a newer snapshot of itself.
    ///
    /// Aggregates whose input did not change are shared with `self`; the
    /// others are updated incrementally when that is exact.
    pub fn update_document(&self, document: DocumentState) -> Result<Self, WorkspaceError> {
        let id = document.id();
        let old = self
            .documents
            .get(&id)
            .ok_or(WorkspaceError::DocumentNotFound(id))?
            .clone();
        let new = Arc::new(document);

        let mut documents = (*self.documents).clone();
        documents.insert(id, new.clone());
        let documents = Arc::new(documents);

        let latest_document_version = self.updated_aggregate(
            Contribution::Text,
            &self.latest_document_version,
            &old,
            &new,
            &documents,
        );
        let latest_top_level_version = self.updated_aggregate(
            Contribution::TopLevel,
            &self.latest_top_level_version,
            &old,
            &new,
            &documents,
        );

        Ok(Self {
            documents,
            latest_document_version,
            latest_top_level_version,
            ..self.clone()
        })
    }

    /// Reorders documents. `order` must list exactly the current documents.
    pub fn with_documents_order(&self, order: Vec<DocumentId>) -> Result<Self, WorkspaceError> {
        let unique: BTreeSet<DocumentId> = order.iter().copied().collect();
        if order.len() != self.document_ids.len()
            || unique.len() != order.len()
            || !unique.iter().all(|id| self.documents.contains_key(id))
        {
            return Err(WorkspaceError::InvalidDocumentOrder(self.id()));
        }
        let mut this = self.bumped();
        this.document_ids = Arc::new(order);
        Ok(this)
    }

    /// Re-creates every document with `options`; trees are parsed from
    /// scratch.
    pub fn with_parse_options(&self, options: ParseOptions) -> Self {
        let documents = self
            .documents
            .iter()
            .map(|(id, doc)| (*id, Arc::new(doc.with_parse_options(options.clone()))))
            .collect();
        let mut this = self.bumped();
        this.parse_options = Arc::new(options);
        this.documents = Arc::new(documents);
        this.latest_top_level_version =
            aggregate_from_scratch(Contribution::TopLevel, this.ordered_documents());
        this
    }

    pub fn with_compilation_options(&self, options: CompilationOptions) -> Self {
        let mut this = self.bumped();
        this.compilation_options = Arc::new(options);
        this
    }

    pub fn with_project_references(
        &self,
        references: Vec<ProjectId>,
    ) -> Result<Self, WorkspaceError> {
        let references = reference_set(self.id(), references)?;
        let mut this = self.bumped();
        this.project_references = Arc::new(references);
        Ok(this)
    }

    pub fn add_project_reference(&self, project: ProjectId) -> Result<Self, WorkspaceError> {
        if self.project_references.contains(&project) {
            return Err(WorkspaceError::DuplicateProjectReference {
                from: self.id(),
                to: project,
            });
        }
        let mut this = self.bumped();
        Arc::make_mut(&mut this.project_references).insert(project);
        Ok(this)
    }

    pub fn remove_project_reference(&self, project: ProjectId) -> Result<Self, WorkspaceError> {
        if !self.project_references.contains(&project) {
            return Err(WorkspaceError::ProjectReferenceNotFound {
                from: self.id(),
                to: project,
            });
        }
        let mut this = self.bumped();
        Arc::make_mut(&mut this.project_references).remove(&project);
        Ok(this)
    }

    pub fn with_metadata_references(&self, references: Vec<MetadataReference>) -> Self {
        let mut this = self.bumped();
        this.metadata_references = Arc::new(references);
        this
    }

    pub fn with_analyzer_references(&self, references: Vec<AnalyzerReference>) -> Self {
        let mut this = self.bumped();
        this.analyzer_references = Arc::new(references);
        this
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let mut this = self.bumped();
        Arc::make_mut(&mut this.attributes).name = name.into();
        this
    }

    pub fn with_file_path(&self, file_path: Option<PathBuf>) -> Self {
        let mut this = self.bumped();
        Arc::make_mut(&mut this.attributes).file_path = file_path;
        this
    }

    pub(crate) fn project_references_arc(&self) -> &Arc<BTreeSet<ProjectId>> {
        &self.project_references
    }

    fn bumped(&self) -> Self {
        let mut this = self.clone();
        let attributes = Arc::make_mut(&mut this.attributes);
        attributes.version = attributes.version.newer();
        this
    }

    fn insert_documents(&mut self, infos: Vec<DocumentInfo>) -> Result<(), WorkspaceError> {
        let project = self.id();
        let mut documents = (*self.documents).clone();
        let mut document_ids = (*self.document_ids).clone();
        for info in infos {
            let id = info.attributes.id;
            if id.project_id() != project {
                return Err(WorkspaceError::DocumentProjectMismatch {
                    document: id,
                    project,
                });
            }
            if documents.contains_key(&id) {
                return Err(WorkspaceError::DuplicateDocument(id));
            }
            let document = DocumentState::new(
                info.attributes,
                (*self.parse_options).clone(),
                info.text,
                self.parser.clone(),
                self.services.clone(),
            );
            documents.insert(id, Arc::new(document));
            document_ids.push(id);
        }
        self.documents = Arc::new(documents);
        self.document_ids = Arc::new(document_ids);
        Ok(())
    }

    fn ordered_documents(&self) -> Arc<[Arc<DocumentState>]> {
        self.documents().cloned().collect()
    }

    fn recompute_aggregates(&mut self) {
        let documents = self.ordered_documents();
        self.latest_document_version = aggregate_from_scratch(Contribution::Text, documents.clone());
        self.latest_top_level_version = aggregate_from_scratch(Contribution::TopLevel, documents);
    }

    fn updated_aggregate(
        &self,
        contribution: Contribution,
        current: &LazyValue<VersionStamp>,
        old: &Arc<DocumentState>,
        new: &Arc<DocumentState>,
        documents: &Arc<BTreeMap<DocumentId, Arc<DocumentState>>>,
    ) -> LazyValue<VersionStamp> {
        let old_counts = contribution.counts(old);
        let new_counts = contribution.counts(new);
        if !contribution.input_changed(old, new) || (!old_counts && !new_counts) {
            return current.clone();
        }

        // The old aggregate may have come from `old` itself, whose
        // contribution is now gone. Only a full pass can find the next one.
        let recompute = old_counts != new_counts
            || match (current.try_peek(), contribution.peek(old)) {
                (None, _) => true,
                (Some(aggregate), Some(previous)) => aggregate == previous,
                (Some(_), None) => false,
            };

        tracing::trace!(
            target = "nova.workspace",
            project = %self.id(),
            document = %new.id(),
            aggregate = contribution.name(),
            recompute,
            "updating project aggregate version"
        );

        if recompute {
            let ordered: Arc<[Arc<DocumentState>]> = self
                .document_ids
                .iter()
                .filter_map(|id| documents.get(id).cloned())
                .collect();
            aggregate_from_scratch(contribution, ordered)
        } else {
            aggregate_with_update(contribution, current.clone(), new.clone())
        }
    }
}

impl fmt::Debug for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectState")
            .field("id", &self.attributes.id)
            .field("name", &self.attributes.name)
            .field("version", &self.attributes.version)
            .field("documents", &self.document_ids)
            .field("project_references", &self.project_references)
            .finish()
    }
}

fn reference_set(
    project: ProjectId,
    references: Vec<ProjectId>,
) -> Result<BTreeSet<ProjectId>, WorkspaceError> {
    let mut set = BTreeSet::new();
    for reference in references {
        if !set.insert(reference) {
            return Err(WorkspaceError::DuplicateProjectReference {
                from: project,
                to: reference,
            });
        }
    }
    Ok(set)
}

/// Which per-document version an aggregate folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contribution {
    Text,
    TopLevel,
}

impl Contribution {
    fn name(self) -> &'static str {
        match self {
            Contribution::Text => "latest-document",
            Contribution::TopLevel => "latest-top-level",
        }
    }

    fn counts(self, document: &DocumentState) -> bool {
        match self {
            Contribution::Text => !document.is_generated(),
            Contribution::TopLevel => true,
        }
    }

    fn input_changed(self, old: &DocumentState, new: &DocumentState) -> bool {
        match self {
            Contribution::Text => !old.text_ptr_eq(new),
            Contribution::TopLevel => !old.tree_ptr_eq(new),
        }
    }

    fn peek(self, document: &DocumentState) -> Option<VersionStamp> {
        match self {
            Contribution::Text => document.try_text_version(),
            Contribution::TopLevel => document.try_top_level_change_version(),
        }
    }

    fn get(
        self,
        document: &DocumentState,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        match self {
            Contribution::Text => document.text_version(cancel),
            Contribution::TopLevel => document.top_level_change_version(cancel),
        }
    }

    async fn get_async(
        self,
        document: &DocumentState,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        match self {
            Contribution::Text => document.text_version_async(cancel).await,
            Contribution::TopLevel => document.top_level_change_version_async(cancel).await,
        }
    }
}

fn aggregate_from_scratch(
    contribution: Contribution,
    documents: Arc<[Arc<DocumentState>]>,
) -> LazyValue<VersionStamp> {
    let sync_documents = documents.clone();
    let sync: SyncProducer<VersionStamp> = Arc::new(move |cancel| {
        let mut latest = VersionStamp::default();
        for document in sync_documents.iter().filter(|doc| contribution.counts(doc)) {
            latest = latest.newer_of(contribution.get(document, cancel)?);
        }
        Ok(latest)
    });
    let async_: AsyncProducer<VersionStamp> = Arc::new(move |cancel: CancellationToken| {
        let documents = documents.clone();
        async move {
            let mut latest = VersionStamp::default();
            for document in documents.iter().filter(|doc| contribution.counts(doc)) {
                latest = latest.newer_of(contribution.get_async(document, &cancel).await?);
            }
            Ok(latest)
        }
        .boxed()
    });
    LazyValue::with_producers(sync, async_)
}

fn aggregate_with_update(
    contribution: Contribution,
    previous: LazyValue<VersionStamp>,
    document: Arc<DocumentState>,
) -> LazyValue<VersionStamp> {
    let sync_previous = previous.clone();
    let sync_document = document.clone();
    let sync: SyncProducer<VersionStamp> = Arc::new(move |cancel| {
        let previous = sync_previous.get(cancel)?;
        Ok(previous.newer_of(contribution.get(&sync_document, cancel)?))
    });
    let async_: AsyncProducer<VersionStamp> = Arc::new(move |cancel: CancellationToken| {
        let previous = previous.clone();
        let document = document.clone();
        async move {
            let previous = previous.get_async(&cancel).await?;
            Ok(previous.newer_of(contribution.get_async(&document, &cancel).await?))
        }
        .boxed()
    });
    LazyValue::with_producers(sync, async_)
}
