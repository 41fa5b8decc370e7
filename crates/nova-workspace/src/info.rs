use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use nova_core::{DocumentId, ProjectId, TextAndVersion, VersionStamp};
use nova_syntax::ParseOptions;
use serde::{Deserialize, Serialize};

use crate::{DocumentAttributes, TextLoader, TextSource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilationOptions {
    pub output_name: Option<String>,
    pub optimize: bool,
    pub defines: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetadataReference {
    pub path: PathBuf,
}

impl MetadataReference {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnalyzerReference {
    pub path: PathBuf,
}

impl AnalyzerReference {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Everything needed to add a document to a project.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub attributes: DocumentAttributes,
    pub text: TextSource,
}

impl DocumentInfo {
    pub fn new(id: DocumentId, name: impl Into<String>, text: impl Into<TextSource>) -> Self {
        Self {
            attributes: DocumentAttributes::new(id, name),
            text: text.into(),
        }
    }

    /// A document with in-memory text at a fresh version.
    pub fn with_text(id: DocumentId, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, name, TextAndVersion::new(text, VersionStamp::create()))
    }

    pub fn with_loader(
        id: DocumentId,
        name: impl Into<String>,
        loader: Arc<dyn TextLoader>,
    ) -> Self {
        Self::new(id, name, TextSource::Loader(loader))
    }

    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.attributes.file_path = Some(path.into());
        self
    }

    pub fn folders(mut self, folders: Vec<String>) -> Self {
        self.attributes.folders = folders;
        self
    }

    pub fn generated(mut self) -> Self {
        self.attributes.is_generated = true;
        self
    }
}

/// Everything needed to add a project to a solution.
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub id: ProjectId,
    pub name: String,
    pub language: String,
    pub file_path: Option<PathBuf>,
    pub parse_options: ParseOptions,
    pub compilation_options: CompilationOptions,
    pub documents: Vec<DocumentInfo>,
    pub project_references: Vec<ProjectId>,
    pub metadata_references: Vec<MetadataReference>,
    pub analyzer_references: Vec<AnalyzerReference>,
}

impl ProjectInfo {
    pub fn new(id: ProjectId, name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            language: language.into(),
            file_path: None,
            parse_options: ParseOptions::default(),
            compilation_options: CompilationOptions::default(),
            documents: Vec::new(),
            project_references: Vec::new(),
            metadata_references: Vec::new(),
            analyzer_references: Vec::new(),
        }
    }

    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn parse_options(mut self, options: ParseOptions) -> Self {
        self.parse_options = options;
        self
    }

    pub fn compilation_options(mut self, options: CompilationOptions) -> Self {
        self.compilation_options = options;
        self
    }

    pub fn document(mut self, document: DocumentInfo) -> Self {
        self.documents.push(document);
        self
    }

    pub fn project_reference(mut self, project: ProjectId) -> Self {
        self.project_references.push(project);
        self
    }

    pub fn metadata_reference(mut self, reference: MetadataReference) -> Self {
        self.metadata_references.push(reference);
        self
    }

    pub fn analyzer_reference(mut self, reference: AnalyzerReference) -> Self {
        self.analyzer_references.push(reference);
        self
    }
}
