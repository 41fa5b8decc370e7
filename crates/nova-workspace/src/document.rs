//! Immutable document snapshots.
//!
//! A [`DocumentState`] pairs a retained text with a lazily built syntax tree.
//! Every mutation returns a new state; the previous one stays valid and keeps
//! answering with its own text and tree.
//!
//! The tree carries its own version, the *top-level change version*: the
//! text version at which the declarations visible to dependents last
//! changed. Body-only edits keep the previous tree version.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use futures::future::FutureExt;
use nova_cache::{
    AsyncProducer, CancellationToken, LazyError, LazyValue, RetainedText, SyncProducer,
};
use nova_core::{
    apply_text_edits, normalize_text_edits, DocumentId, TextAndVersion, TextChangeRange, TextEdit,
    VersionStamp,
};
use nova_syntax::{ParseOptions, ParserService, SyntaxTree};
use parking_lot::Mutex;

use crate::loader::{loader_lazy, TextLoader};
use crate::{WorkspaceError, WorkspaceServices};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAttributes {
    pub id: DocumentId,
    pub name: String,
    /// Logical folder path inside the project.
    pub folders: Vec<String>,
    pub file_path: Option<PathBuf>,
    /// Generated documents do not contribute to the project's latest
    /// document version.
    pub is_generated: bool,
}

impl DocumentAttributes {
    pub fn new(id: DocumentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            folders: Vec::new(),
            file_path: None,
            is_generated: false,
        }
    }
}

/// A syntax tree and its top-level change version.
#[derive(Clone)]
pub struct TreeAndVersion {
    pub tree: Arc<dyn SyntaxTree>,
    pub version: VersionStamp,
}

impl fmt::Debug for TreeAndVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeAndVersion")
            .field("len", &self.tree.text_len())
            .field("version", &self.version)
            .finish()
    }
}

/// Initial text of a document.
#[derive(Debug, Clone)]
pub enum TextSource {
    Text(TextAndVersion),
    Loader(Arc<dyn TextLoader>),
}

impl From<TextAndVersion> for TextSource {
    fn from(value: TextAndVersion) -> Self {
        TextSource::Text(value)
    }
}

impl From<Arc<dyn TextLoader>> for TextSource {
    fn from(loader: Arc<dyn TextLoader>) -> Self {
        TextSource::Loader(loader)
    }
}

#[derive(Clone)]
pub struct DocumentState {
    attributes: Arc<DocumentAttributes>,
    options: Arc<ParseOptions>,
    parser: Arc<dyn ParserService>,
    services: WorkspaceServices,
    retained: RetainedText,
    /// Uncached view over `retained`, so concurrent readers share one
    /// recovery without pinning the text in memory.
    text: LazyValue<TextAndVersion>,
    tree: LazyValue<TreeAndVersion>,
}

impl DocumentState {
    pub fn new(
        attributes: DocumentAttributes,
        options: ParseOptions,
        source: TextSource,
        parser: Arc<dyn ParserService>,
        services: WorkspaceServices,
    ) -> Self {
        let retained = match source {
            TextSource::Text(value) => RetainedText::new(value, services.retention()),
            TextSource::Loader(loader) => {
                RetainedText::deferred(loader_lazy(loader), services.retention())
            }
        };
        let text = text_view(&retained);
        let attributes = Arc::new(attributes);
        let options = Arc::new(options);
        let tree = full_tree(
            ParseContext {
                document: attributes.id,
                parser: parser.clone(),
                options: options.clone(),
                path: attributes.file_path.clone(),
            },
            text.clone(),
        );
        Self {
            attributes,
            options,
            parser,
            services,
            retained,
            text,
            tree,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.attributes.id
    }

    pub fn attributes(&self) -> &DocumentAttributes {
        &self.attributes
    }

    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    pub fn folders(&self) -> &[String] {
        &self.attributes.folders
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.attributes.file_path.as_deref()
    }

    pub fn is_generated(&self) -> bool {
        self.attributes.is_generated
    }

    pub fn parse_options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn language(&self) -> &str {
        self.parser.language()
    }

    pub fn retained_text(&self) -> &RetainedText {
        &self.retained
    }

    pub fn text_and_version(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, LazyError> {
        self.text.get(cancel)
    }

    pub async fn text_and_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TextAndVersion, LazyError> {
        self.text.get_async(cancel).await
    }

    /// The text if it is in memory. Never loads or reads storage.
    pub fn try_text_and_version(&self) -> Option<TextAndVersion> {
        self.retained.try_peek()
    }

    pub fn text_version(&self, cancel: &CancellationToken) -> Result<VersionStamp, LazyError> {
        match self.retained.version() {
            Some(version) => Ok(version),
            None => Ok(self.text.get(cancel)?.version),
        }
    }

    pub async fn text_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        match self.retained.version() {
            Some(version) => Ok(version),
            None => Ok(self.text.get_async(cancel).await?.version),
        }
    }

    pub fn try_text_version(&self) -> Option<VersionStamp> {
        self.retained.version()
    }

    pub fn tree_and_version(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TreeAndVersion, LazyError> {
        self.tree.get(cancel)
    }

    pub async fn tree_and_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TreeAndVersion, LazyError> {
        self.tree.get_async(cancel).await
    }

    pub fn try_tree_and_version(&self) -> Option<TreeAndVersion> {
        self.tree.try_peek()
    }

    pub fn syntax_tree(&self, cancel: &CancellationToken) -> Result<Arc<dyn SyntaxTree>, LazyError> {
        Ok(self.tree.get(cancel)?.tree)
    }

    pub async fn syntax_tree_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn SyntaxTree>, LazyError> {
        Ok(self.tree.get_async(cancel).await?.tree)
    }

    pub fn try_syntax_tree(&self) -> Option<Arc<dyn SyntaxTree>> {
        self.tree.try_peek().map(|value| value.tree)
    }

    pub fn top_level_change_version(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        Ok(self.tree.get(cancel)?.version)
    }

    pub async fn top_level_change_version_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<VersionStamp, LazyError> {
        Ok(self.tree.get_async(cancel).await?.version)
    }

    pub fn try_top_level_change_version(&self) -> Option<VersionStamp> {
        self.tree.try_peek().map(|value| value.version)
    }

    /// Replaces the text. The tree is reparsed incrementally from the current
    /// tree when it is first requested.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        self.with_text_and_version(TextAndVersion::new(text, self.next_text_version()))
    }

    pub fn with_text_and_version(&self, value: TextAndVersion) -> Self {
        self.with_new_text(value, None)
    }

    /// Applies `edits` to the current text.
    pub fn with_text_edits(
        &self,
        mut edits: Vec<TextEdit>,
        cancel: &CancellationToken,
    ) -> Result<Self, WorkspaceError> {
        let current = self.text_and_version(cancel)?;
        normalize_text_edits(&current.text, &mut edits)?;
        let Some(change) = TextEdit::encompassing_change(&edits) else {
            return Ok(self.clone());
        };
        let text = apply_text_edits(&current.text, &edits)?;
        Ok(self.with_new_text(
            TextAndVersion::new(text, current.version.newer()),
            Some(change),
        ))
    }

    /// Replaces the text source. The tree is parsed from scratch.
    pub fn with_text_loader(&self, loader: Arc<dyn TextLoader>) -> Self {
        let retained = RetainedText::deferred(loader_lazy(loader), self.services.retention());
        let text = text_view(&retained);
        let tree = full_tree(self.parse_context(), text.clone());
        Self {
            retained,
            text,
            tree,
            ..self.clone()
        }
    }

    pub fn with_parse_options(&self, options: ParseOptions) -> Self {
        let mut this = Self {
            options: Arc::new(options),
            ..self.clone()
        };
        this.tree = full_tree(this.parse_context(), this.text.clone());
        this
    }

    /// Replaces the tree. The text is derived from the tree on demand.
    ///
    /// The top-level change version survives when the current tree is
    /// resident and top-level equivalent to `tree`.
    ///
    /// # Panics
    ///
    /// If `tree` already belongs to a different document.
    pub fn with_syntax_tree(&self, tree: Arc<dyn SyntaxTree>) -> Self {
        bind_tree(&tree, self.id());

        let text_version = self.next_text_version();
        let tree_version = match self.tree.try_peek() {
            Some(old) if old.tree.is_equivalent_to(tree.as_ref(), true) => old.version,
            _ => text_version,
        };

        let source = tree.clone();
        let loader = LazyValue::new_uncached(move |_: &CancellationToken| {
            Ok(TextAndVersion::new(source.text(), text_version))
        });
        let retained = RetainedText::deferred(loader, self.services.retention());
        let text = text_view(&retained);
        Self {
            options: Arc::new(tree.options().clone()),
            retained,
            text,
            tree: LazyValue::from_value(TreeAndVersion {
                tree,
                version: tree_version,
            }),
            ..self.clone()
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        self.with_attributes(DocumentAttributes {
            name: name.into(),
            ..(*self.attributes).clone()
        })
    }

    pub fn with_folders(&self, folders: Vec<String>) -> Self {
        self.with_attributes(DocumentAttributes {
            folders,
            ..(*self.attributes).clone()
        })
    }

    /// Trees record their path, so this reparses.
    pub fn with_file_path(&self, file_path: Option<PathBuf>) -> Self {
        let mut this = self.with_attributes(DocumentAttributes {
            file_path,
            ..(*self.attributes).clone()
        });
        this.tree = full_tree(this.parse_context(), this.text.clone());
        this
    }

    pub(crate) fn text_ptr_eq(&self, other: &DocumentState) -> bool {
        self.retained.ptr_eq(&other.retained)
    }

    pub(crate) fn tree_ptr_eq(&self, other: &DocumentState) -> bool {
        self.tree.ptr_eq(&other.tree)
    }

    fn with_attributes(&self, attributes: DocumentAttributes) -> Self {
        Self {
            attributes: Arc::new(attributes),
            ..self.clone()
        }
    }

    fn with_new_text(&self, value: TextAndVersion, change: Option<TextChangeRange>) -> Self {
        let retained = RetainedText::new(value, self.services.retention());
        let text = text_view(&retained);
        let tree = incremental_tree(
            self.parse_context(),
            self.tree.clone(),
            text.clone(),
            change,
            self.services.top_level_text_threshold(),
        );
        Self {
            retained,
            text,
            tree,
            ..self.clone()
        }
    }

    fn next_text_version(&self) -> VersionStamp {
        self.retained
            .version()
            .map(VersionStamp::newer)
            .unwrap_or_else(VersionStamp::create)
    }

    fn parse_context(&self) -> ParseContext {
        ParseContext {
            document: self.attributes.id,
            parser: self.parser.clone(),
            options: self.options.clone(),
            path: self.attributes.file_path.clone(),
        }
    }
}

impl fmt::Debug for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentState")
            .field("id", &self.attributes.id)
            .field("name", &self.attributes.name)
            .field("language", &self.parser.language())
            .field("text_version", &self.retained.version())
            .field("tree_version", &self.try_top_level_change_version())
            .finish()
    }
}

fn text_view(retained: &RetainedText) -> LazyValue<TextAndVersion> {
    let sync_text = retained.clone();
    let async_text = retained.clone();
    let sync: SyncProducer<TextAndVersion> =
        Arc::new(move |cancel| sync_text.text_and_version(cancel));
    let async_: AsyncProducer<TextAndVersion> = Arc::new(move |cancel: CancellationToken| {
        let text = async_text.clone();
        async move { text.text_and_version_async(&cancel).await }.boxed()
    });
    LazyValue::with_producers_uncached(sync, async_)
}

#[derive(Clone)]
struct ParseContext {
    document: DocumentId,
    parser: Arc<dyn ParserService>,
    options: Arc<ParseOptions>,
    path: Option<PathBuf>,
}

impl ParseContext {
    fn parse(&self, text: &TextAndVersion) -> TreeAndVersion {
        let tree = self
            .parser
            .parse(&text.text, &self.options, self.path.as_deref());
        bind_tree(&tree, self.document);
        TreeAndVersion {
            tree,
            version: text.version,
        }
    }

    fn reparse(
        &self,
        old: &TreeAndVersion,
        new_text: &TextAndVersion,
        change: Option<TextChangeRange>,
        threshold: usize,
    ) -> TreeAndVersion {
        let change = change.unwrap_or_else(|| TextChangeRange::between(&old.tree.text(), &new_text.text));
        if change.is_empty() {
            return old.clone();
        }

        let tree = old.tree.with_changed_text(&new_text.text, change);
        bind_tree(&tree, self.document);
        let changed = top_level_changed(
            old.tree.as_ref(),
            tree.as_ref(),
            change,
            threshold,
        );
        TreeAndVersion {
            tree,
            version: if changed { new_text.version } else { old.version },
        }
    }
}

fn full_tree(ctx: ParseContext, text: LazyValue<TextAndVersion>) -> LazyValue<TreeAndVersion> {
    let sync_ctx = ctx.clone();
    let sync_text = text.clone();
    let sync: SyncProducer<TreeAndVersion> = Arc::new(move |cancel| {
        let text = sync_text.get(cancel)?;
        if cancel.is_cancelled() {
            return Err(LazyError::Cancelled);
        }
        Ok(sync_ctx.parse(&text))
    });
    let async_: AsyncProducer<TreeAndVersion> = Arc::new(move |cancel: CancellationToken| {
        let ctx = ctx.clone();
        let text = text.clone();
        async move {
            let text = text.get_async(&cancel).await?;
            if cancel.is_cancelled() {
                return Err(LazyError::Cancelled);
            }
            Ok(ctx.parse(&text))
        }
        .boxed()
    });
    LazyValue::with_producers(sync, async_)
}

fn incremental_tree(
    ctx: ParseContext,
    old_tree: LazyValue<TreeAndVersion>,
    text: LazyValue<TextAndVersion>,
    change: Option<TextChangeRange>,
    threshold: usize,
) -> LazyValue<TreeAndVersion> {
    let sync_ctx = ctx.clone();
    let sync_old = old_tree.clone();
    let sync_text = text.clone();
    let sync: SyncProducer<TreeAndVersion> = Arc::new(move |cancel| {
        let old = sync_old.get(cancel)?;
        let text = sync_text.get(cancel)?;
        if cancel.is_cancelled() {
            return Err(LazyError::Cancelled);
        }
        Ok(sync_ctx.reparse(&old, &text, change, threshold))
    });
    let async_: AsyncProducer<TreeAndVersion> = Arc::new(move |cancel: CancellationToken| {
        let ctx = ctx.clone();
        let old_tree = old_tree.clone();
        let text = text.clone();
        async move {
            let old = old_tree.get_async(&cancel).await?;
            let text = text.get_async(&cancel).await?;
            if cancel.is_cancelled() {
                return Err(LazyError::Cancelled);
            }
            Ok(ctx.reparse(&old, &text, change, threshold))
        }
        .boxed()
    });
    LazyValue::with_producers(sync, async_)
}

/// Decides whether an edit changed top-level declarations.
///
/// Equivalence checks cost time proportional to the tree, so they only run
/// when the texts or the changed region are smaller than `threshold` bytes.
/// Every other case reports a change.
pub(crate) fn top_level_changed(
    old: &dyn SyntaxTree,
    new: &dyn SyntaxTree,
    change: TextChangeRange,
    threshold: usize,
) -> bool {
    let old_len = old.text_len();
    let new_len = new.text_len();
    let span_len = u32::from(change.span.len()) as usize;
    let new_span_len = u32::from(change.new_len) as usize;

    let (tier, changed) = if change.is_empty() {
        ("empty-change", false)
    } else if old_len < threshold && new_len < threshold {
        ("small-text", !old.is_equivalent_to(new, true))
    } else if span_len == old_len {
        ("whole-text", true)
    } else if span_len < threshold && new_span_len < threshold {
        ("small-change", !old.is_equivalent_to(new, true))
    } else {
        ("large-change", true)
    };

    tracing::trace!(
        target = "nova.workspace",
        tier,
        changed,
        old_len,
        new_len,
        "top-level change decided"
    );
    changed
}

struct Binding {
    tree: Weak<dyn SyntaxTree>,
    document: DocumentId,
}

#[derive(Default)]
struct TreeBindings {
    entries: HashMap<usize, Binding>,
    prune_at: usize,
}

fn tree_bindings() -> &'static Mutex<TreeBindings> {
    static BINDINGS: OnceLock<Mutex<TreeBindings>> = OnceLock::new();
    BINDINGS.get_or_init(|| Mutex::new(TreeBindings::default()))
}

fn tree_key(tree: &Arc<dyn SyntaxTree>) -> usize {
    Arc::as_ptr(tree) as *const () as usize
}

/// Records that `tree` belongs to `document`.
///
/// A live `Weak` keeps the allocation (and thus the key) from being reused,
/// so a dead entry can simply be overwritten.
fn bind_tree(tree: &Arc<dyn SyntaxTree>, document: DocumentId) {
    let key = tree_key(tree);
    let conflict = {
        let mut bindings = tree_bindings().lock();
        if bindings.entries.len() >= bindings.prune_at {
            bindings.entries.retain(|_, binding| binding.tree.strong_count() > 0);
            bindings.prune_at = (bindings.entries.len() * 2).max(64);
        }
        match bindings.entries.get(&key) {
            Some(existing) if existing.tree.strong_count() > 0 => {
                (existing.document != document).then_some(existing.document)
            }
            _ => {
                bindings.entries.insert(
                    key,
                    Binding {
                        tree: Arc::downgrade(tree),
                        document,
                    },
                );
                None
            }
        }
    };

    if let Some(existing) = conflict {
        panic!("syntax tree is already bound to document {existing}; cannot bind it to {document}");
    }
}

/// The document a tree was produced for or attached to.
pub fn document_id_for_tree(tree: &Arc<dyn SyntaxTree>) -> Option<DocumentId> {
    let bindings = tree_bindings().lock();
    bindings
        .entries
        .get(&tree_key(tree))
        .filter(|binding| binding.tree.strong_count() > 0)
        .map(|binding| binding.document)
}
