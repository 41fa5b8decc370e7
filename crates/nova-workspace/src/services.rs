use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nova_cache::RetentionContext;
use nova_config::WorkspaceModelConfig;
use nova_memory::MemoryManager;
use nova_storage::{FileStorageService, MemoryStorageService, TemporaryStorageService};
use nova_syntax::{OutlineParser, ParserService};

use crate::WorkspaceError;

/// Shared collaborators of every snapshot in a workspace.
///
/// Cheap to clone. The outline parser is registered by default; other
/// languages are added with [`WorkspaceServices::with_parser`].
#[derive(Clone)]
pub struct WorkspaceServices {
    config: Arc<WorkspaceModelConfig>,
    parsers: Arc<BTreeMap<String, Arc<dyn ParserService>>>,
    retention: RetentionContext,
    memory: MemoryManager,
}

impl WorkspaceServices {
    /// Builds the services described by `config`. Spilled text goes to
    /// `storage.directory` when it is set and stays in process otherwise.
    pub fn new(config: WorkspaceModelConfig) -> Result<Self, WorkspaceError> {
        let storage: Arc<dyn TemporaryStorageService> = match &config.storage.directory {
            Some(dir) => Arc::new(FileStorageService::new(
                dir.clone(),
                config.storage.compression_threshold,
            )?),
            None => Arc::new(MemoryStorageService::new()),
        };
        Ok(Self::with_storage(config, storage))
    }

    pub fn with_storage(
        config: WorkspaceModelConfig,
        storage: Arc<dyn TemporaryStorageService>,
    ) -> Self {
        let memory =
            MemoryManager::with_options(config.memory.budget(), config.memory.manager_options());
        let retention = RetentionContext::new(storage);
        retention.cache.register(&memory);

        let outline: Arc<dyn ParserService> = Arc::new(OutlineParser::new());
        let mut parsers = BTreeMap::new();
        parsers.insert(outline.language().to_owned(), outline);

        tracing::debug!(
            target = "nova.workspace",
            budget = memory.budget().total,
            threshold = config.top_level_text_threshold,
            "workspace services created"
        );

        Self {
            config: Arc::new(config),
            parsers: Arc::new(parsers),
            retention,
            memory,
        }
    }

    /// Registers `parser` for its language, replacing any previous one.
    pub fn with_parser(mut self, parser: Arc<dyn ParserService>) -> Self {
        Arc::make_mut(&mut self.parsers).insert(parser.language().to_owned(), parser);
        self
    }

    /// Swaps the retention collaborators, registering the new text cache with
    /// this workspace's memory manager.
    pub fn with_retention(mut self, retention: RetentionContext) -> Self {
        retention.cache.register(&self.memory);
        self.retention = retention;
        self
    }

    pub fn config(&self) -> &WorkspaceModelConfig {
        &self.config
    }

    pub fn parser(&self, language: &str) -> Result<Arc<dyn ParserService>, WorkspaceError> {
        self.parsers
            .get(language)
            .cloned()
            .ok_or_else(|| WorkspaceError::UnsupportedLanguage(language.to_owned()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }

    pub fn retention(&self) -> &RetentionContext {
        &self.retention
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn top_level_text_threshold(&self) -> usize {
        self.config.top_level_text_threshold
    }
}

impl Default for WorkspaceServices {
    fn default() -> Self {
        Self::with_storage(
            WorkspaceModelConfig::default(),
            Arc::new(MemoryStorageService::new()),
        )
    }
}

impl fmt::Debug for WorkspaceServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceServices")
            .field("languages", &self.parsers.keys().collect::<Vec<_>>())
            .field("storage", &self.retention.storage)
            .field("memory", &self.memory)
            .finish()
    }
}
