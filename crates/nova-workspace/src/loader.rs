use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::{BoxFuture, FutureExt};
use nova_cache::{AsyncProducer, CancellationToken, LazyError, LazyValue, SyncProducer};
use nova_core::{TextAndVersion, VersionStamp};
use parking_lot::Mutex;

/// Source of a document's text outside the snapshot graph.
pub trait TextLoader: Send + Sync + fmt::Debug {
    fn load(&self, cancel: &CancellationToken) -> Result<TextAndVersion, LazyError>;

    fn load_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<TextAndVersion, LazyError>>;

    fn file_path(&self) -> Option<&Path> {
        None
    }
}

/// Wraps a loader in an uncached lazy value: every call goes back to the
/// loader, while concurrent calls share one load.
pub(crate) fn loader_lazy(loader: Arc<dyn TextLoader>) -> LazyValue<TextAndVersion> {
    let sync_loader = loader.clone();
    let sync: SyncProducer<TextAndVersion> = Arc::new(move |cancel| sync_loader.load(cancel));
    let async_: AsyncProducer<TextAndVersion> = Arc::new(move |cancel: CancellationToken| {
        let loader = loader.clone();
        async move { loader.load_async(&cancel).await }.boxed()
    });
    LazyValue::with_producers_uncached(sync, async_)
}

/// Hands out a fixed text.
#[derive(Debug, Clone)]
pub struct ConstantTextLoader {
    value: TextAndVersion,
}

impl ConstantTextLoader {
    pub fn new(value: TextAndVersion) -> Self {
        Self { value }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(TextAndVersion::new(text, VersionStamp::create()))
    }
}

impl TextLoader for ConstantTextLoader {
    fn load(&self, cancel: &CancellationToken) -> Result<TextAndVersion, LazyError> {
        if cancel.is_cancelled() {
            return Err(LazyError::Cancelled);
        }
        Ok(self.value.clone())
    }

    fn load_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<TextAndVersion, LazyError>> {
        futures::future::ready(self.load(cancel)).boxed()
    }
}

/// Reads a UTF-8 file from disk.
///
/// The version is tied to the file's modification time: reloading a file
/// whose mtime is unchanged yields the previous version, any other load gets
/// a fresh stamp.
#[derive(Debug)]
pub struct FileTextLoader {
    path: PathBuf,
    last: Mutex<Option<(SystemTime, VersionStamp)>>,
}

impl FileTextLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn version_for(&self, modified: Option<SystemTime>) -> VersionStamp {
        let Some(modified) = modified else {
            return VersionStamp::create();
        };
        let mut last = self.last.lock();
        match *last {
            Some((seen, version)) if seen == modified => version,
            _ => {
                let version = VersionStamp::create();
                *last = Some((modified, version));
                version
            }
        }
    }

    fn io_error(&self, err: std::io::Error) -> LazyError {
        tracing::debug!(
            target = "nova.workspace",
            path = %self.path.display(),
            error = %err,
            "failed to load document text"
        );
        LazyError::failed(err)
    }
}

impl TextLoader for FileTextLoader {
    fn load(&self, cancel: &CancellationToken) -> Result<TextAndVersion, LazyError> {
        if cancel.is_cancelled() {
            return Err(LazyError::Cancelled);
        }
        let modified = std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok();
        let text = std::fs::read_to_string(&self.path).map_err(|err| self.io_error(err))?;
        Ok(TextAndVersion::new(text, self.version_for(modified)))
    }

    fn load_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<TextAndVersion, LazyError>> {
        async move {
            let read = async {
                let modified = tokio::fs::metadata(&self.path)
                    .await
                    .and_then(|meta| meta.modified())
                    .ok();
                let text = tokio::fs::read_to_string(&self.path).await?;
                Ok::<_, std::io::Error>((text, modified))
            };
            tokio::select! {
                _ = cancel.cancelled() => Err(LazyError::Cancelled),
                result = read => {
                    let (text, modified) = result.map_err(|err| self.io_error(err))?;
                    Ok(TextAndVersion::new(text, self.version_for(modified)))
                }
            }
        }
        .boxed()
    }

    fn file_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
