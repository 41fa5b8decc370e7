use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel as channel;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Job(Job),
    Barrier(channel::Sender<()>),
}

enum Backend {
    Thread(channel::Sender<Message>),
    /// The worker thread could not be spawned; jobs run on the caller.
    Inline,
}

/// Serial background queue for spill writes.
///
/// A single consumer thread drains the queue, so jobs run strictly in
/// submission order and never concurrently with each other. Submitting never
/// blocks on the job itself.
#[derive(Clone)]
pub struct SpillQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    backend: Backend,
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
}

impl SpillQueue {
    pub fn new(name: &str) -> Self {
        let pending = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicU64::new(0));
        let (tx, rx) = channel::unbounded::<Message>();

        let backend = match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(rx))
        {
            Ok(_) => Backend::Thread(tx),
            Err(err) => {
                tracing::warn!(
                    target = "nova.cache",
                    error = %err,
                    "failed to spawn spill worker; spilling inline"
                );
                Backend::Inline
            }
        };

        Self {
            inner: Arc::new(QueueInner {
                backend,
                pending,
                completed,
            }),
        }
    }

    /// Queue that runs every job on the submitting thread.
    pub fn inline() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                backend: Backend::Inline,
                pending: Arc::new(AtomicUsize::new(0)),
                completed: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Process-wide queue shared by every retained text by default.
    pub fn global() -> SpillQueue {
        static GLOBAL: OnceLock<SpillQueue> = OnceLock::new();
        GLOBAL.get_or_init(|| SpillQueue::new("nova-spill")).clone()
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let pending = self.inner.pending.clone();
        let completed = self.inner.completed.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        let job: Job = Box::new(move || {
            if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!(target = "nova.cache", "spill job panicked");
            }
            pending.fetch_sub(1, Ordering::SeqCst);
            completed.fetch_add(1, Ordering::SeqCst);
        });

        match &self.inner.backend {
            Backend::Thread(tx) => {
                if let Err(channel::SendError(Message::Job(job))) = tx.send(Message::Job(job)) {
                    job();
                }
            }
            Backend::Inline => job(),
        }
    }

    /// Blocks until every job submitted before this call has finished.
    pub fn flush(&self) {
        let Backend::Thread(tx) = &self.inner.backend else {
            return;
        };
        let (done_tx, done_rx) = channel::bounded(1);
        if tx.send(Message::Barrier(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Jobs submitted but not finished yet.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.inner.backend, Backend::Inline)
    }
}

impl fmt::Debug for SpillQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillQueue")
            .field("inline", &self.is_inline())
            .field("pending", &self.pending())
            .field("completed", &self.completed())
            .finish()
    }
}

fn run_worker(rx: channel::Receiver<Message>) {
    for message in rx.iter() {
        match message {
            Message::Job(job) => job(),
            Message::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}
