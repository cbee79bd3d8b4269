use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use shared::{
    domain::{LocalFileId, UploadTarget},
    protocol::UploadedFile,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

pub mod error;
pub mod transport;
pub mod types;

pub use error::UploadError;
pub use transport::{HttpTransportOptions, HttpUploadTransport, UploadTransport};
pub use types::{FileDescriptor, FileEntry, FileRef, FileSource, NewFile, PendingSummary};

use transport::{BatchFile, UploadBatch};
use types::{PendingFile, Seed};

/// How long finished progress entries stay visible.
pub const DEFAULT_PROGRESS_CLEAR_DELAY: Duration = Duration::from_secs(1);
const EVENT_CHANNEL_CAPACITY: usize = 256;
const PROGRESS_STARTED: u8 = 0;
const PROGRESS_DONE: u8 = 100;

pub type UploadProgress = BTreeMap<LocalFileId, u8>;

#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// The combined uploaded ++ pending view changed in value.
    FilesChanged(Vec<FileEntry>),
    ProgressChanged(UploadProgress),
    UploadFailed(String),
    BatchMismatch { submitted: usize, reported: usize },
}

struct QueueState {
    next_local_id: u64,
    pending: Vec<PendingFile>,
    uploaded: Vec<UploadedFile>,
    progress: UploadProgress,
    uploading: bool,
    last_reported: Vec<FileEntry>,
    progress_clear_task: Option<JoinHandle<()>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            next_local_id: 1,
            pending: Vec::new(),
            uploaded: Vec::new(),
            progress: UploadProgress::new(),
            uploading: false,
            last_reported: Vec::new(),
            progress_clear_task: None,
        }
    }

    fn enqueue(&mut self, file: NewFile) -> LocalFileId {
        let local_id = LocalFileId(self.next_local_id);
        self.next_local_id += 1;
        self.pending.push(PendingFile::new(local_id, file));
        local_id
    }

    /// Appends `file`, replacing an existing entry with the same identity.
    fn push_uploaded(&mut self, file: UploadedFile) {
        let existing = file.identity_key().and_then(|key| {
            self.uploaded
                .iter()
                .position(|uploaded| uploaded.identity_key() == Some(key))
        });
        match existing {
            Some(index) => {
                debug!(key = ?file.identity_key(), "replacing uploaded file with same identity");
                self.uploaded[index] = file;
            }
            None => self.uploaded.push(file),
        }
    }

    fn snapshot(&self) -> Vec<FileEntry> {
        self.uploaded
            .iter()
            .cloned()
            .map(FileEntry::Uploaded)
            .chain(
                self.pending
                    .iter()
                    .map(|file| FileEntry::Pending(file.summary())),
            )
            .collect()
    }
}

fn lock_state(inner: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pending/uploaded file bookkeeping for one upload widget.
///
/// Files are selected into a pending queue, sent as one batch per
/// [`UploadQueue::upload_pending`] call and promoted to the uploaded list when
/// the server confirms them. Listeners receive [`UploadEvent::FilesChanged`]
/// only when the combined view actually differs from the last one reported.
pub struct UploadQueue {
    transport: Arc<dyn UploadTransport>,
    target: UploadTarget,
    progress_clear_delay: Duration,
    inner: Arc<Mutex<QueueState>>,
    events: broadcast::Sender<UploadEvent>,
}

impl UploadQueue {
    pub fn new(transport: Arc<dyn UploadTransport>, target: UploadTarget) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            target,
            progress_clear_delay: DEFAULT_PROGRESS_CLEAR_DELAY,
            inner: Arc::new(Mutex::new(QueueState::new())),
            events,
        }
    }

    /// Builds a queue already holding `initial_files`. The returned receiver is
    /// subscribed before seeding, so it observes the seeded view.
    pub fn with_initial_files(
        transport: Arc<dyn UploadTransport>,
        target: UploadTarget,
        initial_files: Vec<FileDescriptor>,
    ) -> (Self, broadcast::Receiver<UploadEvent>) {
        let queue = Self::new(transport, target);
        let events = queue.subscribe_events();
        queue.set_initial_files(initial_files);
        (queue, events)
    }

    pub fn with_progress_clear_delay(mut self, delay: Duration) -> Self {
        self.progress_clear_delay = delay;
        self
    }

    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Replaces both lists from a caller-supplied seed. Entries carrying an
    /// identity or URL count as uploaded, the rest are queued again.
    ///
    /// A re-seeded pending entry keeps its local id when the entry at the same
    /// pending position is the same file.
    pub fn set_initial_files(&self, initial_files: Vec<FileDescriptor>) {
        let mut state = lock_state(&self.inner);
        let previous = std::mem::take(&mut state.pending);
        state.uploaded.clear();

        for descriptor in initial_files {
            match descriptor.into_seed() {
                Seed::Uploaded(file) => state.push_uploaded(file),
                Seed::Pending(file) => {
                    let reused = previous
                        .get(state.pending.len())
                        .filter(|existing| existing.is_same_file(&file))
                        .map(|existing| existing.local_id);
                    match reused {
                        Some(local_id) => state.pending.push(PendingFile::new(local_id, file)),
                        None => {
                            state.enqueue(file);
                        }
                    }
                }
            }
        }

        if !state.uploading && !state.progress.is_empty() {
            state.progress.clear();
            self.emit_progress(&state);
        }
        info!(
            uploaded = state.uploaded.len(),
            pending = state.pending.len(),
            "initialized upload queue"
        );
        self.notify_if_changed(&mut state);
    }

    pub fn add_files(&self, files: impl IntoIterator<Item = NewFile>) -> Vec<LocalFileId> {
        let mut state = lock_state(&self.inner);
        let ids: Vec<LocalFileId> = files.into_iter().map(|file| state.enqueue(file)).collect();
        debug!(added = ids.len(), pending = state.pending.len(), "queued files");
        self.notify_if_changed(&mut state);
        ids
    }

    /// Drops one entry from the local lists. Stored objects are left untouched.
    pub fn remove_file(&self, target: FileRef) -> bool {
        let mut state = lock_state(&self.inner);
        let removed = match &target {
            FileRef::Uploaded(key) => {
                let index = state.uploaded.iter().position(|file| file.matches_key(key));
                index.map(|index| state.uploaded.remove(index)).is_some()
            }
            FileRef::Pending(local_id) => {
                let index = state
                    .pending
                    .iter()
                    .position(|file| file.local_id == *local_id);
                if index.is_some() {
                    state.progress.remove(local_id);
                }
                index.map(|index| state.pending.remove(index)).is_some()
            }
        };

        if !removed {
            debug!(?target, "nothing to remove");
        }
        self.notify_if_changed(&mut state);
        removed
    }

    /// Sends every pending file in one request and promotes the batch on success.
    ///
    /// On failure the queue is left as it was so the caller can retry. Dropping
    /// the returned future cancels the request and restores the same state.
    pub async fn upload_pending(&self) -> Result<Vec<UploadedFile>, UploadError> {
        let batch = {
            let mut state = lock_state(&self.inner);
            if state.uploading {
                return Err(UploadError::UploadInProgress);
            }
            if state.pending.is_empty() {
                return Err(UploadError::NothingToUpload);
            }

            state.uploading = true;
            let batch = state.pending.clone();
            for file in &batch {
                state.progress.insert(file.local_id, PROGRESS_STARTED);
            }
            self.emit_progress(&state);
            batch
        };

        let batch_ids: Vec<LocalFileId> = batch.iter().map(|file| file.local_id).collect();
        let guard = InFlightGuard {
            inner: &self.inner,
            events: &self.events,
            batch_ids: &batch_ids,
            armed: true,
        };

        match self.send_batch(&batch).await {
            Ok(uploaded) => {
                guard.disarm();
                self.promote_batch(&batch_ids, &uploaded);
                Ok(uploaded)
            }
            Err(err) => {
                drop(guard);
                error!(batch_size = batch_ids.len(), error = %err, "upload batch failed");
                let _ = self.events.send(UploadEvent::UploadFailed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn send_batch(&self, batch: &[PendingFile]) -> Result<Vec<UploadedFile>, UploadError> {
        let mut files = Vec::with_capacity(batch.len());
        for pending in batch {
            files.push(BatchFile {
                local_id: pending.local_id,
                name: pending.name.clone(),
                mime_type: pending.mime_type.clone(),
                bytes: pending.source.read(&pending.name).await?,
            });
        }

        let response = self
            .transport
            .upload_batch(UploadBatch {
                target: self.target.clone(),
                files,
            })
            .await?;
        Ok(response.files)
    }

    fn promote_batch(&self, batch_ids: &[LocalFileId], uploaded: &[UploadedFile]) {
        let mut state = lock_state(&self.inner);
        state.uploading = false;

        let submitted: HashSet<LocalFileId> = batch_ids.iter().copied().collect();
        state
            .pending
            .retain(|file| !submitted.contains(&file.local_id));
        for file in uploaded {
            state.push_uploaded(file.clone());
        }
        for local_id in batch_ids {
            state.progress.insert(*local_id, PROGRESS_DONE);
        }
        self.emit_progress(&state);

        info!(
            submitted = batch_ids.len(),
            reported = uploaded.len(),
            pending = state.pending.len(),
            "upload batch completed"
        );
        if uploaded.len() != batch_ids.len() {
            warn!(
                submitted = batch_ids.len(),
                reported = uploaded.len(),
                "server reported a different number of files than submitted"
            );
            let _ = self.events.send(UploadEvent::BatchMismatch {
                submitted: batch_ids.len(),
                reported: uploaded.len(),
            });
        }

        self.notify_if_changed(&mut state);
        self.schedule_progress_clear(&mut state);
    }

    fn schedule_progress_clear(&self, state: &mut QueueState) {
        if let Some(task) = state.progress_clear_task.take() {
            task.abort();
        }

        let inner: Weak<Mutex<QueueState>> = Arc::downgrade(&self.inner);
        let events = self.events.clone();
        let delay = self.progress_clear_delay;
        state.progress_clear_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut state = lock_state(&inner);
            state.progress_clear_task = None;
            if state.progress.is_empty() {
                return;
            }
            state.progress.clear();
            let _ = events.send(UploadEvent::ProgressChanged(UploadProgress::new()));
        }));
    }

    fn emit_progress(&self, state: &QueueState) {
        let _ = self
            .events
            .send(UploadEvent::ProgressChanged(state.progress.clone()));
    }

    fn notify_if_changed(&self, state: &mut QueueState) {
        let snapshot = state.snapshot();
        if snapshot == state.last_reported {
            return;
        }
        // Only a delivered view counts as reported.
        if self
            .events
            .send(UploadEvent::FilesChanged(snapshot.clone()))
            .is_ok()
        {
            state.last_reported = snapshot;
        }
    }

    pub fn snapshot(&self) -> Vec<FileEntry> {
        lock_state(&self.inner).snapshot()
    }

    pub fn pending(&self) -> Vec<PendingSummary> {
        lock_state(&self.inner)
            .pending
            .iter()
            .map(PendingFile::summary)
            .collect()
    }

    pub fn uploaded(&self) -> Vec<UploadedFile> {
        lock_state(&self.inner).uploaded.clone()
    }

    pub fn progress(&self) -> UploadProgress {
        lock_state(&self.inner).progress.clone()
    }

    pub fn is_uploading(&self) -> bool {
        lock_state(&self.inner).uploading
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        if let Some(task) = lock_state(&self.inner).progress_clear_task.take() {
            task.abort();
        }
    }
}

/// Restores the queue when an upload fails or its future is dropped mid-flight.
struct InFlightGuard<'a> {
    inner: &'a Mutex<QueueState>,
    events: &'a broadcast::Sender<UploadEvent>,
    batch_ids: &'a [LocalFileId],
    armed: bool,
}

impl InFlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = lock_state(self.inner);
        state.uploading = false;
        for local_id in self.batch_ids {
            if let Some(progress) = state.progress.get_mut(local_id) {
                *progress = PROGRESS_STARTED;
            }
        }
        let _ = self
            .events
            .send(UploadEvent::ProgressChanged(state.progress.clone()));
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
