use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use linkgrab_core::core::events::{
    Delivery, HistoryRecorder, HostingUploader, RequesterId, StatusControls, StatusSink,
    StatusUpdate, TaskId, TaskState,
};
use linkgrab_core::models::media::{MediaKind, ProgressEvent};
use linkgrab_core::models::settings::Settings;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::cache::CacheStore;
use crate::core::direct_downloader::probe_content_length;
use crate::core::disk;
use crate::core::error::{ErrorKind, FetchError, FetchResult};
use crate::core::progress::{render_status, ProgressThrottle, ProgressTracker};
use crate::core::registry::BackendRegistry;
use crate::core::retry::RetryLinks;
use crate::core::url_parser::classify_url;
use crate::platforms::traits::DownloadRequest;

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_per_requester: usize,
    pub transfer_timeout: Duration,
    pub progress_interval: Duration,
    pub disk_floor_bytes: u64,
    /// HEAD `Content-Length` ceiling; `None` skips the probe.
    pub max_remote_size_bytes: Option<u64>,
    pub oversize_threshold_bytes: u64,
    pub work_dir: PathBuf,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let max_remote = settings.scheduler.max_remote_size_bytes();
        Self {
            max_concurrent_per_requester: settings.scheduler.max_concurrent_per_requester,
            transfer_timeout: settings.scheduler.transfer_timeout(),
            progress_interval: settings.scheduler.progress_interval(),
            disk_floor_bytes: settings.scheduler.disk_floor_bytes(),
            max_remote_size_bytes: (max_remote > 0).then_some(max_remote),
            oversize_threshold_bytes: settings.delivery.oversize_threshold_bytes(),
            work_dir: settings.work_dir.clone(),
        }
    }
}

/// Collaborators an execution unit talks to.
pub struct SchedulerDeps {
    pub cache: Arc<CacheStore>,
    pub registry: Arc<BackendRegistry>,
    pub sink: Arc<dyn StatusSink>,
    pub hosting: Arc<dyn HostingUploader>,
    pub history: Arc<dyn HistoryRecorder>,
    pub retry_links: RetryLinks,
    pub http: reqwest::Client,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("scheduler is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
    NotOwner,
    /// Already saving, delivering or finished.
    NotCancellable,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub requester: RequesterId,
    pub url: String,
    pub kind: MediaKind,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

struct QueueItem {
    task_id: TaskId,
    requester: RequesterId,
    url: String,
    kind: MediaKind,
}

struct TaskRecord {
    requester: RequesterId,
    url: String,
    kind: MediaKind,
    state: TaskState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, TaskRecord>,
    admissions: HashMap<RequesterId, HashSet<TaskId>>,
    running: usize,
}

struct Inner {
    config: SchedulerConfig,
    deps: SchedulerDeps,
    state: Mutex<SchedulerState>,
    ingress: Mutex<Option<mpsc::UnboundedSender<QueueItem>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves a live task to `state`. Returns false once the task was
    /// cancelled or is gone, in which case the caller must stop.
    fn advance(&self, task_id: TaskId, state: TaskState) -> bool {
        let mut st = self.lock_state();
        match st.tasks.get_mut(&task_id) {
            Some(task) if !task.state.is_terminal() && !task.cancel.is_cancelled() => {
                task.state = state;
                true
            }
            _ => false,
        }
    }

    fn set_terminal(&self, task_id: TaskId, state: TaskState) {
        if let Some(task) = self.lock_state().tasks.get_mut(&task_id) {
            task.state = state;
        }
    }
}

/// Frees the requester's slot and the task index entry, including when the
/// execution unit unwinds.
struct AdmissionGuard {
    inner: Arc<Inner>,
    requester: RequesterId,
    task_id: TaskId,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        let mut st = self.inner.lock_state();
        let now_empty = match st.admissions.get_mut(&self.requester) {
            Some(active) => {
                active.remove(&self.task_id);
                active.is_empty()
            }
            None => false,
        };
        if now_empty {
            st.admissions.remove(&self.requester);
        }
        st.running = st.running.saturating_sub(1);
        st.tasks.remove(&self.task_id);
    }
}

enum Admission {
    Admitted(CancellationToken),
    Rejected(usize),
    Cancelled,
}

enum Outcome {
    Delivered { from_cache: bool },
    Oversize { link: Option<String> },
    Cancelled,
    /// Cached copy could not be delivered; fetch it again as a new task.
    Requeue,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Starts the admission loop. The returned handle completes after
    /// [`Scheduler::shutdown`] once the ingress queue is drained.
    pub fn start(config: SchedulerConfig, deps: SchedulerDeps) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            inner: Arc::new(Inner {
                config,
                deps,
                state: Mutex::new(SchedulerState::default()),
                ingress: Mutex::new(Some(tx)),
                next_id: AtomicU64::new(1),
            }),
        };
        let consumer = tokio::spawn(scheduler.clone().consume(rx));
        (scheduler, consumer)
    }

    /// Enqueues a download. Never blocks; admission happens on the consumer.
    pub fn submit(
        &self,
        requester: RequesterId,
        url: impl Into<String>,
        kind: MediaKind,
    ) -> Result<TaskId, SubmitError> {
        let url = url.into();
        let ingress = self.inner.ingress.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = ingress.as_ref() else {
            return Err(SubmitError::Closed);
        };

        let task_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock_state().tasks.insert(
            task_id,
            TaskRecord {
                requester,
                url: url.clone(),
                kind,
                state: TaskState::Queued,
                created_at: Utc::now(),
                started_at: None,
                cancel: CancellationToken::new(),
            },
        );

        let item = QueueItem {
            task_id,
            requester,
            url,
            kind,
        };
        if tx.send(item).is_err() {
            self.inner.lock_state().tasks.remove(&task_id);
            return Err(SubmitError::Closed);
        }
        tracing::debug!("[queue] task #{} queued for requester {}", task_id, requester);
        Ok(task_id)
    }

    pub fn cancel(&self, requester: RequesterId, task_id: TaskId) -> CancelOutcome {
        let mut st = self.inner.lock_state();
        let Some(task) = st.tasks.get_mut(&task_id) else {
            return CancelOutcome::NotFound;
        };
        if task.requester != requester {
            return CancelOutcome::NotOwner;
        }
        match task.state {
            TaskState::Queued
            | TaskState::Admitted
            | TaskState::ResolvingCache
            | TaskState::Downloading => {
                task.cancel.cancel();
                task.state = TaskState::Cancelled;
                tracing::info!("[queue] task #{} cancelled by requester {}", task_id, requester);
                CancelOutcome::Cancelled
            }
            _ => CancelOutcome::NotCancellable,
        }
    }

    pub fn running(&self) -> usize {
        self.inner.lock_state().running
    }

    pub fn active_for(&self, requester: RequesterId) -> Vec<TaskId> {
        let st = self.inner.lock_state();
        let mut ids: Vec<TaskId> = st
            .admissions
            .get(&requester)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let st = self.inner.lock_state();
        let mut tasks: Vec<TaskSnapshot> = st
            .tasks
            .iter()
            .map(|(id, t)| TaskSnapshot {
                id: *id,
                requester: t.requester,
                url: t.url.clone(),
                kind: t.kind,
                state: t.state.clone(),
                created_at: t.created_at,
                started_at: t.started_at,
            })
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Closes the ingress. Queued items are still admitted and in-flight
    /// units run to completion.
    pub fn shutdown(&self) {
        let taken = self
            .inner
            .ingress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if taken.is_some() {
            tracing::info!("[queue] ingress closed");
        }
    }

    async fn consume(self, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
        tracing::info!(
            "[queue] consumer started (max {} per requester)",
            self.inner.config.max_concurrent_per_requester
        );
        while let Some(item) = rx.recv().await {
            self.admit(item).await;
        }
        tracing::info!("[queue] consumer stopped");
    }

    async fn admit(&self, item: QueueItem) {
        if url::Url::parse(&item.url).is_err() {
            tracing::warn!("[queue] skipping malformed item #{}: {:?}", item.task_id, item.url);
            self.inner.lock_state().tasks.remove(&item.task_id);
            return;
        }

        let cap = self.inner.config.max_concurrent_per_requester;
        let decision = {
            let mut st = self.inner.lock_state();
            let token = st.tasks.get(&item.task_id).map(|t| t.cancel.clone());
            match token {
                Some(token) if !token.is_cancelled() => {
                    let active = st.admissions.get(&item.requester).map(HashSet::len).unwrap_or(0);
                    if active >= cap {
                        st.tasks.remove(&item.task_id);
                        Admission::Rejected(active)
                    } else {
                        st.admissions
                            .entry(item.requester)
                            .or_default()
                            .insert(item.task_id);
                        st.running += 1;
                        if let Some(task) = st.tasks.get_mut(&item.task_id) {
                            task.state = TaskState::Admitted;
                            task.started_at = Some(Utc::now());
                        }
                        Admission::Admitted(token)
                    }
                }
                _ => {
                    st.tasks.remove(&item.task_id);
                    Admission::Cancelled
                }
            }
        };

        match decision {
            Admission::Rejected(active) => {
                tracing::info!(
                    "[queue] task #{} rejected: requester {} has {} active",
                    item.task_id,
                    item.requester,
                    active
                );
                self.inner
                    .deps
                    .sink
                    .on_status(StatusUpdate {
                        task_id: item.task_id,
                        requester: item.requester,
                        text: format!(
                            "⚠️ Download limit reached: {} of {} downloads already running. Wait for one to finish and try again.",
                            active, cap
                        ),
                        controls: None,
                        terminal: true,
                    })
                    .await;
            }
            Admission::Cancelled => {
                self.inner
                    .deps
                    .sink
                    .on_status(StatusUpdate {
                        task_id: item.task_id,
                        requester: item.requester,
                        text: "⏹️ Download cancelled".to_string(),
                        controls: None,
                        terminal: true,
                    })
                    .await;
            }
            Admission::Admitted(cancel) => {
                tracing::info!(
                    "[queue] task #{} admitted for requester {}: {} ({})",
                    item.task_id,
                    item.requester,
                    item.url,
                    item.kind
                );
                let guard = AdmissionGuard {
                    inner: self.inner.clone(),
                    requester: item.requester,
                    task_id: item.task_id,
                };
                let unit = TaskUnit {
                    inner: self.inner.clone(),
                    task_id: item.task_id,
                    requester: item.requester,
                    url: item.url,
                    kind: item.kind,
                    cancel,
                };
                tokio::spawn(unit.run(guard));
            }
        }
    }
}

fn platform_label(url: &str) -> &'static str {
    classify_url(url).map(|p| p.label()).unwrap_or("link")
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn close_workdir(dir: tempfile::TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        tracing::warn!("[queue] failed to remove work dir {}: {}", path.display(), e);
    }
}

/// One admitted task, running on its own tokio task.
struct TaskUnit {
    inner: Arc<Inner>,
    task_id: TaskId,
    requester: RequesterId,
    url: String,
    kind: MediaKind,
    cancel: CancellationToken,
}

impl TaskUnit {
    async fn run(self, guard: AdmissionGuard) {
        let outcome = match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!("[queue] task #{} panicked: {}", self.task_id, msg);
                Err(FetchError::internal(format!("task panicked: {}", msg)))
            }
        };

        let (state, update) = self.terminal_update(&outcome);
        self.inner.set_terminal(self.task_id, state);
        drop(guard);

        let update = match outcome {
            Ok(Outcome::Requeue) => {
                let scheduler = Scheduler {
                    inner: self.inner.clone(),
                };
                match scheduler.submit(self.requester, self.url.clone(), self.kind) {
                    Ok(new_id) => StatusUpdate {
                        text: format!("♻️ Cached copy was unusable, downloading again as #{}", new_id),
                        ..update
                    },
                    Err(e) => {
                        tracing::warn!("[queue] could not requeue task #{}: {}", self.task_id, e);
                        update
                    }
                }
            }
            _ => update,
        };
        self.inner.deps.sink.on_status(update).await;
    }

    fn terminal_update(&self, outcome: &FetchResult<Outcome>) -> (TaskState, StatusUpdate) {
        let label = platform_label(&self.url);
        let summary = format!("{} · {}", label, self.url);
        let retry = || StatusControls::Retry {
            retry_id: self.inner.deps.retry_links.store(&self.url, self.kind),
            kind: self.kind,
        };

        let (state, text, controls) = match outcome {
            Ok(Outcome::Delivered { from_cache }) => {
                tracing::info!("[queue] task #{} done (cache: {})", self.task_id, from_cache);
                let origin = if *from_cache { " (from cache)" } else { "" };
                (
                    TaskState::Done,
                    format!("✅ Done{}\n{}", origin, summary),
                    Some(retry()),
                )
            }
            Ok(Outcome::Oversize { link }) => {
                tracing::info!("[queue] task #{} done, oversize", self.task_id);
                let note = if link.is_some() {
                    "file is too large to attach, a download link was sent"
                } else {
                    "file is too large to attach and no hosting link is available"
                };
                (
                    TaskState::Done,
                    format!("✅ Done, {}\n{}", note, summary),
                    Some(retry()),
                )
            }
            Ok(Outcome::Cancelled) => (
                TaskState::Cancelled,
                format!("⏹️ Download cancelled\n{}", summary),
                None,
            ),
            Ok(Outcome::Requeue) => (
                TaskState::Cancelled,
                format!("♻️ Cached copy was unusable\n{}", summary),
                None,
            ),
            Err(e) => {
                tracing::error!("[queue] task #{} failed ({}): {}", self.task_id, e.kind, e.message);
                let controls = e.kind.is_retryable().then(retry);
                (
                    TaskState::Failed {
                        kind: e.kind.id().to_string(),
                    },
                    format!("{}\n{}\n{}", e.kind.title(), e.kind.hint(), summary),
                    controls,
                )
            }
        };

        (
            state,
            StatusUpdate {
                task_id: self.task_id,
                requester: self.requester,
                text,
                controls,
                terminal: true,
            },
        )
    }

    async fn status(&self, text: String, controls: Option<StatusControls>) {
        self.inner
            .deps
            .sink
            .on_status(StatusUpdate {
                task_id: self.task_id,
                requester: self.requester,
                text,
                controls,
                terminal: false,
            })
            .await;
    }

    fn record_history(&self) {
        let history = self.inner.deps.history.clone();
        let (requester, url, kind) = (self.requester, self.url.clone(), self.kind);
        tokio::spawn(async move {
            if let Err(e) = history.record(requester, &url, kind).await {
                tracing::warn!("[queue] history record failed for {}: {}", url, e);
            }
        });
    }

    async fn execute(&self) -> FetchResult<Outcome> {
        let deps = &self.inner.deps;
        let config = &self.inner.config;

        if !self.inner.advance(self.task_id, TaskState::ResolvingCache) {
            return Ok(Outcome::Cancelled);
        }

        if let Some(cached) = deps.cache.lookup(&self.url, self.kind).await {
            if !self.inner.advance(self.task_id, TaskState::Delivering) {
                return Ok(Outcome::Cancelled);
            }
            self.status("📦 Found in cache, sending...".to_string(), None).await;
            return match self.deliver(&cached, true).await {
                Ok(outcome) => {
                    self.record_history();
                    Ok(outcome)
                }
                Err(e) => {
                    tracing::warn!(
                        "[queue] cached delivery failed for task #{}: {}",
                        self.task_id,
                        e
                    );
                    if let Err(e) = deps.cache.invalidate(&cached).await {
                        tracing::warn!("[queue] cache invalidation failed: {}", e);
                    }
                    Ok(Outcome::Requeue)
                }
            };
        }

        tokio::fs::create_dir_all(&config.work_dir).await?;
        if !disk::has_free_space(&config.work_dir, config.disk_floor_bytes) {
            return Err(FetchError::new(
                ErrorKind::DiskExhausted,
                format!(
                    "less than {} MB free under {}",
                    config.disk_floor_bytes / (1024 * 1024),
                    config.work_dir.display()
                ),
            ));
        }

        if let Some(limit) = config.max_remote_size_bytes {
            if let Some(len) = probe_content_length(&deps.http, &self.url).await {
                if len > limit {
                    return Err(FetchError::new(
                        ErrorKind::FileTooLarge,
                        format!("remote size {} bytes exceeds {} bytes", len, limit),
                    ));
                }
            }
        }

        let backend = deps
            .registry
            .find_backend(&self.url)
            .ok_or_else(|| FetchError::unsupported(format!("no backend for {}", self.url)))?;

        let work_dir = tempfile::Builder::new()
            .prefix(&format!("task-{}-", self.task_id))
            .tempdir_in(&config.work_dir)?;

        if !self.inner.advance(self.task_id, TaskState::Downloading) {
            close_workdir(work_dir);
            return Ok(Outcome::Cancelled);
        }

        let label = platform_label(&self.url);
        tracing::info!(
            "[queue] task #{} downloading via {} into {}",
            self.task_id,
            backend.name(),
            work_dir.path().display()
        );
        self.status(
            format!("⏳ Starting download from {}...", label),
            Some(StatusControls::Transfer {
                task_id: self.task_id,
            }),
        )
        .await;

        let (tx, rx) = mpsc::channel::<ProgressEvent>(PROGRESS_CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(forward_progress(
            deps.sink.clone(),
            self.task_id,
            self.requester,
            label,
            config.progress_interval,
            rx,
        ));

        let request = DownloadRequest {
            url: self.url.clone(),
            kind: self.kind,
            work_dir: work_dir.path().to_path_buf(),
        };

        let transfer = tokio::select! {
            r = tokio::time::timeout(config.transfer_timeout, backend.download(&request, tx)) => {
                Some(r.unwrap_or_else(|_| {
                    Err(FetchError::new(
                        ErrorKind::Timeout,
                        format!("transfer exceeded {} s", config.transfer_timeout.as_secs()),
                    ))
                }))
            }
            _ = self.cancel.cancelled() => None,
        };

        forwarder.abort();
        let _ = forwarder.await;

        let downloaded = match transfer {
            None => {
                close_workdir(work_dir);
                return Ok(Outcome::Cancelled);
            }
            Some(Err(e)) => {
                close_workdir(work_dir);
                return Err(e);
            }
            Some(Ok(d)) => d,
        };

        if !self.inner.advance(self.task_id, TaskState::Saving) {
            close_workdir(work_dir);
            return Ok(Outcome::Cancelled);
        }

        let deliver_path = match deps.cache.insert(&self.url, self.kind, &downloaded.file_path).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("[queue] cache insert failed for {}: {}", self.url, e);
                downloaded.file_path.clone()
            }
        };

        self.inner.advance(self.task_id, TaskState::Delivering);
        let outcome = self.deliver(&deliver_path, false).await;
        close_workdir(work_dir);

        if outcome.is_ok() {
            self.record_history();
        }
        outcome
    }

    async fn deliver(&self, path: &Path, from_cache: bool) -> FetchResult<Outcome> {
        let deps = &self.inner.deps;
        let size = tokio::fs::metadata(path).await?.len();

        if size > self.inner.config.oversize_threshold_bytes {
            tracing::info!(
                "[queue] task #{} file is {} bytes, above delivery limit",
                self.task_id,
                size
            );
            let link = match deps.hosting.upload(path).await {
                Ok(link) => link,
                Err(e) => {
                    tracing::warn!("[queue] hosting upload failed for {}: {}", path.display(), e);
                    None
                }
            };
            deps.sink
                .on_oversize(self.task_id, self.requester, link.clone())
                .await;
            return Ok(Outcome::Oversize { link });
        }

        let delivery = Delivery {
            task_id: self.task_id,
            requester: self.requester,
            file_path: path.to_path_buf(),
            kind: self.kind,
            caption: format!("{} · {}", platform_label(&self.url), self.url),
            from_cache,
        };
        deps.sink
            .on_complete(&delivery)
            .await
            .map_err(|e| FetchError::internal(format!("delivery failed: {:#}", e)))?;
        Ok(Outcome::Delivered { from_cache })
    }
}

async fn forward_progress(
    sink: Arc<dyn StatusSink>,
    task_id: TaskId,
    requester: RequesterId,
    label: &'static str,
    interval: Duration,
    mut rx: mpsc::Receiver<ProgressEvent>,
) {
    let mut tracker = ProgressTracker::new();
    // The "starting download" status was just sent.
    let mut throttle = ProgressThrottle::just_emitted(interval);

    while let Some(event) = rx.recv().await {
        let snap = tracker.observe(&event);
        if !throttle.should_emit() {
            continue;
        }
        sink.on_status(StatusUpdate {
            task_id,
            requester,
            text: render_status(label, &snap),
            controls: Some(StatusControls::Transfer { task_id }),
            terminal: false,
        })
        .await;
    }
}
