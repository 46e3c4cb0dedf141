use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::fs;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::engine::{EngineError, Interrupt, MediaEngine, MediaInfo, ProgressEvent};
use super::options::{InvocationDescriptor, OptionsBuilder};
use super::progress::{AttemptOutcome, TaskUpdate, UpdateKind};
use super::task::{Applied, Attempt, DownloadTask, TaskError, TaskSnapshot, TaskState};
use super::{FormatSelector, TaskId};
use crate::config::Config;
use crate::logging::LogSink;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The user chose not to create the download folder.
    #[error("download folder {0:?} does not exist and was not created")]
    DirectoryDeclined(PathBuf),

    #[error("could not create directory {path:?}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no task with id {0}")]
    UnknownTask(TaskId),

    #[error("task {id} is {state}; only finished, cancelled or failed tasks can be removed")]
    NotRemovable { id: TaskId, state: TaskState },

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("could not get media info: {0}")]
    Engine(#[from] EngineError),
}

/// Outcome of the download folder pre-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    Exists,
    Created,
    Declined,
}

/// Resolves metadata without borrowing the manager.
#[derive(Clone)]
pub struct InfoFetcher {
    engine: Arc<dyn MediaEngine>,
    descriptor: InvocationDescriptor,
    sink: Arc<LogSink>,
}

impl InfoFetcher {
    pub async fn fetch(&self, url: &str) -> Result<MediaInfo, ManagerError> {
        self.sink.info(format!("--- Getting info for: {} ---", url));

        match self.engine.resolve_metadata(url, &self.descriptor).await {
            Ok(mut info) => {
                info.original_url = url.to_string();
                Ok(info)
            }
            Err(e) => {
                self.sink
                    .error(format!("Could not get media info for {}: {}", url, e));
                Err(e.into())
            }
        }
    }
}

/// Owns every task and is the only place task state changes.
///
/// Execution attempts run as tokio tasks and report back through an
/// update channel drained by [`TaskManager::process_updates`].
pub struct TaskManager {
    engine: Arc<dyn MediaEngine>,
    config: Config,
    options: OptionsBuilder,
    sink: Arc<LogSink>,
    tasks: BTreeMap<TaskId, DownloadTask>,
    next_id: u64,
    updates_tx: mpsc::UnboundedSender<TaskUpdate>,
    updates_rx: mpsc::UnboundedReceiver<TaskUpdate>,
}

impl TaskManager {
    pub fn new(engine: Arc<dyn MediaEngine>, config: Config) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        Self {
            engine,
            config,
            options: OptionsBuilder::new(),
            sink: LogSink::global(),
            tasks: BTreeMap::new(),
            next_id: 1,
            updates_tx,
            updates_rx,
        }
    }

    pub fn with_log_sink(mut self, sink: Arc<LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_options(mut self, options: OptionsBuilder) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> &OptionsBuilder {
        &self.options
    }

    pub fn log_sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    pub fn download_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.general.download_dir)
    }

    pub fn info_fetcher(&self) -> InfoFetcher {
        InfoFetcher {
            engine: Arc::clone(&self.engine),
            descriptor: self.options.metadata(&self.config),
            sink: Arc::clone(&self.sink),
        }
    }

    pub async fn fetch_info(&self, url: &str) -> Result<MediaInfo, ManagerError> {
        self.info_fetcher().fetch(url).await
    }

    /// Make sure the download folder exists, asking `confirm` before
    /// creating it.
    pub fn check_output_dir<F>(&self, confirm: F) -> Result<DirectoryStatus, ManagerError>
    where
        F: FnOnce(&Path) -> bool,
    {
        let dir = self.download_dir();
        if dir.is_dir() {
            return Ok(DirectoryStatus::Exists);
        }

        if !confirm(&dir) {
            debug!("Creation of {} declined", dir.display());
            return Ok(DirectoryStatus::Declined);
        }

        fs::create_dir_all(&dir).map_err(|source| ManagerError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;
        self.sink
            .info(format!("Created download directory: {}", dir.display()));

        Ok(DirectoryStatus::Created)
    }

    /// Queue a new task and start it right away.
    pub fn create_task<F>(
        &mut self,
        url: &str,
        selector: FormatSelector,
        info: MediaInfo,
        confirm: F,
    ) -> Result<TaskId, ManagerError>
    where
        F: FnOnce(&Path) -> bool,
    {
        if self.check_output_dir(confirm)? == DirectoryStatus::Declined {
            // A user choice, not a failure.
            self.sink.info(format!(
                "Skipped {}: download folder was not created",
                url
            ));
            return Err(ManagerError::DirectoryDeclined(self.download_dir()));
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks
            .insert(id, DownloadTask::new(id, url.to_string(), selector, info));

        self.start_or_resume(id)?;
        Ok(id)
    }

    /// Spawn exactly one execution attempt for a queued, paused or
    /// resuming task.
    pub fn start_or_resume(&mut self, id: TaskId) -> Result<(), ManagerError> {
        let attempt = self.task_mut(id)?.begin_attempt()?;
        let descriptor = self.options.transfer(&self.config, &attempt.selector);

        self.sink.info(format!(
            "--- Starting/Resuming download for: {} ---",
            attempt.url
        ));
        debug!(
            "Task {} attempt {} with format {}",
            id, attempt.generation, attempt.selector
        );

        let handle = tokio::spawn(run_attempt(
            Arc::clone(&self.engine),
            descriptor,
            attempt,
            self.updates_tx.clone(),
        ));
        self.task_mut(id)?.set_handle(handle);

        Ok(())
    }

    pub fn pause(&mut self, id: TaskId) -> Result<(), ManagerError> {
        let task = self.task_mut(id)?;
        task.request_pause()?;
        let url = task.url().to_string();
        self.sink.info(format!("Pausing download for {}", url));
        Ok(())
    }

    pub fn resume(&mut self, id: TaskId) -> Result<(), ManagerError> {
        self.task_mut(id)?.request_resume()?;
        self.start_or_resume(id)
    }

    pub fn cancel(&mut self, id: TaskId) -> Result<(), ManagerError> {
        let task = self.task_mut(id)?;
        task.request_cancel()?;
        let url = task.url().to_string();
        self.sink.info(format!("Download cancelled for {}", url));
        Ok(())
    }

    /// Dismiss a task that has reached a terminal state.
    pub fn remove(&mut self, id: TaskId) -> Result<TaskSnapshot, ManagerError> {
        let state = self.task(id)?.state();
        if !state.is_terminal() {
            return Err(ManagerError::NotRemovable { id, state });
        }

        let task = self
            .tasks
            .remove(&id)
            .ok_or(ManagerError::UnknownTask(id))?;
        Ok(task.snapshot())
    }

    /// Ask every downloading task to pause. Returns how many were asked.
    pub fn pause_all(&mut self) -> usize {
        let ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.state() == TaskState::Downloading)
            .map(DownloadTask::id)
            .collect();

        ids.into_iter().filter(|id| self.pause(*id).is_ok()).count()
    }

    /// Apply every update already queued, without waiting.
    pub fn process_updates(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.updates_rx.try_recv() {
            if self.apply_update(update) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait until at least one update changes a task, or until nothing is
    /// left running.
    pub async fn wait_for_update(&mut self) -> usize {
        loop {
            let applied = self.process_updates();
            if applied > 0 || !self.has_running_attempts() {
                return applied;
            }

            match self.updates_rx.recv().await {
                Some(update) => {
                    if self.apply_update(update) {
                        return 1 + self.process_updates();
                    }
                }
                None => return 0,
            }
        }
    }

    /// Drive updates until every attempt has ended.
    pub async fn run_until_idle(&mut self) {
        while self.has_running_attempts() {
            self.wait_for_update().await;
        }
        self.process_updates();
    }

    pub fn task(&self, id: TaskId) -> Result<&DownloadTask, ManagerError> {
        self.tasks.get(&id).ok_or(ManagerError::UnknownTask(id))
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut DownloadTask, ManagerError> {
        self.tasks.get_mut(&id).ok_or(ManagerError::UnknownTask(id))
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.tasks.get(&id).map(DownloadTask::snapshot)
    }

    /// All tasks in creation order.
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.tasks.values().map(DownloadTask::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn has_active(&self) -> bool {
        self.tasks.values().any(|t| t.state().is_active())
    }

    fn has_running_attempts(&self) -> bool {
        self.tasks.values().any(DownloadTask::has_handle)
    }

    fn apply_update(&mut self, update: TaskUpdate) -> bool {
        let Some(task) = self.tasks.get_mut(&update.id) else {
            debug!("Dropping update for removed task {}", update.id);
            return false;
        };

        match task.apply(&update) {
            Applied::Stale => {
                debug!(
                    "Ignoring stale update for task {} (generation {}, current {})",
                    update.id,
                    update.generation,
                    task.generation()
                );
                false
            }
            Applied::Ignored => false,
            Applied::Progress => true,
            Applied::Transition(state) => {
                match state {
                    TaskState::Paused => self
                        .sink
                        .info(format!("Download paused for {}", task.url())),
                    TaskState::Finished => self.sink.info(format!(
                        "Download finished: {}",
                        task.info().display_title()
                    )),
                    TaskState::Error => self.sink.error(format!(
                        "--- DOWNLOAD FAILED FOR: {} --- {}",
                        task.url(),
                        task.error().unwrap_or("unknown error")
                    )),
                    _ => {}
                }
                true
            }
        }
    }
}

/// Body of one execution thread: run the transfer, then report how it
/// ended. Every effect goes through `updates`.
async fn run_attempt(
    engine: Arc<dyn MediaEngine>,
    descriptor: InvocationDescriptor,
    attempt: Attempt,
    updates: mpsc::UnboundedSender<TaskUpdate>,
) {
    let Attempt {
        id,
        generation,
        url,
        signal,
        ..
    } = attempt;

    let progress_tx = updates.clone();
    let mut on_progress = move |event: &ProgressEvent| -> Result<(), Interrupt> {
        // Must fail before returning so the engine stops writing.
        signal.check()?;
        let _ = progress_tx.send(TaskUpdate {
            id,
            generation,
            kind: UpdateKind::Progress(event.clone()),
        });
        Ok(())
    };

    let transfer = engine.transfer(&url, &descriptor, &mut on_progress);
    let outcome = match AssertUnwindSafe(transfer).catch_unwind().await {
        Ok(result) => AttemptOutcome::from(result),
        Err(_) => AttemptOutcome::Failed("media engine panicked".to_string()),
    };

    let _ = updates.send(TaskUpdate {
        id,
        generation,
        kind: UpdateKind::Ended(outcome),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::engine::ProgressCallback;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Completes every transfer after one half-way tick.
    struct InstantEngine;

    #[async_trait]
    impl MediaEngine for InstantEngine {
        async fn resolve_metadata(
            &self,
            url: &str,
            _descriptor: &InvocationDescriptor,
        ) -> Result<MediaInfo, EngineError> {
            if url.contains("missing") {
                return Err(EngineError::Failed("Video unavailable".into()));
            }
            Ok(MediaInfo {
                title: "Instant".into(),
                ..Default::default()
            })
        }

        async fn transfer(
            &self,
            _url: &str,
            descriptor: &InvocationDescriptor,
            on_progress: &mut ProgressCallback<'_>,
        ) -> Result<(), EngineError> {
            assert!(descriptor.is_transfer());
            on_progress(&ProgressEvent::Downloading {
                downloaded_bytes: 50,
                total_bytes: Some(100),
                speed: None,
            })?;
            Ok(())
        }
    }

    struct PanickingEngine;

    #[async_trait]
    impl MediaEngine for PanickingEngine {
        async fn resolve_metadata(
            &self,
            _url: &str,
            _descriptor: &InvocationDescriptor,
        ) -> Result<MediaInfo, EngineError> {
            Ok(MediaInfo::default())
        }

        async fn transfer(
            &self,
            _url: &str,
            _descriptor: &InvocationDescriptor,
            _on_progress: &mut ProgressCallback<'_>,
        ) -> Result<(), EngineError> {
            panic!("engine bug");
        }
    }

    fn manager_with(engine: Arc<dyn MediaEngine>, dir: &Path) -> (TaskManager, Arc<LogSink>) {
        let mut config = Config::default();
        config.general.download_dir = dir.to_string_lossy().into_owned();
        let sink = Arc::new(LogSink::new());
        let manager = TaskManager::new(engine, config)
            .with_options(OptionsBuilder::default())
            .with_log_sink(Arc::clone(&sink));
        (manager, sink)
    }

    #[tokio::test]
    async fn existing_directory_needs_no_confirmation() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager_with(Arc::new(InstantEngine), dir.path());

        let status = manager
            .check_output_dir(|_| panic!("should not ask"))
            .unwrap();
        assert_eq!(status, DirectoryStatus::Exists);
    }

    #[tokio::test]
    async fn missing_directory_is_created_on_confirmation() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("videos");
        let (manager, sink) = manager_with(Arc::new(InstantEngine), &target);

        let mut asked = None;
        let status = manager
            .check_output_dir(|path| {
                asked = Some(path.to_path_buf());
                true
            })
            .unwrap();

        assert_eq!(status, DirectoryStatus::Created);
        assert_eq!(asked.as_deref(), Some(target.as_path()));
        assert!(target.is_dir());
        assert!(sink.drain_all()[0].message.starts_with("Created download directory"));
    }

    #[tokio::test]
    async fn instant_transfer_finishes() {
        let dir = TempDir::new().unwrap();
        let (mut manager, sink) = manager_with(Arc::new(InstantEngine), dir.path());

        let id = manager
            .create_task("https://example.com/a", FormatSelector::new("best"), MediaInfo::default(), |_| true)
            .unwrap();
        assert_eq!(manager.task(id).unwrap().state(), TaskState::Downloading);

        manager.run_until_idle().await;

        let snapshot = manager.snapshot(id).unwrap();
        assert_eq!(snapshot.state, TaskState::Finished);
        assert_eq!(snapshot.progress, 100.0);
        assert!(!manager.has_active());

        let messages: Vec<_> = sink.drain_all().into_iter().map(|e| e.message).collect();
        assert!(messages.iter().any(|m| m.starts_with("--- Starting/Resuming download for: https://example.com/a")));
        assert!(messages.iter().any(|m| m == "Download finished: Unknown"));
    }

    #[tokio::test]
    async fn engine_panic_is_contained_to_its_task() {
        let dir = TempDir::new().unwrap();
        let (mut manager, _) = manager_with(Arc::new(PanickingEngine), dir.path());

        let id = manager
            .create_task("https://example.com/p", FormatSelector::new("best"), MediaInfo::default(), |_| true)
            .unwrap();
        manager.run_until_idle().await;

        let snapshot = manager.snapshot(id).unwrap();
        assert_eq!(snapshot.state, TaskState::Error);
        assert_eq!(snapshot.error.as_deref(), Some("media engine panicked"));
    }

    #[tokio::test]
    async fn fetch_info_sets_original_url_and_logs_failures() {
        let dir = TempDir::new().unwrap();
        let (manager, sink) = manager_with(Arc::new(InstantEngine), dir.path());

        let info = manager.fetch_info("https://example.com/ok").await.unwrap();
        assert_eq!(info.original_url, "https://example.com/ok");
        assert_eq!(info.title, "Instant");

        let err = manager.fetch_info("https://example.com/missing").await.unwrap_err();
        assert!(matches!(err, ManagerError::Engine(EngineError::Failed(_))));
        assert!(sink
            .drain_all()
            .iter()
            .any(|e| e.level == crate::logging::LogLevel::Error && e.message.contains("Video unavailable")));
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let dir = TempDir::new().unwrap();
        let (mut manager, _) = manager_with(Arc::new(InstantEngine), dir.path());

        assert!(matches!(manager.pause(TaskId(42)), Err(ManagerError::UnknownTask(TaskId(42)))));
        assert!(matches!(manager.resume(TaskId(42)), Err(ManagerError::UnknownTask(_))));
        assert!(matches!(manager.cancel(TaskId(42)), Err(ManagerError::UnknownTask(_))));
        assert!(manager.snapshot(TaskId(42)).is_none());
    }
}
