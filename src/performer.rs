//! Batch copy/move worker. Enumerates the sources, plans rename vs copy
//! per item, drives chunked I/O with throughput and ETA reporting, and
//! coordinates with an observer through the halt/response protocol.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::copier::{preserve_file_metadata, ChunkStatus};
use crate::errors::FsOpError;
use crate::format::{file_size_to_string, seconds_to_interval_string};
use crate::hash::file_content_hash;
use crate::object::FsObject;
use crate::observer::{HaltReason, OperationObserver, Progress, UserResponse};
use crate::paths;

const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;
/// Pause waits are bounded so a cancel wakes the worker promptly.
const PAUSE_WAIT_SLICE: Duration = Duration::from_millis(100);
const SPEED_WINDOW_SECS: f64 = 2.0;
const SPEED_EPSILON: f64 = 1.0;
const MAX_ETA_SECONDS: u32 = 30 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Copy,
    Move,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformerOptions {
    /// Pacing knob for streaming copies. Files no larger than one chunk
    /// are copied atomically instead.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Carry permission bits and mtime over to copied files.
    #[serde(default = "default_preserve_metadata")]
    pub preserve_metadata: bool,
    /// Compare content hashes of source and destination after each copy.
    #[serde(default)]
    pub verify_integrity: bool,
    /// Minimum delay between progress notifications. Zero reports every
    /// chunk.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_preserve_metadata() -> bool {
    true
}

fn default_progress_interval_ms() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_MS
}

impl Default for PerformerOptions {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            preserve_metadata: default_preserve_metadata(),
            verify_integrity: false,
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformerState {
    Idle,
    Enumerating,
    Executing,
    Halted,
    Paused,
    Cancelling,
    Finished,
}

/// Shared control surface between the worker and its controller. The
/// flags are the only state touched from both sides.
pub struct OperationControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
    state: Mutex<PerformerState>,
    pause_cv: Condvar,
}

impl OperationControl {
    fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(PerformerState::Idle),
            pause_cv: Condvar::new(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.pause_cv.notify_all();
    }

    /// Flips the pause flag; returns the new paused state.
    pub fn toggle_pause(&self) -> bool {
        let now_paused = !self.is_paused();
        if now_paused {
            self.pause();
        } else {
            self.resume();
        }
        now_paused
    }

    /// Requests a cooperative abort. The worker reacts at the next chunk
    /// boundary or wait slice.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            if *state != PerformerState::Finished {
                *state = PerformerState::Cancelling;
            }
        }
        self.pause_cv.notify_all();
    }

    pub fn state(&self) -> PerformerState {
        *self.state.lock()
    }

    fn set_state(&self, new_state: PerformerState) {
        *self.state.lock() = new_state;
    }

    /// Parks the caller while paused. A cancel wakes it within one wait
    /// slice.
    fn wait_while_paused(&self) {
        let mut guard = self.state.lock();
        while self.paused.load(Ordering::SeqCst) && !self.cancelled.load(Ordering::SeqCst) {
            self.pause_cv.wait_for(&mut guard, PAUSE_WAIT_SLICE);
        }
    }
}

/// Exponential moving average of bytes per second over a trailing window,
/// sampled once per chunk.
struct SpeedEstimator {
    ema_bps: f64,
    last_sample: Option<Instant>,
}

impl SpeedEstimator {
    fn new() -> Self {
        Self {
            ema_bps: 0.0,
            last_sample: None,
        }
    }

    fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        let Some(last) = self.last_sample.replace(now) else {
            return;
        };
        self.update(bytes, (now - last).as_secs_f64());
    }

    fn update(&mut self, bytes: u64, dt_seconds: f64) {
        let dt = dt_seconds.max(1e-9);
        let instantaneous = bytes as f64 / dt;
        let alpha = 1.0 - (-dt / SPEED_WINDOW_SECS).exp();
        self.ema_bps += alpha * (instantaneous - self.ema_bps);
    }

    /// Forgets the sampling clock, not the estimate. Called after a pause
    /// so the idle gap does not register as a slow chunk.
    fn reset_clock(&mut self) {
        self.last_sample = None;
    }

    fn bytes_per_sec(&self) -> u64 {
        if self.ema_bps < SPEED_EPSILON {
            0
        } else {
            self.ema_bps as u64
        }
    }

    fn eta_seconds(&self, remaining_bytes: u64) -> u32 {
        if self.ema_bps < SPEED_EPSILON {
            return 0;
        }
        (remaining_bytes as f64 / self.ema_bps).clamp(0.0, MAX_ETA_SECONDS as f64) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlannedAction {
    /// Create the corresponding directory under the destination root.
    EnsureDir,
    /// Same-volume move as a single rename.
    Rename,
    /// Streaming or atomic copy, deleting the source afterwards on move.
    Transfer { delete_source: bool },
    /// Remove an emptied source directory once its contents moved away.
    RemoveSourceDir,
}

struct PlannedItem {
    source: FsObject,
    /// Path under the destination root, including the item's own name.
    rel: PathBuf,
    action: PlannedAction,
}

#[derive(Default)]
struct Plan {
    items: Vec<PlannedItem>,
    total_files: usize,
    total_bytes: u64,
}

struct Failure {
    reason: HaltReason,
    dest: Option<FsObject>,
    message: String,
}

/// Long-running worker over a batch of filesystem objects.
///
/// Exactly one background thread performs all filesystem I/O and invokes
/// the observer; the constructing thread keeps this handle for pause,
/// cancel and state queries. Dropping the handle cancels and joins the
/// worker.
pub struct OperationPerformer {
    id: Uuid,
    op: Operation,
    sources: Option<Vec<FsObject>>,
    dest_root: String,
    options: PerformerOptions,
    control: Arc<OperationControl>,
    worker: Option<JoinHandle<()>>,
}

impl OperationPerformer {
    pub fn new(op: Operation, sources: Vec<FsObject>, dest_root: impl AsRef<Path>) -> Self {
        Self::with_options(op, sources, dest_root, PerformerOptions::default())
    }

    pub fn with_options(
        op: Operation,
        sources: Vec<FsObject>,
        dest_root: impl AsRef<Path>,
        options: PerformerOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            op,
            sources: Some(sources),
            dest_root: paths::normalize_path(dest_root.as_ref()),
            options,
            control: Arc::new(OperationControl::new()),
            worker: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The shared pause/cancel surface, safe to hand to another thread.
    pub fn control(&self) -> Arc<OperationControl> {
        Arc::clone(&self.control)
    }

    /// Spawns the worker thread. The batch runs once; a second call does
    /// nothing.
    pub fn start(&mut self, observer: Box<dyn OperationObserver>) {
        if self.worker.is_some() {
            log::warn!("operation {} already started", self.id);
            return;
        }
        let Some(sources) = self.sources.take() else {
            log::warn!("operation {} already consumed its sources", self.id);
            return;
        };

        let worker = Worker {
            id: self.id,
            op: self.op,
            dest_root: self.dest_root.clone(),
            options: self.options.clone(),
            control: Arc::clone(&self.control),
            observer,
            decisions: HashMap::new(),
            speed: SpeedEstimator::new(),
            bytes_total: 0,
            bytes_done: 0,
            files_total: 0,
            files_done: 0,
            files_skipped: 0,
            files_failed: 0,
            current_file: String::new(),
            last_emit: None,
            last_eta: 0,
            last_file_percent: 0.0,
            started: Instant::now(),
        };

        self.worker = Some(
            std::thread::Builder::new()
                .name("file-operation".into())
                .spawn(move || worker.run(sources))
                .expect("failed to spawn the operation worker thread"),
        );
    }

    pub fn paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Flips the pause flag; returns the new paused state.
    pub fn toggle_pause(&self) -> bool {
        self.control.toggle_pause()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn state(&self) -> PerformerState {
        self.control.state()
    }

    pub fn working(&self) -> bool {
        !matches!(
            self.control.state(),
            PerformerState::Idle | PerformerState::Finished
        )
    }

    /// Blocks until the worker thread has finished.
    pub fn wait(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OperationPerformer {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.control.cancel();
            self.wait();
        }
    }
}

struct Worker {
    id: Uuid,
    op: Operation,
    dest_root: String,
    options: PerformerOptions,
    control: Arc<OperationControl>,
    observer: Box<dyn OperationObserver>,
    decisions: HashMap<HaltReason, UserResponse>,
    speed: SpeedEstimator,
    bytes_total: u64,
    bytes_done: u64,
    files_total: usize,
    files_done: usize,
    files_skipped: usize,
    files_failed: usize,
    current_file: String,
    last_emit: Option<Instant>,
    last_eta: u32,
    last_file_percent: f32,
    started: Instant,
}

impl Worker {
    fn run(mut self, sources: Vec<FsObject>) {
        log::debug!(
            "operation {}: {:?} of {} items into {}",
            self.id,
            self.op,
            sources.len(),
            self.dest_root
        );

        self.control.set_state(PerformerState::Enumerating);
        let plan = self.enumerate(sources);
        self.files_total = plan.total_files;
        self.bytes_total = plan.total_bytes;

        if self.control.is_cancelled() {
            self.finish_cancelled();
            return;
        }

        if !self.ensure_destination_root() {
            return;
        }

        self.control.set_state(PerformerState::Executing);
        self.started = Instant::now();

        for mut item in plan.items {
            if !self.gate() {
                break;
            }
            self.execute_item(&mut item);
            if self.control.is_cancelled() {
                break;
            }
        }

        if self.control.is_cancelled() {
            self.finish_cancelled();
        } else {
            self.finish_complete();
        }
    }

    // Phase 1: walk the sources into a flat work list and tally totals.

    fn enumerate(&mut self, sources: Vec<FsObject>) -> Plan {
        let dest_root_object = FsObject::new(&self.dest_root);
        let mut plan = Plan::default();

        for source in sources {
            if self.control.is_cancelled() {
                break;
            }
            if source.is_cdup() {
                log::warn!("skipping the parent-directory entry");
                continue;
            }

            if source.is_dir() && source.exists() {
                if dest_root_object.is_child_of(&source) {
                    let response = self.decide(
                        HaltReason::Fail,
                        &source,
                        Some(&dest_root_object),
                        "cannot copy a directory into itself",
                    );
                    if response == UserResponse::Cancel {
                        self.control.cancel();
                        break;
                    }
                    self.files_failed += 1;
                    continue;
                }

                let movable = self.op == Operation::Move
                    && source.is_movable_to(&dest_root_object);
                if movable {
                    plan.total_files += 1;
                    plan.items.push(PlannedItem {
                        rel: PathBuf::from(source.full_name()),
                        source,
                        action: PlannedAction::Rename,
                    });
                } else {
                    let base_rel = PathBuf::from(source.full_name());
                    let delete_source = self.op == Operation::Move;
                    self.enumerate_tree(&source, &base_rel, delete_source, &mut plan);
                }
            } else if source.is_file() && source.exists() {
                let movable = self.op == Operation::Move
                    && source.is_movable_to(&dest_root_object);
                let action = if movable {
                    PlannedAction::Rename
                } else {
                    PlannedAction::Transfer {
                        delete_source: self.op == Operation::Move,
                    }
                };
                plan.total_files += 1;
                plan.total_bytes += source.size();
                plan.items.push(PlannedItem {
                    rel: PathBuf::from(source.full_name()),
                    source,
                    action,
                });
            } else if !source.exists() {
                // Kept in the plan; execution raises the vanished-source
                // halt with full context.
                plan.total_files += 1;
                plan.items.push(PlannedItem {
                    rel: PathBuf::from(source.full_name()),
                    source,
                    action: PlannedAction::Transfer {
                        delete_source: self.op == Operation::Move,
                    },
                });
            } else {
                log::warn!(
                    "skipping {}: only files and directories are transferred",
                    source.full_path()
                );
            }
        }
        plan
    }

    fn enumerate_tree(
        &mut self,
        root: &FsObject,
        base_rel: &Path,
        delete_source: bool,
        plan: &mut Plan,
    ) {
        let root_path = Path::new(root.full_path()).to_path_buf();
        let mut source_dirs: Vec<(FsObject, PathBuf)> = Vec::new();

        for entry in WalkDir::new(&root_path).follow_links(false) {
            if self.control.is_cancelled() {
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("walk error under {}: {}", root.full_path(), err);
                    continue;
                }
            };
            let rel = match entry.path().strip_prefix(&root_path) {
                Ok(suffix) => base_rel.join(suffix),
                Err(_) => continue,
            };

            let object = FsObject::new(entry.path());
            if entry.file_type().is_dir() {
                if delete_source {
                    source_dirs.push((object.clone(), rel.clone()));
                }
                plan.items.push(PlannedItem {
                    source: object,
                    rel,
                    action: PlannedAction::EnsureDir,
                });
            } else if entry.file_type().is_file() {
                plan.total_files += 1;
                plan.total_bytes += object.size();
                plan.items.push(PlannedItem {
                    source: object,
                    rel,
                    action: PlannedAction::Transfer { delete_source },
                });
            } else {
                log::warn!(
                    "skipping {}: only files and directories are transferred",
                    object.full_path()
                );
            }
        }

        // Deepest first, after everything inside has been carried over.
        for (object, rel) in source_dirs.into_iter().rev() {
            plan.items.push(PlannedItem {
                source: object,
                rel,
                action: PlannedAction::RemoveSourceDir,
            });
        }
    }

    fn ensure_destination_root(&mut self) -> bool {
        loop {
            if self.control.is_cancelled() {
                self.finish_cancelled();
                return false;
            }
            match fs::create_dir_all(paths::as_path(&self.dest_root)) {
                Ok(()) => return true,
                Err(err) => {
                    let dest = FsObject::new(&self.dest_root);
                    let reason = classify_io_error(&err);
                    match self.decide(reason, &dest, None, &err.to_string()) {
                        UserResponse::Retry | UserResponse::Overwrite => continue,
                        UserResponse::Cancel => {
                            self.control.cancel();
                            self.finish_cancelled();
                            return false;
                        }
                        _ => {
                            self.finish_with(format!(
                                "Could not create the destination directory: {err}"
                            ));
                            return false;
                        }
                    }
                }
            }
        }
    }

    // Phase 3: execution with the halt/retry protocol per item.

    fn execute_item(&mut self, item: &mut PlannedItem) {
        let mut name_override: Option<String> = None;
        let mut pending: Option<Failure> = None;

        loop {
            if !self.gate() {
                return;
            }

            let failure = match pending.take() {
                Some(failure) => failure,
                None => match self.run_action(item, name_override.as_deref()) {
                    Ok(()) => return,
                    Err(failure) => failure,
                },
            };

            let response = self.decide(
                failure.reason,
                &item.source,
                failure.dest.as_ref(),
                &failure.message,
            );
            match response {
                UserResponse::Skip => {
                    self.account_unprocessed(item, false);
                    return;
                }
                UserResponse::Proceed => {
                    self.account_unprocessed(item, true);
                    return;
                }
                UserResponse::Overwrite => {
                    if let Err(next) = self.clear_destination(item, name_override.as_deref()) {
                        pending = Some(next);
                    }
                }
                UserResponse::Rename(new_name) => {
                    name_override = Some(new_name);
                }
                UserResponse::Retry => {}
                UserResponse::Cancel => {
                    self.control.cancel();
                    return;
                }
                UserResponse::SkipAll | UserResponse::OverwriteAll => {
                    unreachable!("decisions are reduced to their single form")
                }
            }
        }
    }

    fn run_action(
        &mut self,
        item: &mut PlannedItem,
        name_override: Option<&str>,
    ) -> Result<(), Failure> {
        match item.action {
            PlannedAction::EnsureDir => self.ensure_dir(item, name_override),
            PlannedAction::Rename => self.rename_item(item, name_override),
            PlannedAction::Transfer { delete_source } => {
                self.transfer_file(item, delete_source, name_override)
            }
            PlannedAction::RemoveSourceDir => {
                self.remove_source_dir(item);
                Ok(())
            }
        }
    }

    fn ensure_dir(
        &mut self,
        item: &PlannedItem,
        name_override: Option<&str>,
    ) -> Result<(), Failure> {
        let dest = self.dest_path_for(&item.rel, name_override);
        if let Ok(meta) = fs::symlink_metadata(&dest) {
            if meta.is_dir() {
                return Ok(());
            }
            return Err(Failure {
                reason: HaltReason::TargetAlreadyExists,
                dest: Some(FsObject::new(&dest)),
                message: format!("{} exists and is not a directory", dest.display()),
            });
        }
        fs::create_dir_all(&dest).map_err(|err| Failure {
            reason: classify_io_error(&err),
            dest: Some(FsObject::new(&dest)),
            message: err.to_string(),
        })
    }

    fn rename_item(
        &mut self,
        item: &mut PlannedItem,
        name_override: Option<&str>,
    ) -> Result<(), Failure> {
        let dest_dir = self.dest_dir_for(&item.rel);
        self.notify_current_file(item.source.full_path().to_string());
        let size = item.source.size();

        match item.source.move_atomically(&dest_dir, name_override) {
            Ok(()) => {
                self.speed.add_sample(size);
                self.complete_file(size);
                Ok(())
            }
            Err(FsOpError::CrossVolume) => {
                // The volume probe said renameable but the OS disagreed.
                log::debug!(
                    "rename of {} crossed a volume boundary, copying instead",
                    item.source.full_path()
                );
                if item.source.is_dir() {
                    self.move_tree_by_copy(item);
                    Ok(())
                } else {
                    item.action = PlannedAction::Transfer {
                        delete_source: true,
                    };
                    self.transfer_file(item, true, name_override)
                }
            }
            Err(err) => {
                let dest = self.dest_path_for(&item.rel, name_override);
                Err(self.failure_from(err, &item.source, Some(FsObject::new(&dest))))
            }
        }
    }

    /// Escalation path for a directory rename that hit a volume boundary:
    /// re-plan the subtree as copy + delete and run it in place.
    fn move_tree_by_copy(&mut self, item: &PlannedItem) {
        let base_rel = item.rel.clone();
        let mut plan = Plan::default();
        self.enumerate_tree(&item.source, &base_rel, true, &mut plan);
        self.files_total += plan.total_files;
        self.bytes_total += plan.total_bytes;
        // The directory itself was already counted as one unit.
        self.files_done += 1;

        for mut sub in plan.items {
            if !self.gate() {
                return;
            }
            self.execute_item(&mut sub);
            if self.control.is_cancelled() {
                return;
            }
        }
    }

    fn transfer_file(
        &mut self,
        item: &mut PlannedItem,
        delete_source: bool,
        name_override: Option<&str>,
    ) -> Result<(), Failure> {
        let dest_dir = self.dest_dir_for(&item.rel);
        let file_name = name_override
            .unwrap_or(item.source.full_name())
            .to_string();
        let dest_path = dest_dir.join(&file_name);

        self.notify_current_file(item.source.full_path().to_string());

        if !item.source.exists() {
            item.source.refresh();
        }
        if !item.source.exists() {
            return Err(Failure {
                reason: HaltReason::SourceVanished,
                dest: None,
                message: format!("{} does not exist", item.source.full_path()),
            });
        }

        if fs::symlink_metadata(&dest_path).is_ok() {
            return Err(Failure {
                reason: HaltReason::TargetAlreadyExists,
                dest: Some(FsObject::new(&dest_path)),
                message: format!("{} already exists", dest_path.display()),
            });
        }

        let size = item.source.size();
        if size <= self.options.chunk_size as u64 {
            if let Err(err) = item.source.copy_atomically(&dest_dir, Some(&file_name)) {
                return Err(self.failure_from(err, &item.source, Some(FsObject::new(&dest_path))));
            }
            self.speed.add_sample(size);
        } else {
            let mut previous = 0u64;
            loop {
                if self.control.is_paused() {
                    self.enter_pause();
                }
                if self.control.is_cancelled() {
                    let _ = item.source.cancel_copy();
                    return Ok(());
                }

                match item
                    .source
                    .copy_chunk(self.options.chunk_size, &dest_dir, Some(&file_name))
                {
                    Ok(ChunkStatus::InProgress) => {
                        let copied = item.source.bytes_copied();
                        self.speed.add_sample(copied.saturating_sub(previous));
                        previous = copied;
                        self.report_chunk_progress(copied, size);
                    }
                    Ok(ChunkStatus::Completed) => break,
                    Err(err) => {
                        let _ = fs::remove_file(&dest_path);
                        return Err(self.failure_from(
                            err,
                            &item.source,
                            Some(FsObject::new(&dest_path)),
                        ));
                    }
                }
            }
        }

        if self.options.preserve_metadata {
            if let Err(err) =
                preserve_file_metadata(Path::new(item.source.full_path()), &dest_path)
            {
                log::warn!(
                    "could not preserve metadata on {}: {}",
                    dest_path.display(),
                    err
                );
            }
        }

        if self.options.verify_integrity {
            if let Err(failure) = self.verify_copy(&item.source, &dest_path) {
                let _ = fs::remove_file(&dest_path);
                return Err(failure);
            }
        }

        if delete_source {
            if let Err(err) = item.source.remove() {
                return Err(self.failure_from(err, &item.source, None));
            }
        }

        self.complete_file(size);
        Ok(())
    }

    fn verify_copy(&self, source: &FsObject, dest_path: &Path) -> Result<(), Failure> {
        let source_path = Path::new(source.full_path());
        let expected = file_content_hash(source_path).map_err(|err| Failure {
            reason: classify_io_error(&err),
            dest: None,
            message: err.to_string(),
        })?;
        let actual = file_content_hash(dest_path).map_err(|err| Failure {
            reason: classify_io_error(&err),
            dest: Some(FsObject::new(dest_path)),
            message: err.to_string(),
        })?;
        if expected != actual {
            return Err(Failure {
                reason: HaltReason::Fail,
                dest: Some(FsObject::new(dest_path)),
                message: format!(
                    "content verification failed for {}",
                    dest_path.display()
                ),
            });
        }
        Ok(())
    }

    fn remove_source_dir(&mut self, item: &mut PlannedItem) {
        item.source.refresh();
        if !item.source.exists() {
            return;
        }
        if !item.source.is_empty_dir() {
            // Entries inside were skipped; the directory stays behind.
            log::debug!(
                "leaving {} in place: directory not empty",
                item.source.full_path()
            );
            return;
        }
        if let Err(err) = item.source.remove() {
            log::warn!(
                "could not remove the source directory {}: {}",
                item.source.full_path(),
                err
            );
        }
    }

    /// Clears whatever occupies the destination ahead of an overwrite. A
    /// read-only file is made writable first; failure to do so surfaces as
    /// a fresh halt.
    fn clear_destination(
        &mut self,
        item: &PlannedItem,
        name_override: Option<&str>,
    ) -> Result<(), Failure> {
        let dest_path = self.dest_path_for(&item.rel, name_override);
        let mut dest = FsObject::new(&dest_path);
        if !dest.exists() {
            return Ok(());
        }

        if dest.is_file() || dest.object_type() == crate::object::FsObjectType::Other {
            if dest.is_file() && !dest.is_writable() && !dest.make_writable(true) {
                let message = if dest.last_error_message().is_empty() {
                    format!("{} is read-only", dest_path.display())
                } else {
                    dest.last_error_message().to_string()
                };
                return Err(Failure {
                    reason: HaltReason::DestinationReadOnly,
                    dest: Some(dest),
                    message,
                });
            }
            if let Err(err) = fs::remove_file(&dest_path) {
                return Err(Failure {
                    reason: classify_io_error(&err),
                    dest: Some(dest),
                    message: err.to_string(),
                });
            }
        } else if dest.is_dir() && !item.source.is_dir() {
            if let Err(err) = fs::remove_dir_all(&dest_path) {
                return Err(Failure {
                    reason: classify_io_error(&err),
                    dest: Some(dest),
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }

    // Decision flow.

    /// Resolves a halt, honoring earlier batch-wide decisions for the same
    /// reason. Always returns the per-item form.
    fn decide(
        &mut self,
        reason: HaltReason,
        source: &FsObject,
        dest: Option<&FsObject>,
        message: &str,
    ) -> UserResponse {
        if let Some(cached) = self.decisions.get(&reason) {
            return cached.clone();
        }

        self.control.set_state(PerformerState::Halted);
        log::debug!(
            "operation {} halted: {:?} on {} ({})",
            self.id,
            reason,
            source.full_path(),
            message
        );
        let response = self.observer.on_process_halted(reason, source, dest, message);
        if response.is_global() {
            self.decisions.insert(reason, response.to_single());
        }
        if !self.control.is_cancelled() {
            self.control.set_state(PerformerState::Executing);
        }
        response.to_single()
    }

    fn failure_from(
        &self,
        err: FsOpError,
        source: &FsObject,
        dest: Option<FsObject>,
    ) -> Failure {
        let message = match &err {
            FsOpError::Fail(text) => text.clone(),
            other => other.to_string(),
        };
        let reason = match &err {
            FsOpError::TargetAlreadyExists(_) => HaltReason::TargetAlreadyExists,
            FsOpError::ObjectDoesNotExist(_) => HaltReason::SourceVanished,
            _ => match source.last_error_kind() {
                Some(io::ErrorKind::PermissionDenied) => HaltReason::AccessDenied,
                Some(io::ErrorKind::NotFound) => HaltReason::SourceVanished,
                _ => HaltReason::Fail,
            },
        };
        Failure {
            reason,
            dest,
            message,
        }
    }

    // Pause/cancel gating and progress accounting.

    /// Returns false when the batch should stop. Blocks through a pause.
    fn gate(&mut self) -> bool {
        if self.control.is_cancelled() {
            return false;
        }
        if self.control.is_paused() {
            self.enter_pause();
        }
        !self.control.is_cancelled()
    }

    fn enter_pause(&mut self) {
        self.control.set_state(PerformerState::Paused);
        // One zero-speed snapshot so the UI freezes its readouts.
        self.emit_paused_snapshot();
        self.control.wait_while_paused();
        self.speed.reset_clock();
        if !self.control.is_cancelled() {
            self.control.set_state(PerformerState::Executing);
        }
    }

    fn notify_current_file(&mut self, path: String) {
        if self.current_file != path {
            self.observer.on_current_file_changed(&path);
            self.current_file = path;
        }
    }

    fn account_unprocessed(&mut self, item: &PlannedItem, failed: bool) {
        if matches!(
            item.action,
            PlannedAction::Transfer { .. } | PlannedAction::Rename
        ) {
            if failed {
                self.files_failed += 1;
            } else {
                self.files_skipped += 1;
            }
            // Keep the bar honest: unprocessed bytes still count as dealt
            // with.
            self.bytes_done += item.source.size();
        }
    }

    fn complete_file(&mut self, size: u64) {
        self.bytes_done += size;
        self.files_done += 1;
        // The finished file's bytes are already in the batch tally.
        self.emit_progress(0, size, size);
    }

    fn report_chunk_progress(&mut self, file_done: u64, file_total: u64) {
        if let Some(last) = self.last_emit {
            let interval = Duration::from_millis(self.options.progress_interval_ms);
            if !interval.is_zero() && last.elapsed() < interval {
                return;
            }
        }
        self.emit_progress(file_done, file_done, file_total);
    }

    /// `extra_bytes` is the current file's partial progress, not yet
    /// accumulated into the batch tally.
    fn emit_progress(&mut self, extra_bytes: u64, file_done: u64, file_total: u64) {
        let bytes_overall = self.bytes_done.saturating_add(extra_bytes);
        let remaining = self.bytes_total.saturating_sub(bytes_overall);
        let eta = self.speed.eta_seconds(remaining);
        self.last_eta = eta;
        self.last_file_percent = percent(file_done, file_total);

        let progress = Progress {
            total_percent: percent(bytes_overall, self.bytes_total),
            files_done: self.files_done,
            files_total: self.files_total,
            file_percent: self.last_file_percent,
            bytes_per_sec: self.speed.bytes_per_sec(),
            seconds_remaining: eta,
        };
        self.last_emit = Some(Instant::now());
        self.observer.on_progress_changed(progress);
    }

    fn emit_paused_snapshot(&mut self) {
        let progress = Progress {
            total_percent: percent(self.bytes_done, self.bytes_total),
            files_done: self.files_done,
            files_total: self.files_total,
            file_percent: self.last_file_percent,
            bytes_per_sec: 0,
            seconds_remaining: self.last_eta,
        };
        self.last_emit = Some(Instant::now());
        self.observer.on_progress_changed(progress);
    }

    /// Landing snapshot so the bar reflects exactly where the batch ended.
    fn emit_final_snapshot(&mut self) {
        let remaining = self.bytes_total.saturating_sub(self.bytes_done);
        let progress = Progress {
            total_percent: percent(self.bytes_done, self.bytes_total),
            files_done: self.files_done,
            files_total: self.files_total,
            file_percent: self.last_file_percent,
            bytes_per_sec: self.speed.bytes_per_sec(),
            seconds_remaining: self.speed.eta_seconds(remaining),
        };
        self.last_emit = Some(Instant::now());
        self.observer.on_progress_changed(progress);
    }

    // Completion.

    fn finish_complete(&mut self) {
        self.emit_final_snapshot();

        let verb = match self.op {
            Operation::Copy => "Copied",
            Operation::Move => "Moved",
        };
        let elapsed = self.started.elapsed().as_secs() as u32;
        let mut summary = format!(
            "{} {} of {} files ({}) in {}",
            verb,
            self.files_done,
            self.files_total,
            file_size_to_string(self.bytes_done),
            seconds_to_interval_string(elapsed)
        );
        if self.files_skipped > 0 {
            summary.push_str(&format!(", {} skipped", self.files_skipped));
        }
        if self.files_failed > 0 {
            summary.push_str(&format!(", {} failed", self.files_failed));
        }
        self.finish_with(summary);
    }

    fn finish_cancelled(&mut self) {
        self.finish_with(format!(
            "Operation cancelled. {} of {} files completed.",
            self.files_done, self.files_total
        ));
    }

    fn finish_with(&mut self, summary: String) {
        log::debug!("operation {} finished: {}", self.id, summary);
        self.control.set_state(PerformerState::Finished);
        self.observer.on_process_finished(&summary);
    }

    // Destination path helpers.

    fn dest_dir_for(&self, rel: &Path) -> PathBuf {
        match rel.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                Path::new(&self.dest_root).join(parent)
            }
            _ => PathBuf::from(&self.dest_root),
        }
    }

    fn dest_path_for(&self, rel: &Path, name_override: Option<&str>) -> PathBuf {
        match name_override {
            Some(name) => self.dest_dir_for(rel).join(name),
            None => Path::new(&self.dest_root).join(rel),
        }
    }
}

fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        100.0
    } else {
        (((done as f64) / (total as f64)) * 100.0).min(100.0) as f32
    }
}

fn classify_io_error(err: &io::Error) -> HaltReason {
    if crate::volume::is_disconnect_error(err) {
        return HaltReason::SourceVanished;
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied => HaltReason::AccessDenied,
        io::ErrorKind::NotFound => HaltReason::SourceVanished,
        _ => HaltReason::Fail,
    }
}
