//! The per-workspace daemon.
//!
//! One daemon owns the store handle and is the only writer while it
//! runs. Connection threads dispatch requests against the store mutex,
//! so mutations serialize; operations spanning several store calls
//! (import, prefix rename, flush) additionally hold the workspace-wide
//! writer lock. Every store-mutating RPC arms the flush debouncer;
//! when it fires the dirty set is exported to `issues.jsonl`.

use crate::config::Config;
use crate::daemon::debounce::Debouncer;
use crate::daemon::discovery;
use crate::daemon::lockfile::{self, DaemonLock};
use crate::daemon::protocol::{read_frame, write_frame, Request, Response, StatusInfo, MAGIC};
use crate::error::{BeadsError, Result};
use crate::graph;
use crate::model::{Dependency, DependencyType, Event, Issue};
use crate::storage::markdown::lock::is_process_alive;
use crate::storage::{self, meta_keys, IssueUpdate, ListFilters, Store};
use crate::sync::{self, ImportOptions};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// RPC methods that mutate the store and therefore arm the debouncer.
const MUTATING_METHODS: &[&str] = &[
    "create_issue",
    "create_issues",
    "update_issue",
    "update_issue_id",
    "delete_issue",
    "delete_issues",
    "close_issue",
    "reopen_issue",
    "create_dependency",
    "delete_dependency",
    "rename_dependency_prefix",
    "add_label",
    "remove_label",
    "add_comment",
    "record_event",
    "set_config",
    "delete_config",
    "set_metadata",
];

/// Workspace-wide writer lock with a visible holder label for `status`.
struct WriterLock {
    inner: Mutex<()>,
    holder: Mutex<Option<String>>,
}

struct WriterGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    holder: &'a Mutex<Option<String>>,
}

impl WriterLock {
    fn new() -> Self {
        Self {
            inner: Mutex::new(()),
            holder: Mutex::new(None),
        }
    }

    fn hold(&self, label: &str) -> WriterGuard<'_> {
        let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *self.holder.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            Some(label.to_string());
        WriterGuard {
            _guard: guard,
            holder: &self.holder,
        }
    }

    fn holder(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        *self
            .holder
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

struct Inner {
    config: Config,
    store: Mutex<Box<dyn Store>>,
    writer: WriterLock,
    store_path: PathBuf,
    started_at: Instant,
    last_activity: Mutex<DateTime<Utc>>,
    shutting_down: AtomicBool,
}

impl Inner {
    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Utc::now();
    }

    fn lock_store(&self) -> MutexGuard<'_, Box<dyn Store>> {
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Export the store when the dirty set is non-empty, then clear it.
    /// Failures are logged, never fatal: the dirty set survives for the
    /// next trigger.
    fn flush(&self) {
        let _writer = self.writer.hold("flush");
        let mut store = self.lock_store();

        let dirty = match store.get_dirty_issues() {
            Ok(dirty) => dirty,
            Err(e) => {
                tracing::warn!(error = %e, "flush: cannot read dirty set");
                return;
            }
        };
        if dirty.is_empty() {
            return;
        }

        let jsonl = self.config.jsonl_path();
        match sync::export_to_jsonl(store.as_mut(), &jsonl, false) {
            Ok(result) => {
                if let Err(e) = store.clear_dirty_issues_by_id(&dirty) {
                    tracing::warn!(error = %e, "flush: cannot clear dirty set");
                }
                tracing::debug!(
                    exported = result.exported_count,
                    dirty = dirty.len(),
                    "auto-flush complete"
                );
            }
            Err(e) => tracing::warn!(error = %e, "auto-flush failed; dirty set preserved"),
        }
    }

    /// Import the artifact when its hash differs from the last one seen.
    fn auto_import(&self) {
        let jsonl = self.config.jsonl_path();
        if !jsonl.exists() {
            return;
        }

        let hash = match sync::compute_jsonl_hash(&jsonl) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(error = %e, "auto-import: cannot hash artifact");
                return;
            }
        };

        {
            let store = self.lock_store();
            if store.get_metadata(meta_keys::LAST_IMPORT_HASH).ok().flatten()
                == Some(hash.clone())
            {
                return;
            }
        }

        let _writer = self.writer.hold("import");
        let mut store = self.lock_store();
        match sync::import_from_jsonl(store.as_mut(), &jsonl, &ImportOptions::default()) {
            Ok(result) => tracing::info!(
                created = result.created,
                updated = result.updated,
                unchanged = result.unchanged,
                "auto-import complete"
            ),
            Err(e) => tracing::warn!(error = %e, "auto-import failed"),
        }
    }
}

/// The daemon process for one workspace.
pub struct Daemon {
    inner: Arc<Inner>,
    listener: UnixListener,
    debouncer: Arc<Debouncer>,
    _lock: DaemonLock,
}

impl Daemon {
    /// Open the store, claim the workspace, clean up stale runtime
    /// files, bind the socket, and run auto-import. The socket only
    /// accepts once [`Daemon::run`] is called.
    ///
    /// # Errors
    ///
    /// Fatal startup errors: workspace not initialized, another daemon
    /// alive, store unopenable, socket unbindable.
    pub fn new(config: Config) -> Result<Self> {
        if !config.beads_dir.is_dir() {
            return Err(BeadsError::NotInitialized);
        }

        let lock = DaemonLock::acquire(&config.daemon_lock_path())?;

        let socket_path = config.socket_path();
        if socket_path.exists() {
            // A live daemon answers its socket; otherwise the socket is
            // a leftover whose owner died.
            if discovery::probe(&socket_path).is_ok() {
                return Err(BeadsError::Config(format!(
                    "a daemon is already serving {}",
                    config.workspace.display()
                )));
            }
            let pid_path = config.pid_file_path();
            if let Some(pid) = lockfile::read_pid_file(&pid_path) {
                if is_process_alive(pid) {
                    return Err(BeadsError::Config(format!(
                        "daemon pid {pid} is alive but not answering; refusing to replace it"
                    )));
                }
            }
            tracing::info!(socket = %socket_path.display(), "removing stale socket");
            lockfile::remove_file_quiet(&socket_path);
            lockfile::remove_file_quiet(&config.pid_file_path());
        }

        let store = storage::open_store(
            config.backend,
            &config.beads_dir,
            config.db_override.as_deref(),
            &config.issue_prefix,
        )?;
        let store_path = store.path().to_path_buf();

        let listener = UnixListener::bind(&socket_path)?;
        lockfile::write_pid_file(&config.pid_file_path())?;

        let inner = Arc::new(Inner {
            config,
            store: Mutex::new(store),
            writer: WriterLock::new(),
            store_path,
            started_at: Instant::now(),
            last_activity: Mutex::new(Utc::now()),
            shutting_down: AtomicBool::new(false),
        });

        if !inner.config.no_auto_import {
            inner.auto_import();
        }

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let debouncer = Arc::new(Debouncer::new(inner.config.flush_debounce, move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush();
            }
        }));

        Ok(Self {
            inner,
            listener,
            debouncer,
            _lock: lock,
        })
    }

    /// Serve until a `shutdown` request arrives, then drain: cancel the
    /// debouncer, run one final flush, close the store, and remove the
    /// socket and PID file.
    ///
    /// # Errors
    ///
    /// Returns socket-level errors that prevent serving at all.
    pub fn run(self) -> Result<()> {
        self.listener.set_nonblocking(true)?;
        tracing::info!(
            workspace = %self.inner.config.workspace.display(),
            socket = %self.inner.config.socket_path().display(),
            "daemon serving"
        );

        loop {
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    let inner = Arc::clone(&self.inner);
                    let debouncer = Arc::clone(&self.debouncer);
                    std::thread::spawn(move || handle_connection(&inner, &debouncer, stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    // Retry once per the transport policy; bail if the
                    // listener keeps failing.
                    tracing::warn!(error = %e, "accept failed; retrying");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        tracing::info!("daemon draining");
        self.debouncer.cancel();
        if !self.inner.config.no_auto_flush {
            self.inner.flush();
        }
        if let Err(e) = self.inner.lock_store().close() {
            tracing::warn!(error = %e, "store close failed");
        }
        lockfile::remove_file_quiet(&self.inner.config.socket_path());
        lockfile::remove_file_quiet(&self.inner.config.pid_file_path());
        Ok(())
    }
}

fn handle_connection(inner: &Arc<Inner>, debouncer: &Arc<Debouncer>, stream: UnixStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(300)));
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(_) => return,
    };
    let mut reader = BufReader::new(stream);

    loop {
        let request: Request = match read_frame(&mut reader) {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                let _ = write_frame(&mut writer, &Response::from_error(0, &e));
                break;
            }
        };

        inner.touch();

        if request.method == "shutdown" {
            let _ = write_frame(&mut writer, &Response::ok(request.id, json!({"ok": true})));
            inner.shutting_down.store(true, Ordering::SeqCst);
            break;
        }

        let response = match dispatch(inner, debouncer, &request.method, &request.params) {
            Ok(result) => {
                if MUTATING_METHODS.contains(&request.method.as_str())
                    && !inner.config.no_auto_flush
                {
                    debouncer.trigger();
                }
                Response::ok(request.id, result)
            }
            Err(e) => Response::from_error(request.id, &e),
        };

        if write_frame(&mut writer, &response).is_err() {
            break;
        }
    }
}

fn params<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| BeadsError::validation("params", e.to_string()))
}

#[allow(clippy::too_many_lines)]
fn dispatch(
    inner: &Arc<Inner>,
    debouncer: &Arc<Debouncer>,
    method: &str,
    raw: &Value,
) -> Result<Value> {
    let actor_or_default = |actor: Option<String>| -> String {
        actor.unwrap_or_else(|| inner.config.actor.clone())
    };

    match method {
        "discover" => Ok(json!({
            "magic": MAGIC,
            "version": env!("CARGO_PKG_VERSION"),
        })),

        "status" => {
            let info = StatusInfo {
                pid: std::process::id(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_seconds: inner.started_at.elapsed().as_secs_f64(),
                workspace_path: inner.config.workspace.display().to_string(),
                database_path: inner.store_path.display().to_string(),
                last_activity_time: inner
                    .last_activity
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .to_rfc3339(),
                exclusive_lock_active: inner.writer.holder().is_some(),
                exclusive_lock_holder: inner.writer.holder().unwrap_or_default(),
            };
            Ok(serde_json::to_value(info)?)
        }

        "flush" => {
            // A synchronous flush (e.g. from a pre-commit hook) beats
            // any pending debounce.
            debouncer.cancel();
            inner.flush();
            Ok(json!({"ok": true}))
        }

        "export" => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                force: bool,
            }
            let p: P = if raw.is_null() { P::default() } else { params(raw)? };
            let _writer = inner.writer.hold("export");
            let mut store = inner.lock_store();
            let jsonl = inner.config.jsonl_path();
            let result = sync::export_to_jsonl(store.as_mut(), &jsonl, p.force)?;
            store.clear_dirty_issues()?;
            Ok(serde_json::to_value(result)?)
        }

        "import" => {
            #[derive(Deserialize, Default)]
            struct P {
                path: Option<PathBuf>,
                #[serde(default)]
                options: ImportOptions,
            }
            let p: P = if raw.is_null() { P::default() } else { params(raw)? };
            let path = p.path.unwrap_or_else(|| inner.config.jsonl_path());
            let _writer = inner.writer.hold("import");
            let mut store = inner.lock_store();
            let result = sync::import_from_jsonl(store.as_mut(), &path, &p.options)?;
            Ok(serde_json::to_value(result)?)
        }

        "create_issue" => {
            #[derive(Deserialize)]
            struct P {
                issue: Issue,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            let created = inner.lock_store().create_issue(&p.issue, &actor)?;
            Ok(serde_json::to_value(created)?)
        }

        "create_issues" => {
            #[derive(Deserialize)]
            struct P {
                issues: Vec<Issue>,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            let result = inner.lock_store().create_issues(&p.issues, &actor)?;
            Ok(serde_json::to_value(result)?)
        }

        "get_issue" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
            }
            let p: P = params(raw)?;
            let issue = inner.lock_store().get_issue(&p.id)?;
            // Absent is a successful null, not an error.
            Ok(issue.map_or(Value::Null, |i| serde_json::to_value(i).unwrap_or(Value::Null)))
        }

        "update_issue" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
                fields: serde_json::Map<String, Value>,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let update = IssueUpdate::from_field_map(&p.fields)?;
            let actor = actor_or_default(p.actor);
            let updated = inner.lock_store().update_issue(&p.id, &update, &actor)?;
            Ok(serde_json::to_value(updated)?)
        }

        "update_issue_id" => {
            #[derive(Deserialize)]
            struct P {
                old_id: String,
                new_id: String,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            let _writer = inner.writer.hold("rename");
            inner
                .lock_store()
                .update_issue_id(&p.old_id, &p.new_id, &actor)?;
            Ok(json!({"ok": true}))
        }

        "delete_issue" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            inner.lock_store().delete_issue(&p.id, &actor)?;
            Ok(json!({"ok": true}))
        }

        "delete_issues" => {
            #[derive(Deserialize)]
            struct P {
                ids: Vec<String>,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            let deleted = inner.lock_store().delete_issues(&p.ids, &actor)?;
            Ok(json!({"deleted": deleted}))
        }

        "list_issues" => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                filters: ListFilters,
            }
            let p: P = if raw.is_null() { P::default() } else { params(raw)? };
            let issues = inner.lock_store().list_issues(&p.filters)?;
            Ok(serde_json::to_value(issues)?)
        }

        "search_issues" => {
            #[derive(Deserialize)]
            struct P {
                query: String,
                #[serde(default)]
                filters: ListFilters,
            }
            let p: P = params(raw)?;
            let issues = inner.lock_store().search_issues(&p.query, &p.filters)?;
            Ok(serde_json::to_value(issues)?)
        }

        "count_issues" => {
            let count = inner.lock_store().count_issues()?;
            Ok(json!({"count": count}))
        }

        "close_issue" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
                #[serde(default)]
                reason: String,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            let issue = inner.lock_store().close_issue(&p.id, &p.reason, &actor)?;
            Ok(serde_json::to_value(issue)?)
        }

        "reopen_issue" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            let issue = inner.lock_store().reopen_issue(&p.id, &actor)?;
            Ok(serde_json::to_value(issue)?)
        }

        "create_dependency" => {
            #[derive(Deserialize)]
            struct P {
                issue_id: String,
                depends_on_id: String,
                #[serde(rename = "type")]
                dep_type: DependencyType,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            let dep = Dependency::new(&p.issue_id, &p.depends_on_id, p.dep_type);
            inner.lock_store().create_dependency(&dep, &actor)?;
            Ok(json!({"ok": true}))
        }

        "delete_dependency" => {
            #[derive(Deserialize)]
            struct P {
                issue_id: String,
                depends_on_id: String,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            inner
                .lock_store()
                .delete_dependency(&p.issue_id, &p.depends_on_id, &actor)?;
            Ok(json!({"ok": true}))
        }

        "get_dependencies" | "get_dependents" | "get_dependency_records" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
            }
            let p: P = params(raw)?;
            let store = inner.lock_store();
            match method {
                "get_dependencies" => Ok(serde_json::to_value(store.get_dependencies(&p.id)?)?),
                "get_dependents" => Ok(serde_json::to_value(store.get_dependents(&p.id)?)?),
                _ => Ok(serde_json::to_value(store.get_dependency_records(&p.id)?)?),
            }
        }

        "get_all_dependency_records" => {
            let records = inner.lock_store().get_all_dependency_records()?;
            Ok(serde_json::to_value(records)?)
        }

        "rename_dependency_prefix" => {
            #[derive(Deserialize)]
            struct P {
                old: String,
                new: String,
            }
            let p: P = params(raw)?;
            let _writer = inner.writer.hold("prefix-rename");
            let changed = inner.lock_store().rename_dependency_prefix(&p.old, &p.new)?;
            Ok(json!({"changed": changed}))
        }

        "add_label" | "remove_label" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
                label: String,
                actor: Option<String>,
            }
            let p: P = params(raw)?;
            let actor = actor_or_default(p.actor);
            let mut store = inner.lock_store();
            let changed = if method == "add_label" {
                store.add_label(&p.id, &p.label, &actor)?
            } else {
                store.remove_label(&p.id, &p.label, &actor)?
            };
            Ok(json!({"changed": changed}))
        }

        "get_labels" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
            }
            let p: P = params(raw)?;
            Ok(serde_json::to_value(inner.lock_store().get_labels(&p.id)?)?)
        }

        "get_issues_by_label" => {
            #[derive(Deserialize)]
            struct P {
                label: String,
            }
            let p: P = params(raw)?;
            Ok(serde_json::to_value(
                inner.lock_store().get_issues_by_label(&p.label)?,
            )?)
        }

        "add_comment" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
                author: Option<String>,
                text: String,
            }
            let p: P = params(raw)?;
            let author = actor_or_default(p.author);
            let comment = inner.lock_store().add_comment(&p.id, &author, &p.text)?;
            Ok(serde_json::to_value(comment)?)
        }

        "get_comments" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
            }
            let p: P = params(raw)?;
            Ok(serde_json::to_value(inner.lock_store().get_comments(&p.id)?)?)
        }

        "record_event" => {
            #[derive(Deserialize)]
            struct P {
                event: Event,
            }
            let p: P = params(raw)?;
            inner.lock_store().record_event(&p.event)?;
            Ok(json!({"ok": true}))
        }

        "get_events" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
                #[serde(default)]
                limit: usize,
            }
            let p: P = params(raw)?;
            Ok(serde_json::to_value(
                inner.lock_store().get_events(&p.id, p.limit)?,
            )?)
        }

        "get_config" | "delete_config" => {
            #[derive(Deserialize)]
            struct P {
                key: String,
            }
            let p: P = params(raw)?;
            if method == "get_config" {
                Ok(serde_json::to_value(inner.lock_store().get_config(&p.key)?)?)
            } else {
                let removed = inner.lock_store().delete_config(&p.key)?;
                Ok(json!({"removed": removed}))
            }
        }

        "set_config" | "set_metadata" => {
            #[derive(Deserialize)]
            struct P {
                key: String,
                value: String,
            }
            let p: P = params(raw)?;
            let mut store = inner.lock_store();
            if method == "set_config" {
                store.set_config(&p.key, &p.value)?;
            } else {
                store.set_metadata(&p.key, &p.value)?;
            }
            Ok(json!({"ok": true}))
        }

        "get_all_config" => Ok(serde_json::to_value(inner.lock_store().get_all_config()?)?),

        "get_metadata" => {
            #[derive(Deserialize)]
            struct P {
                key: String,
            }
            let p: P = params(raw)?;
            Ok(serde_json::to_value(inner.lock_store().get_metadata(&p.key)?)?)
        }

        "increment_counter" | "get_counter" => {
            #[derive(Deserialize)]
            struct P {
                prefix: String,
            }
            let p: P = params(raw)?;
            let mut store = inner.lock_store();
            if method == "increment_counter" {
                Ok(json!({"value": store.increment_counter(&p.prefix)?}))
            } else {
                Ok(json!({"value": store.get_counter(&p.prefix)?}))
            }
        }

        "rename_counter_prefix" => {
            #[derive(Deserialize)]
            struct P {
                old: String,
                new: String,
            }
            let p: P = params(raw)?;
            inner.lock_store().rename_counter_prefix(&p.old, &p.new)?;
            Ok(json!({"ok": true}))
        }

        "sync_all_counters" => {
            inner.lock_store().sync_all_counters()?;
            Ok(json!({"ok": true}))
        }

        "get_dirty_issues" => Ok(serde_json::to_value(
            inner.lock_store().get_dirty_issues()?,
        )?),

        "clear_dirty_issues" => {
            let cleared = inner.lock_store().clear_dirty_issues()?;
            Ok(json!({"cleared": cleared}))
        }

        "clear_dirty_issues_by_id" => {
            #[derive(Deserialize)]
            struct P {
                ids: Vec<String>,
            }
            let p: P = params(raw)?;
            let cleared = inner.lock_store().clear_dirty_issues_by_id(&p.ids)?;
            Ok(json!({"cleared": cleared}))
        }

        "ready_work" => {
            #[derive(Deserialize, Default)]
            struct P {
                #[serde(default)]
                filter: graph::WorkFilter,
            }
            let p: P = if raw.is_null() { P::default() } else { params(raw)? };
            let store = inner.lock_store();
            Ok(serde_json::to_value(graph::ready_work(
                store.as_ref(),
                &p.filter,
            )?)?)
        }

        "blocked_issues" => {
            let store = inner.lock_store();
            Ok(serde_json::to_value(graph::blocked_issues(store.as_ref())?)?)
        }

        "epics_eligible_for_closure" => {
            let store = inner.lock_store();
            Ok(serde_json::to_value(graph::epics_eligible_for_closure(
                store.as_ref(),
            )?)?)
        }

        "detect_cycles" => {
            // A full graph scan holds the writer lock like other
            // long-running operations.
            let _writer = inner.writer.hold("cycle-scan");
            let store = inner.lock_store();
            Ok(serde_json::to_value(graph::detect_cycles(store.as_ref())?)?)
        }

        "dependency_tree" => {
            #[derive(Deserialize)]
            struct P {
                id: String,
                max_depth: Option<usize>,
                #[serde(default)]
                show_all_paths: bool,
            }
            let p: P = params(raw)?;
            let store = inner.lock_store();
            Ok(serde_json::to_value(graph::dependency_tree(
                store.as_ref(),
                &p.id,
                p.max_depth.unwrap_or(graph::DEFAULT_TREE_DEPTH),
                p.show_all_paths,
            )?)?)
        }

        other => Err(BeadsError::validation(
            "method",
            format!("unknown method: {other}"),
        )),
    }
}
