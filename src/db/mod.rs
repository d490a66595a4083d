//! Durable local ledger: the permanent sample history plus the pending
//! delivery queue, both in one SQLite file.
//!
//! A single worker thread owns the connection. Every operation is shipped to
//! it as a closure and executed to completion before the next one starts, so
//! the capture path and the drain timer never observe each other's partial
//! writes and `clear_all` is all-or-nothing for readers.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

mod helpers;
mod migrations;
pub mod models;
mod repositories;

use migrations::run_migrations;
pub use models::{LocationSample, NewSample, PendingDelivery, SampleValidationError};

const EVENT_CAPACITY: usize = 256;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// Change notifications for observers such as a map or list view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum LedgerEvent {
    SampleAppended { id: i64 },
    PendingEnqueued { id: i64 },
    PendingRemoved { id: i64 },
    Cleared,
}

struct LedgerInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for LedgerInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to ledger thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join ledger thread: {join_err:?}");
            }
        }
    }
}

#[derive(Clone)]
pub struct Ledger {
    inner: Arc<LedgerInner>,
    db_path: Arc<PathBuf>,
    events: broadcast::Sender<LedgerEvent>,
    #[cfg(test)]
    append_faults: Arc<std::sync::atomic::AtomicUsize>,
}

impl Ledger {
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create ledger directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("routekeeper-ledger".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get::<_, String>(0)
                }) {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "synchronous", "NORMAL") {
                    error!("Failed to set synchronous mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run ledger migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Ledger initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Ledger thread shutting down");
            })
            .with_context(|| "failed to spawn ledger worker thread")?;

        ready_rx
            .recv()
            .context("ledger worker exited before signaling readiness")??;

        info!("Ledger initialized at {}", db_path.as_path().display());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(LedgerInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
            events,
            #[cfg(test)]
            append_faults: Arc::default(),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Observer interface for views; replaces fixed-interval polling.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Makes the next `count` appends fail before reaching SQLite.
    #[cfg(test)]
    pub(crate) fn fail_next_appends(&self, count: usize) {
        self.append_faults
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_append_fault(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.append_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn notify(&self, event: LedgerEvent) {
        // No subscribers is the normal case for a headless host.
        let _ = self.events.send(event);
    }

    pub(crate) async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Ledger caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to ledger thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("ledger thread terminated unexpectedly"))?
    }
}
