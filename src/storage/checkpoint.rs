//! Background checkpointing of fusion groups.
//!
//! A dedicated thread wakes up once per persist interval, snapshots the
//! group store under its read lock and rewrites the class files whose
//! content changed. Explicit flushes and shutdown go through a bounded
//! control channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, error, info};

use crate::config::CheckpointConfig;
use crate::entity::EntityType;

use super::{ClassStore, FusionGroupStore, StorageError};

enum ControlMsg {
    Flush { reply: Sender<Result<usize, StorageError>> },
    Shutdown,
}

/// Writes changed classes and remembers what is on disk.
struct Checkpointer {
    groups: Arc<FusionGroupStore>,
    store: Arc<dyn ClassStore>,
    digests: HashMap<EntityType, blake3::Hash>,
    persisted_revision: Option<u64>,
}

impl Checkpointer {
    /// Returns the number of class files written.
    ///
    /// Without `force`, nothing is done when the store revision has not
    /// moved since the last fully successful pass.
    fn persist(&mut self, force: bool) -> Result<usize, StorageError> {
        if !force && self.persisted_revision == Some(self.groups.revision()) {
            return Ok(0);
        }

        let snapshot = self.groups.snapshot()?;
        let mut written = 0usize;
        let mut first_error = None;

        for (class, entities) in &snapshot.classes {
            let bytes = serde_json::to_vec(entities).map_err(|e| StorageError::SerializationError(e.to_string()))?;
            let digest = blake3::hash(&bytes);
            if self.digests.get(class) == Some(&digest) {
                continue;
            }
            match self.store.save_class(class, entities) {
                Ok(()) => {
                    self.digests.insert(class.clone(), digest);
                    written += 1;
                }
                Err(e) => {
                    error!(class = %class, error = %e, "checkpoint write failed; previous file kept");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        self.persisted_revision = Some(snapshot.revision);
        if written > 0 {
            debug!(classes = written, revision = snapshot.revision, "checkpoint written");
        }
        Ok(written)
    }
}

/// Handle to the checkpoint thread.
///
/// Dropping the handle performs a final checkpoint and joins the thread.
pub struct CheckpointWorker {
    control_tx: Sender<ControlMsg>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl CheckpointWorker {
    /// Starts the worker.
    ///
    /// Classes already present in `groups` are assumed to match `store`
    /// (they were normally just loaded from it) and are not rewritten until
    /// they change.
    pub fn spawn(groups: Arc<FusionGroupStore>, store: Arc<dyn ClassStore>, cfg: &CheckpointConfig) -> Self {
        let (control_tx, control_rx) = bounded(cfg.channel_capacity.max(1));

        let mut checkpointer = Checkpointer {
            persisted_revision: Some(groups.revision()),
            groups,
            store,
            digests: HashMap::new(),
        };
        if let Ok(snapshot) = checkpointer.groups.snapshot() {
            for (class, entities) in &snapshot.classes {
                if let Ok(bytes) = serde_json::to_vec(entities) {
                    checkpointer.digests.insert(class.clone(), blake3::hash(&bytes));
                }
            }
        }

        let interval = cfg.persist_interval;
        let join = thread::Builder::new()
            .name("kgfusion-checkpoint".to_string())
            .spawn(move || worker_loop(checkpointer, interval, control_rx))
            .expect("failed to spawn kgfusion checkpoint worker");

        Self {
            control_tx,
            join: Mutex::new(Some(join)),
        }
    }

    /// Writes every changed class now, bypassing the interval.
    pub fn flush(&self) -> Result<usize, StorageError> {
        let (reply, reply_rx) = bounded(1);
        self.control_tx
            .send(ControlMsg::Flush { reply })
            .map_err(|_| StorageError::BackendError("checkpoint worker stopped".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| StorageError::BackendError("checkpoint worker stopped".to_string()))?
    }

    /// Final checkpoint, then stops and joins the thread. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.control_tx.send(ControlMsg::Shutdown);
        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    error!("checkpoint worker panicked");
                }
            }
        }
    }
}

impl Drop for CheckpointWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(mut checkpointer: Checkpointer, interval: std::time::Duration, control_rx: Receiver<ControlMsg>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                // failures are logged inside; the next tick retries
                let _ = checkpointer.persist(false);
            }
            recv(control_rx) -> msg => {
                match msg {
                    Ok(ControlMsg::Flush { reply }) => {
                        let _ = reply.send(checkpointer.persist(true));
                    }
                    Ok(ControlMsg::Shutdown) | Err(_) => {
                        let _ = checkpointer.persist(false);
                        info!("checkpoint worker stopped");
                        break;
                    }
                }
            }
        }
    }
}
