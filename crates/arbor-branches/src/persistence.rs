//! Best-effort durability for the branch store
//!
//! Mutations enqueue writes and return immediately. A single worker task
//! drains the queue in order, so a delete queued after a put always wins on
//! disk and a load sees every write queued before it. Write failures are
//! logged and dropped; memory stays authoritative.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::branch::Branch;
use crate::error::BranchError;
use crate::Result;

/// Synchronous durable store for branch records.
pub trait BranchBackend: Send + Sync + 'static {
    fn load_all(&self) -> Result<Vec<Branch>>;
    fn put(&self, branch: &Branch) -> Result<()>;
    fn delete(&self, id: &str) -> Result<()>;
}

enum PersistOp {
    Put(Box<Branch>),
    Delete(String),
    Load(oneshot::Sender<Result<Vec<Branch>>>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background writer. Clones share the same queue.
#[derive(Clone)]
pub struct Persistence {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl Persistence {
    /// Start the writer on the current tokio runtime.
    ///
    /// Returns `None` outside a runtime; callers then run in memory only.
    pub fn spawn(backend: Arc<dyn BranchBackend>) -> Option<Self> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime available, branch persistence disabled");
                return None;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<PersistOp>();
        let worker = backend;

        handle.spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    PersistOp::Flush(done) => {
                        let _ = done.send(());
                    }
                    PersistOp::Load(reply) => {
                        let backend = Arc::clone(&worker);
                        let result = tokio::task::spawn_blocking(move || backend.load_all())
                            .await
                            .map_err(|e| BranchError::Worker(e.to_string()))
                            .and_then(|loaded| loaded);
                        let _ = reply.send(result);
                    }
                    PersistOp::Put(branch) => {
                        let backend = Arc::clone(&worker);
                        let id = branch.id.clone();
                        let result =
                            tokio::task::spawn_blocking(move || backend.put(&branch)).await;
                        log_write_result("put", &id, result);
                    }
                    PersistOp::Delete(id) => {
                        let backend = Arc::clone(&worker);
                        let key = id.clone();
                        let result =
                            tokio::task::spawn_blocking(move || backend.delete(&key)).await;
                        log_write_result("delete", &id, result);
                    }
                }
            }
            tracing::debug!("Branch persistence worker stopped");
        });

        Some(Self { tx })
    }

    pub fn put(&self, branch: &Branch) {
        self.send(PersistOp::Put(Box::new(branch.clone())));
    }

    pub fn delete(&self, id: &str) {
        self.send(PersistOp::Delete(id.to_string()));
    }

    /// Wait until every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(PersistOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Read every stored record once all earlier writes have landed.
    pub async fn load_all(&self) -> Result<Vec<Branch>> {
        let (reply, wait) = oneshot::channel();
        self.tx
            .send(PersistOp::Load(reply))
            .map_err(|_| BranchError::Worker("persistence worker is gone".to_string()))?;
        wait.await
            .map_err(|_| BranchError::Worker("persistence worker dropped the load".to_string()))?
    }

    fn send(&self, op: PersistOp) {
        if self.tx.send(op).is_err() {
            tracing::warn!("Branch persistence worker is gone, write dropped");
        }
    }
}

fn log_write_result(
    op: &str,
    id: &str,
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => tracing::trace!(branch_id = %id, op, "Persisted branch"),
        Ok(Err(e)) => {
            tracing::warn!(branch_id = %id, op, error = %e, "Branch persistence failed")
        }
        Err(e) => {
            tracing::warn!(branch_id = %id, op, error = %e, "Branch persistence task failed")
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory backend that can be told to fail.
    #[derive(Default)]
    pub struct MemoryBackend {
        pub records: Mutex<HashMap<String, Branch>>,
        pub fail: Mutex<bool>,
    }

    impl MemoryBackend {
        fn check(&self) -> Result<()> {
            if *self.fail.lock() {
                return Err(BranchError::Worker("backend offline".to_string()));
            }
            Ok(())
        }
    }

    impl BranchBackend for MemoryBackend {
        fn load_all(&self) -> Result<Vec<Branch>> {
            self.check()?;
            Ok(self.records.lock().values().cloned().collect())
        }

        fn put(&self, branch: &Branch) -> Result<()> {
            self.check()?;
            self.records.lock().insert(branch.id.clone(), branch.clone());
            Ok(())
        }

        fn delete(&self, id: &str) -> Result<()> {
            self.check()?;
            self.records.lock().remove(id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryBackend;
    use super::*;

    #[test]
    fn test_spawn_outside_runtime_is_unavailable() {
        let backend: Arc<dyn BranchBackend> = Arc::new(MemoryBackend::default());
        assert!(Persistence::spawn(backend).is_none());
    }

    #[tokio::test]
    async fn test_writes_apply_in_order() {
        let backend = Arc::new(MemoryBackend::default());
        let persistence = Persistence::spawn(backend.clone()).unwrap();

        let branch = Branch::new(None, None, "a".to_string(), String::new());
        persistence.put(&branch);
        persistence.delete(&branch.id);
        persistence.flush().await;

        assert!(backend.records.lock().is_empty());

        persistence.put(&branch);
        persistence.flush().await;
        assert_eq!(persistence.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_sees_queued_writes() {
        let backend = Arc::new(MemoryBackend::default());
        let persistence = Persistence::spawn(backend.clone()).unwrap();

        let kept = Branch::new(None, None, "a".to_string(), String::new());
        let dropped = Branch::new(None, None, "b".to_string(), String::new());
        persistence.put(&kept);
        persistence.put(&dropped);
        persistence.delete(&dropped.id);

        // No flush: the load queues behind the writes
        let loaded = persistence.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, kept.id);
    }

    #[tokio::test]
    async fn test_failed_writes_are_swallowed() {
        let backend = Arc::new(MemoryBackend::default());
        *backend.fail.lock() = true;
        let persistence = Persistence::spawn(backend.clone()).unwrap();

        persistence.put(&Branch::new(None, None, "a".to_string(), String::new()));
        persistence.flush().await;

        assert!(persistence.load_all().await.is_err());
        assert!(backend.records.lock().is_empty());
    }
}
