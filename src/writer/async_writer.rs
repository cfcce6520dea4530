use super::RotatingWriter;
use crate::config::Options;
use crate::error::{RotalogError, Result};
use std::sync::Arc;
use tokio::task::JoinError;

fn task_failed(e: JoinError) -> RotalogError {
    RotalogError::TaskFailed(e.to_string())
}

/// Async handle to a [`RotatingWriter`] for use from tokio tasks
///
/// Each call runs the blocking file I/O on tokio's blocking pool. Clones
/// share the same writer, so writes from many tasks are serialized by the
/// writer's lock.
#[derive(Debug, Clone)]
pub struct AsyncRotatingWriter {
    inner: Arc<RotatingWriter>,
}

impl AsyncRotatingWriter {
    pub async fn open(options: Options) -> Result<Self> {
        let writer = tokio::task::spawn_blocking(move || RotatingWriter::open(options))
            .await
            .map_err(task_failed)??;

        Ok(Self::from_writer(writer))
    }

    pub fn from_writer(writer: RotatingWriter) -> Self {
        Self {
            inner: Arc::new(writer),
        }
    }

    /// Append `data` to the active file, see [`RotatingWriter::write`]
    pub async fn write(&self, data: impl Into<Vec<u8>>) -> Result<usize> {
        let inner = Arc::clone(&self.inner);
        let data = data.into();
        tokio::task::spawn_blocking(move || inner.write(&data))
            .await
            .map_err(task_failed)?
    }

    pub async fn sync(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.sync())
            .await
            .map_err(task_failed)?
    }

    pub async fn close(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.close())
            .await
            .map_err(task_failed)?
    }

    /// The underlying synchronous writer
    pub fn inner(&self) -> &RotatingWriter {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_async_write_and_close() {
        let storage = MemoryStorage::new();
        let writer = AsyncRotatingWriter::open(Options::new("/logs").with_storage(storage.clone()))
            .await
            .unwrap();

        let n = writer.write(b"hello".to_vec()).await.unwrap();
        assert_eq!(n, 5);

        let path = writer.inner().active_path().unwrap();
        writer.close().await.unwrap();

        assert_eq!(storage.contents(&path).unwrap(), b"hello");
        assert!(writer.write("late").await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_async_concurrent_tasks_share_writer() {
        let storage = MemoryStorage::new();
        let writer = AsyncRotatingWriter::open(Options::new("/logs").with_storage(storage))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.write(format!("task-{}\n", i)).await.unwrap()
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(writer.inner().bytes_written(), total as u64);
        writer.sync().await.unwrap();
    }
}
