use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::device::DeviceConnector;
use crate::jobqueue::JobQueue;
use crate::render::Renderer;
use crate::scheduler::RetryScheduler;
use crate::storage::{self, SqliteStorage, Storage};
use crate::subscriber::EventSubscriber;
use crate::worker::Worker;
use crate::{dashboard, listener};

/// Owns the background tasks of a running spooler: the print worker, the
/// event subscription and the HTTP server. All stop when the shutdown token
/// is cancelled.
pub struct Spooler {
    queue: JobQueue,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Spooler {
    /// Open (or create) the job database at `database_url`.
    ///
    /// # Example
    /// ```ignore
    /// let mut spooler = Spooler::open("sqlite://spool.db", RetryScheduler::default()).await?;
    /// let worker = Worker::new(spooler.queue(), gate);
    /// spooler.start_worker(worker);
    /// spooler.start_server(TcpListener::bind("127.0.0.1:5080").await?);
    /// spooler.wait_for_shutdown().await?;
    /// ```
    pub async fn open(database_url: &str, retry: RetryScheduler) -> storage::Result<Self> {
        let storage = SqliteStorage::new(database_url).await?;
        info!(database = %database_url, "Job store opened");
        Ok(Self::with_storage(Arc::new(storage), retry))
    }

    pub fn with_storage(storage: Arc<dyn Storage>, retry: RetryScheduler) -> Self {
        Spooler {
            queue: JobQueue::new(storage, retry),
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Purchase intake at `/purchase` and the operator pages under `/dashboard`.
    pub fn router(&self) -> Router {
        listener::router(self.queue())
            .nest("/dashboard", dashboard::router(self.queue()))
    }

    /// Spawn the single print worker. Call once.
    pub fn start_worker<C, R>(&mut self, worker: Worker<C, R>)
    where
        C: DeviceConnector + 'static,
        C::Device: 'static,
        R: Renderer<C::Device> + 'static,
    {
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            worker.run(shutdown).await;
        });
        self.handles.push(handle);
    }

    pub fn start_subscriber(&mut self, subscriber: EventSubscriber) {
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            subscriber.run(shutdown).await;
        });
        self.handles.push(handle);
    }

    pub fn start_server(&mut self, listener: TcpListener) {
        let app = self.router();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Ok(addr) = listener.local_addr() {
                info!(%addr, "Serving purchase intake and dashboard");
            }
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP server stopped");
            }
        });
        self.handles.push(handle);
    }

    /// Get the shutdown token for external shutdown control
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel all tasks and wait for them to finish. A job being printed is
    /// left pending and picked up again by startup recovery.
    pub async fn shutdown(&mut self) {
        info!("Initiating shutdown");
        self.shutdown.cancel();

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Task ended abnormally");
            }
        }

        info!("Shutdown complete");
    }

    /// Wait for Ctrl+C, or for the token to be cancelled elsewhere, then shut down.
    pub async fn wait_for_shutdown(&mut self) -> std::io::Result<()> {
        let token = self.shutdown.clone();
        let signal = tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = token.cancelled() => Ok(()),
        };
        self.shutdown().await;
        signal
    }
}
