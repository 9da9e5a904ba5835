use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use rust_socketio::asynchronous::{Client, ClientBuilder};
use rust_socketio::Payload;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{purchase_reference, JobId};
use crate::jobqueue::JobQueue;

/// Long-lived Socket.IO subscription delivering purchase records into the
/// queue. Each `event` on `namespace` is enqueued as one job.
pub struct EventSubscriber {
    queue: JobQueue,
    url: String,
    namespace: String,
    event: String,
    retry_pause: Duration,
}

impl EventSubscriber {
    pub fn new(queue: JobQueue, url: impl Into<String>) -> Self {
        Self {
            queue,
            url: url.into(),
            namespace: "/purchase".to_string(),
            event: "purchase-created".to_string(),
            retry_pause: Duration::from_secs(5),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    /// Pause between failed initial connection attempts
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Connect, retrying until the server answers, then stay subscribed
    /// until shutdown. Dropped connections are re-established by the client.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(url = %self.url, namespace = %self.namespace, "Connecting to event server");

        let client = loop {
            match self.builder().connect().await {
                Ok(client) => break client,
                Err(e) => {
                    error!(url = %self.url, error = %e, "Connection to event server failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.retry_pause) => {}
                    }
                }
            }
        };

        shutdown.cancelled().await;
        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "Disconnect from event server failed");
        }
        info!("Disconnected from event server");
    }

    fn builder(&self) -> ClientBuilder {
        let queue = self.queue.clone();
        ClientBuilder::new(self.url.as_str())
            .namespace(self.namespace.as_str())
            .reconnect(true)
            .reconnect_on_disconnect(true)
            .on("open", |_: Payload, _: Client| -> BoxFuture<'static, ()> {
                async { info!("Connected to event server") }.boxed()
            })
            .on("close", |_: Payload, _: Client| -> BoxFuture<'static, ()> {
                async { warn!("Event server connection closed") }.boxed()
            })
            .on("error", |payload: Payload, _: Client| -> BoxFuture<'static, ()> {
                async move { error!(payload = ?payload, "Event server error") }.boxed()
            })
            .on(self.event.as_str(), move |payload: Payload, _: Client| -> BoxFuture<'static, ()> {
                let queue = queue.clone();
                async move {
                    handle_event(&queue, payload).await;
                }
                .boxed()
            })
    }
}

/// Enqueue the purchase record carried by one event. Returns the new job id,
/// or `None` when the event carried no usable record or the insert failed.
pub async fn handle_event(queue: &JobQueue, payload: Payload) -> Option<JobId> {
    let Some(record) = purchase_record(payload) else {
        warn!("Ignoring purchase event without a JSON object");
        return None;
    };

    info!(purchase = %purchase_reference(&record), "New purchase created");
    match queue.enqueue(record).await {
        Ok(id) => Some(id),
        Err(e) => {
            error!(error = %e, "Failed to enqueue purchase event");
            None
        }
    }
}

/// The first event argument, when it is a JSON object.
pub fn purchase_record(payload: Payload) -> Option<Value> {
    let value = match payload {
        Payload::Text(mut values) if !values.is_empty() => values.swap_remove(0),
        #[allow(deprecated)]
        Payload::String(raw) => serde_json::from_str(&raw).ok()?,
        other => {
            debug!(payload = ?other, "Unsupported event payload");
            return None;
        }
    };
    value.is_object().then_some(value)
}
