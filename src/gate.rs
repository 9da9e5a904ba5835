use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::device::{DeviceConnector, DeviceError};
use crate::render::{RenderError, Renderer};

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Printer not available: {0}")]
    Connect(#[from] DeviceError),
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),
    #[error("Render timed out after {0:?}")]
    Timeout(Duration),
    #[error("Renderer panicked")]
    Panicked,
    #[error("Render task cancelled")]
    Cancelled,
}

/// Sole owner of the printer handle. The handle is moved out for each
/// attempt and only put back when the attempt succeeds, so any failure
/// leaves the gate disconnected and the next attempt reconnects.
pub struct RenderGate<C: DeviceConnector, R> {
    connector: C,
    renderer: Arc<R>,
    device: Option<C::Device>,
    timeout: Duration,
}

impl<C, R> RenderGate<C, R>
where
    C: DeviceConnector,
    C::Device: 'static,
    R: Renderer<C::Device> + 'static,
{
    pub fn new(connector: C, renderer: R, timeout: Duration) -> Self {
        Self {
            connector,
            renderer: Arc::new(renderer),
            device: None,
            timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Render `payload` on the printer, connecting first if needed.
    pub async fn attempt(&mut self, payload: &Value) -> Result<(), GateError> {
        let device = match self.device.take() {
            Some(device) => device,
            None => {
                let device = self.connector.connect().await?;
                info!(device = %self.connector.describe(), "Printer connected");
                device
            }
        };

        let renderer = Arc::clone(&self.renderer);
        match Self::render(renderer, device, payload.clone(), self.timeout).await {
            Ok(device) => {
                self.device = Some(device);
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.connector.describe(), error = %e, "Dropping printer handle");
                Err(e)
            }
        }
    }

    /// Runs the renderer on its own task so a panic or a hung write cannot
    /// take the worker down with it.
    async fn render(
        renderer: Arc<R>,
        mut device: C::Device,
        payload: Value,
        timeout: Duration,
    ) -> Result<C::Device, GateError> {
        let mut handle = tokio::spawn(async move {
            let result = renderer.render(&payload, &mut device).await;
            result.map(|()| device)
        });

        let join_to_error = |e: JoinError| {
            if e.is_panic() {
                GateError::Panicked
            } else {
                GateError::Cancelled
            }
        };

        tokio::select! {
            res = &mut handle => {
                let device = res.map_err(join_to_error)??;
                debug!("Render finished");
                Ok(device)
            }
            _ = tokio::time::sleep(timeout) => {
                handle.abort();
                Err(GateError::Timeout(timeout))
            }
        }
    }
}
