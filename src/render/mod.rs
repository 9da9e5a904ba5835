mod escpos;
mod logo;
mod receipt;

use async_trait::async_trait;
use serde_json::Value;

pub use escpos::{Align, EscPos};
pub use logo::{Raster, DOTS_PER_CHAR};
pub use receipt::{format_columns, format_price, EscPosRenderer, ReceiptLayout};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Invalid purchase record: {0}")]
    InvalidPayload(String),
    #[error("Write to printer failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot load logo: {0}")]
    Logo(#[from] image::ImageError),
}

/// Turns a purchase record into output on an open device handle.
#[async_trait]
pub trait Renderer<D: Send>: Send + Sync {
    async fn render(&self, payload: &Value, device: &mut D) -> Result<(), RenderError>;
}
