use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::escpos::{Align, EscPos};
use super::logo::Raster;
use super::{RenderError, Renderer};

/// Paper geometry and the fixed shop text printed on every receipt.
#[derive(Debug, Clone)]
pub struct ReceiptLayout {
    /// Characters per line in the default font.
    pub width: usize,
    pub rule_width: usize,
    pub header_lines: Vec<String>,
    pub footer: String,
    pub logo: Option<Raster>,
}

impl Default for ReceiptLayout {
    fn default() -> Self {
        Self {
            width: 48,
            rule_width: 32,
            header_lines: Vec::new(),
            footer: "Grazie e arrivederci!".to_string(),
            logo: None,
        }
    }
}

/// Prints purchase records as non-fiscal ESC/POS receipts.
#[derive(Debug, Clone, Default)]
pub struct EscPosRenderer {
    layout: ReceiptLayout,
}

impl EscPosRenderer {
    pub fn new(layout: ReceiptLayout) -> Self {
        Self { layout }
    }

    pub fn receipt(&self, data: &Value) -> Result<Vec<u8>, RenderError> {
        let width = self.layout.width;
        let rule = "-".repeat(self.layout.rule_width);

        let items = data
            .get("purchasedItems")
            .and_then(Value::as_array)
            .ok_or_else(|| missing("purchasedItems"))?;

        let mut cmd = EscPos::new();
        cmd.init().align(Align::Center).normal_size();
        if let Some(logo) = &self.layout.logo {
            cmd.raster(logo);
        }
        cmd.text("\n");
        for line in &self.layout.header_lines {
            cmd.line(line);
        }
        cmd.line(&rule);

        // Full-width rows wrap on the printer, so they carry no newline.
        cmd.align(Align::Left);
        cmd.text(&format_columns("DESCRIZIONE", "EURO", width));

        for (i, purchased) in items.iter().enumerate() {
            let item = purchased
                .get("item")
                .ok_or_else(|| missing(&format!("purchasedItems[{i}].item")))?;
            let name = field(item, "name").map_err(|_| missing(&format!("purchasedItems[{i}].item.name")))?;
            let price = item
                .get("price")
                .ok_or_else(|| missing(&format!("purchasedItems[{i}].item.price")))?;
            let quantity = field(purchased, "quantity")
                .map_err(|_| missing(&format!("purchasedItems[{i}].quantity")))?;
            let right = format!("{quantity}x {}", format_price(price));
            cmd.text(&format_columns(&name, &right, width));
        }

        cmd.align(Align::Center).line(&rule);

        cmd.align(Align::Left);
        cmd.text(&format_columns("TOTALE COMPLESSIVO", &format_price(required(data, "total")?), width));
        cmd.text(&format_columns(
            &field(data, "paymentMethod")?,
            &format_price(required(data, "givenAmount")?),
            width,
        ));
        if let Some(change) = data.get("change").filter(|v| is_truthy(v)) {
            cmd.text(&format_columns("Resto", &format_price(change), width));
        }

        cmd.align(Align::Center);
        cmd.text(&format!("\n\n{}\n", field(data, "purchaseDate")?));
        cmd.text(&format!("\nID Acquisto: #{:0>4}\n", field(data, "id")?));
        cmd.line("*NON FISCALE*");
        cmd.text(&format!("\n{}\n", self.layout.footer));
        cmd.feed(3).cut();

        Ok(cmd.into_bytes())
    }
}

#[async_trait]
impl<D> Renderer<D> for EscPosRenderer
where
    D: AsyncWrite + Unpin + Send,
{
    async fn render(&self, payload: &Value, device: &mut D) -> Result<(), RenderError> {
        let bytes = self.receipt(payload)?;
        device.write_all(&bytes).await?;
        device.flush().await?;
        Ok(())
    }
}

/// Lays out one row of `width` characters: `left` flush left, `right` flush
/// right. When both do not fit they are joined by one space and truncated.
pub fn format_columns(left: &str, right: &str, width: usize) -> String {
    let left_len = left.chars().count();
    let right_len = right.chars().count();

    if left_len + right_len < width {
        let gap = width - left_len - right_len;
        format!("{left}{}{right}", " ".repeat(gap))
    } else {
        let joined: String = format!("{left} {right}").chars().take(width).collect();
        format!("{joined:<width$}")
    }
}

/// Italian price format: two decimals, comma separator, ` EUR` suffix.
/// Values that are not numbers are printed as they came.
pub fn format_price(price: &Value) -> String {
    let raw = display(price);
    match raw.trim().replace(',', ".").parse::<f64>() {
        Ok(amount) if amount.is_finite() => format!("{} EUR", format!("{amount:.2}").replace('.', ",")),
        _ => raw,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn missing(name: &str) -> RenderError {
    RenderError::InvalidPayload(format!("missing field `{name}`"))
}

fn required<'a>(data: &'a Value, name: &str) -> Result<&'a Value, RenderError> {
    data.get(name).filter(|v| !v.is_null()).ok_or_else(|| missing(name))
}

fn field(data: &Value, name: &str) -> Result<String, RenderError> {
    required(data, name).map(display)
}
