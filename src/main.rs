use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use receipt_spooler::render::DOTS_PER_CHAR;
use receipt_spooler::{
    Config, EscPosRenderer, EventSubscriber, PrinterConnector, Raster, RenderGate, Spooler, TcpConnector,
    UsbLpConnector, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "receipt_spooler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env(std::env::args().skip(1))?;
    tracing::info!(mode = ?config.mode, "Configuration loaded");

    let mut spooler = Spooler::open(&config.database_url, config.retry_policy())
        .await
        .with_context(|| format!("opening job store {}", config.database_url))?;

    let connector = match &config.printer_addr {
        Some(addr) => PrinterConnector::Tcp(
            TcpConnector::new(addr.clone()).with_connect_timeout(config.printer_connect_timeout),
        ),
        None => PrinterConnector::Usb(UsbLpConnector::new(config.vendor_id, config.product_id)),
    };
    let mut layout = config.receipt_layout();
    if let Some(path) = &config.receipt_logo {
        let max_width = u32::try_from(config.receipt_width).unwrap_or(u32::MAX).saturating_mul(DOTS_PER_CHAR);
        let logo = Raster::open(path, max_width).with_context(|| format!("loading logo {}", path.display()))?;
        layout.logo = Some(logo);
    }
    let renderer = EscPosRenderer::new(layout);
    let gate = RenderGate::new(connector, renderer, config.render_timeout);

    let worker = Worker::new(spooler.queue(), gate)
        .with_poll_interval(config.poll_interval)
        .with_error_pause(config.error_pause);
    spooler.start_worker(worker);

    let subscriber = EventSubscriber::new(spooler.queue(), config.event_url.clone())
        .with_namespace(config.event_namespace.clone())
        .with_event(config.event_name.clone())
        .with_retry_pause(config.error_pause);
    spooler.start_subscriber(subscriber);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    spooler.start_server(listener);

    spooler.wait_for_shutdown().await?;
    Ok(())
}
