use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No printer with id {vendor_id:04x}:{product_id:04x} is attached")]
    NotFound { vendor_id: u16, product_id: u16 },
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("Device I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Opens a fresh handle to the output device. Called again after every
/// failed attempt, so implementations must not cache handles.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    type Device: Send;

    async fn connect(&self) -> Result<Self::Device, DeviceError>;

    fn describe(&self) -> String;
}

/// Boxed writer so the binary can pick a connector at runtime.
pub type BoxedDevice = Box<dyn AsyncWrite + Send + Unpin>;

/// USB receipt printer exposed by the Linux `usblp` driver as
/// `/dev/usb/lpN`, located by vendor and product id through sysfs.
#[derive(Debug, Clone)]
pub struct UsbLpConnector {
    vendor_id: u16,
    product_id: u16,
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl UsbLpConnector {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            sysfs_root: PathBuf::from("/sys/class/usbmisc"),
            dev_root: PathBuf::from("/dev/usb"),
        }
    }

    pub fn with_roots(mut self, sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = sysfs_root.into();
        self.dev_root = dev_root.into();
        self
    }

    /// Finds the `lpN` node whose USB parent carries our ids.
    async fn locate(&self) -> Result<PathBuf, DeviceError> {
        let mut entries = match tokio::fs::read_dir(&self.sysfs_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.not_found()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("lp") {
                continue;
            }

            // `device` links to the printer interface; the ids live on its parent.
            let usb_dev = entry.path().join("device").join("..");
            let vendor = read_hex_id(&usb_dev.join("idVendor")).await;
            let product = read_hex_id(&usb_dev.join("idProduct")).await;
            debug!(node = name, ?vendor, ?product, "Inspecting usblp node");

            if vendor == Some(self.vendor_id) && product == Some(self.product_id) {
                return Ok(self.dev_root.join(name));
            }
        }

        Err(self.not_found())
    }

    fn not_found(&self) -> DeviceError {
        DeviceError::NotFound {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }
}

async fn read_hex_id(path: &Path) -> Option<u16> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    u16::from_str_radix(raw.trim().trim_start_matches("0x"), 16).ok()
}

#[async_trait]
impl DeviceConnector for UsbLpConnector {
    type Device = tokio::fs::File;

    async fn connect(&self) -> Result<Self::Device, DeviceError> {
        let node = self.locate().await?;
        let file = tokio::fs::OpenOptions::new().write(true).open(&node).await?;
        debug!(node = %node.display(), "Opened printer device");
        Ok(file)
    }

    fn describe(&self) -> String {
        format!("usb {:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Network printer speaking raw ESC/POS on a TCP port (usually 9100).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl DeviceConnector for TcpConnector {
    type Device = TcpStream;

    async fn connect(&self) -> Result<Self::Device, DeviceError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| DeviceError::ConnectTimeout(self.addr.clone()))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.addr)
    }
}

/// Either connector behind one device type, chosen from configuration.
pub enum PrinterConnector {
    Usb(UsbLpConnector),
    Tcp(TcpConnector),
}

#[async_trait]
impl DeviceConnector for PrinterConnector {
    type Device = BoxedDevice;

    async fn connect(&self) -> Result<Self::Device, DeviceError> {
        Ok(match self {
            PrinterConnector::Usb(usb) => Box::new(usb.connect().await?),
            PrinterConnector::Tcp(tcp) => Box::new(tcp.connect().await?),
        })
    }

    fn describe(&self) -> String {
        match self {
            PrinterConnector::Usb(usb) => usb.describe(),
            PrinterConnector::Tcp(tcp) => tcp.describe(),
        }
    }
}
