pub mod config;
pub mod dashboard;
pub mod device;
pub mod gate;
pub mod job;
pub mod jobqueue;
pub mod listener;
pub mod render;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod subscriber;
pub mod worker;

pub use config::{Config, ConfigError, Mode};
pub use device::{BoxedDevice, DeviceConnector, DeviceError, PrinterConnector, TcpConnector, UsbLpConnector};
pub use gate::{GateError, RenderGate};
pub use job::{Job, JobId, JobStatus, QueueStats};
pub use jobqueue::JobQueue;
pub use render::{EscPosRenderer, Raster, ReceiptLayout, RenderError, Renderer};
pub use scheduler::RetryScheduler;
pub use server::Spooler;
pub use storage::{SqliteStorage, Storage, StorageError};
pub use subscriber::EventSubscriber;
pub use worker::Worker;
