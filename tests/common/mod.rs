#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use receipt_spooler::{
    DeviceConnector, DeviceError, JobQueue, RenderError, Renderer, RetryScheduler, SqliteStorage,
};
use serde_json::{json, Value};

/// Handle handed out by [`MockConnector`]; `serial` tells connections apart.
#[derive(Debug)]
pub struct MockDevice {
    pub serial: usize,
}

/// Fails the first `failures` connects, then hands out fresh devices.
#[derive(Clone, Default)]
pub struct MockConnector {
    failures: Arc<AtomicU32>,
    connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: Arc::new(AtomicU32::new(failures)),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Successful connects so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    type Device = MockDevice;

    async fn connect(&self) -> Result<MockDevice, DeviceError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(DeviceError::NotFound {
                vendor_id: 0x1fc9,
                product_id: 0x2016,
            });
        }
        let serial = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockDevice { serial })
    }

    fn describe(&self) -> String {
        "mock printer".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Print,
    Fail,
    Hang,
    Panic,
}

/// Plays back scripted outcomes, then `fallback` once the script runs out.
/// Every successful print is recorded with the device serial it used.
#[derive(Clone)]
pub struct ScriptedRenderer {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    fallback: Outcome,
    printed: Arc<Mutex<Vec<(usize, Value)>>>,
}

impl ScriptedRenderer {
    pub fn new(script: impl IntoIterator<Item = Outcome>, fallback: Outcome) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback,
            printed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always(outcome: Outcome) -> Self {
        Self::new([], outcome)
    }

    pub fn printed(&self) -> Vec<(usize, Value)> {
        self.printed.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> Outcome {
        self.script.lock().unwrap().pop_front().unwrap_or(self.fallback)
    }
}

#[async_trait]
impl Renderer<MockDevice> for ScriptedRenderer {
    async fn render(&self, payload: &Value, device: &mut MockDevice) -> Result<(), RenderError> {
        match self.next_outcome() {
            Outcome::Print => {
                self.printed.lock().unwrap().push((device.serial, payload.clone()));
                Ok(())
            }
            Outcome::Fail => Err(RenderError::Io(io::Error::other("paper jam"))),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Outcome::Panic => panic!("renderer blew up"),
        }
    }
}

pub async fn memory_queue(max_attempts: u32, base_delay: Duration) -> JobQueue {
    let storage = SqliteStorage::in_memory().await.unwrap();
    JobQueue::new(Arc::new(storage), RetryScheduler::new(max_attempts, base_delay))
}

pub fn purchase(id: i64) -> Value {
    json!({
        "id": id,
        "purchasedItems": [
            { "item": { "name": "Caffe", "price": 1.2 }, "quantity": 2 }
        ],
        "total": 2.4,
        "givenAmount": 5,
        "paymentMethod": "Contanti",
        "change": 2.6,
        "purchaseDate": "2024-05-01 10:00"
    })
}

/// Poll `check` every few milliseconds until it holds or `limit` passes.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A database file that outlives one `SqliteStorage`, for restart scenarios.
/// The directory is removed when this is dropped.
pub struct FileStore {
    dir: tempfile::TempDir,
}

impl FileStore {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Open the database as a new run would. Close the returned storage's
    /// pool to end the run.
    pub async fn open(&self, retry: RetryScheduler) -> (JobQueue, Arc<SqliteStorage>) {
        let url = format!("sqlite://{}", self.dir.path().join("spool.db").display());
        let storage = Arc::new(SqliteStorage::new(&url).await.unwrap());
        let queue = JobQueue::new(storage.clone(), retry);
        (queue, storage)
    }
}
