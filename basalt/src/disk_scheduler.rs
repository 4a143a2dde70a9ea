use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::pager::Pager;
use crate::PageId;

/// The payload of a disk request: writes own their buffer, reads fill a
/// shared one.
pub enum DiskData {
    Write(Box<[u8]>),
    Read(Arc<Mutex<Box<[u8]>>>),
}

/// A single page read or write, completed through `done`. The direction
/// is carried by the `DiskData` variant.
pub struct DiskRequest {
    pub data: DiskData,
    pub page_id: PageId,
    pub done: Sender<bool>,
}

/// Blocks the submitting thread until its request finishes. The flag is
/// `false` when the I/O failed or the scheduler shut down early.
pub struct Completion {
    rx: Receiver<bool>,
}

impl Completion {
    pub fn wait(self) -> bool {
        self.rx.recv().unwrap_or(false)
    }
}

/// Schedules page I/O onto a single background worker. One worker draining
/// one queue means requests against the same page complete in submission
/// order.
pub struct DiskScheduler {
    queue: Option<Sender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(mut pager: Pager) -> Self {
        let (tx, rx) = mpsc::channel::<DiskRequest>();

        let worker = std::thread::spawn(move || {
            while let Ok(request) = rx.recv() {
                // I/O errors update the completion flag but never take the
                // worker down with them.
                let ok = match &request.data {
                    DiskData::Write(data) => pager.write_page(request.page_id, data).is_ok(),
                    DiskData::Read(buffer) => {
                        let mut buffer = buffer.lock().unwrap();
                        pager.read_page(request.page_id, &mut buffer).is_ok()
                    }
                };
                let _ = request.done.send(ok);
            }
        });

        Self {
            queue: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn create_completion() -> (Sender<bool>, Completion) {
        let (tx, rx) = mpsc::channel();
        (tx, Completion { rx })
    }

    pub fn schedule(&self, request: DiskRequest) {
        if let Some(queue) = &self.queue {
            let _ = queue.send(request);
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain outstanding requests and
        // exit its recv loop.
        drop(self.queue.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
