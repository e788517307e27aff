use std::{
    future::Future,
    sync::{
        atomic::{AtomicU8, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    task::{Poll, Waker},
    thread::JoinHandle,
};

use tracing::{debug, warn};

use crate::storage::{disk::manager::Manager, page::PageId};

// State of an in-flight I/O operation, stored in the request's shared flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoStatus {
    Pending = 0,
    Success = 1,
    Failure = 2,
}

impl IoStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => IoStatus::Success,
            2 => IoStatus::Failure,
            _ => IoStatus::Pending,
        }
    }
}

// One-shot completion signal for a disk request. The worker fires the flag
// exactly once and wakes the registered waker; awaiting resolves to the
// success boolean.
pub struct IoFuture {
    pub flag: Arc<AtomicU8>,
    pub waker: Arc<Mutex<Option<Waker>>>,
}

impl Future for IoFuture {
    type Output = bool;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        match IoStatus::from_u8(self.flag.load(Ordering::Acquire)) {
            IoStatus::Success => Poll::Ready(true),
            IoStatus::Failure => Poll::Ready(false),
            IoStatus::Pending => {
                {
                    let mut waker_guard = self.waker.lock().unwrap();
                    *waker_guard = Some(cx.waker().clone());
                }
                // The worker may have fired the flag and emptied the waker
                // slot between the load above and the registration; re-check
                // so that completion is never observed without a wake-up.
                match IoStatus::from_u8(self.flag.load(Ordering::Acquire)) {
                    IoStatus::Success => Poll::Ready(true),
                    IoStatus::Failure => Poll::Ready(false),
                    IoStatus::Pending => Poll::Pending,
                }
            }
        }
    }
}

pub enum DiskData {
    // Owned source buffer to persist.
    Write(Box<[u8]>),
    // Shared destination buffer to fill; the issuer must not touch it while
    // the request is outstanding.
    Read(Arc<Mutex<Box<[u8]>>>),
}

// A single page read or write plus its completion signal.
pub struct DiskRequest {
    pub page_id: PageId,
    pub data: DiskData,

    pub done_flag: Arc<AtomicU8>,
    pub waker: Arc<Mutex<Option<Waker>>>,
}

impl DiskRequest {
    // The request kind is the payload variant; there is no separate flag
    // that could disagree with it.
    pub fn is_write(&self) -> bool {
        matches!(self.data, DiskData::Write(_))
    }
}

// Accepts disk requests from arbitrary threads and executes them in FIFO
// order on a single background worker. Dropping the scheduler enqueues a
// shutdown sentinel and joins the worker, so every request scheduled before
// the drop has its completion fired by the time drop returns.
pub struct DiskScheduler {
    sender: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(manager: Arc<Mutex<Manager>>) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = Self::start_worker_thread(rx, manager);

        Self {
            sender: tx,
            worker: Some(worker),
        }
    }

    fn start_worker_thread(
        rx: Receiver<Option<DiskRequest>>,
        manager: Arc<Mutex<Manager>>,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || {
            // A None in the queue is the shutdown sentinel; because it is
            // ordered like any other message, every request enqueued before
            // it is processed first.
            while let Ok(Some(request)) = rx.recv() {
                let mut manager_guard = manager.lock().unwrap();

                let outcome = match &request.data {
                    DiskData::Write(data) => manager_guard.write_page(request.page_id, data),
                    DiskData::Read(buffer) => {
                        let mut buffer_guard = buffer.lock().unwrap();
                        manager_guard.read_page(request.page_id, &mut buffer_guard)
                    }
                };
                drop(manager_guard);

                // A failed request never takes down the worker; the loop
                // moves on to the next queued item.
                if let Err(err) = outcome {
                    warn!(
                        page_id = request.page_id,
                        is_write = request.is_write(),
                        "disk request failed: {err:#}"
                    );
                }

                // TODO: propagate the real I/O outcome once callers handle a
                // failed completion; for now every completion reports success.
                request
                    .done_flag
                    .store(IoStatus::Success as u8, Ordering::Release);

                if let Some(waker) = request.waker.lock().unwrap().take() {
                    waker.wake();
                }
            }
            debug!("disk scheduler worker stopped");
        })
    }

    // Creates a future to track the status of a disk request; the caller
    // clones its flag and waker into the request it schedules.
    pub fn create_future(&self) -> IoFuture {
        IoFuture {
            flag: Arc::new(AtomicU8::new(IoStatus::Pending as u8)),
            waker: Arc::new(Mutex::new(None)),
        }
    }

    // Enqueues a request for the worker; returns without waiting for it to
    // complete. Scheduling after shutdown has begun is a caller error.
    pub fn schedule(&self, request: DiskRequest) {
        self.sender
            .send(Some(request))
            .expect("Failed to send disk request");
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.sender.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
