/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    fs::{File, OpenOptions},
    io,
    os::{fd::AsRawFd, unix::fs::OpenOptionsExt},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, MutexGuard,
    },
    thread::JoinHandle,
};

use flashpq::{utils::ResourcePool, AnnResult, ErrorContext};
use io_uring::{cqueue, opcode, squeue, types, IoUring};
use tracing::{debug, info, warn};

use super::{
    request_is_valid, ReaderOptions, DISK_SECTOR_SIZE, RESOURCE_POOL_CAPACITY,
    RESOURCE_POOL_WARMUP,
};
use crate::request::AsyncReadRequest;

/// Submission-queue depth of the ring. Bursts beyond it are absorbed by
/// flushing and retrying up to `max_read_retries` times.
const RING_ENTRIES: u32 = 1024;

/// Sentinel `user_data` carried by the no-op completion that tells a worker
/// to exit.
const EXIT_USER_DATA: u64 = u64::MAX;

/// Per-request bookkeeping recycled through the resource pool. The boxed
/// resource travels through the ring as a raw pointer in `user_data`.
#[derive(Debug, Default)]
struct ReadResource {
    request: Option<AsyncReadRequest>,
}

struct ReaderShared {
    /// Keeps the registered fd alive; reads go through `types::Fixed(0)`.
    _file: File,
    ring: IoUring,
    /// Serializes pushes onto the submission queue.
    submission_lock: Mutex<()>,
    /// Serializes pops from the completion queue.
    completion_lock: Mutex<()>,
    resources: ResourcePool<Box<ReadResource>>,
    closed: AtomicBool,
    options: ReaderOptions,
    sector_size: u64,
}

/// Completion-driven file reader for Linux, backed by a single `io_uring`
/// shared by submitters and a pool of worker threads.
///
/// Submission may be called concurrently from many threads; completions are
/// dispatched on arbitrary workers and carry no ordering guarantee relative
/// to submission order.
pub struct LinuxAsyncFileReader {
    shared: Arc<ReaderShared>,
    workers: Vec<JoinHandle<()>>,
}

impl LinuxAsyncFileReader {
    /// Open `path` for unbuffered reads and start the completion workers.
    ///
    /// Filesystems that reject `O_DIRECT` (tmpfs, some network mounts) fall
    /// back to buffered reads with a warning; the alignment contract on
    /// requests is unchanged.
    pub fn new(path: &str, options: ReaderOptions) -> AnnResult<Self> {
        let file = Self::open_unbuffered(path)?;

        let ring = IoUring::new(RING_ENTRIES).context("creating io_uring")?;
        let fd = file.as_raw_fd();
        ring.submitter()
            .register_files(std::slice::from_ref(&fd))
            .context("registering file with io_uring")?;

        let thread_pool_size = options.thread_pool_size.max(1);
        let shared = Arc::new(ReaderShared {
            _file: file,
            ring,
            submission_lock: Mutex::new(()),
            completion_lock: Mutex::new(()),
            resources: ResourcePool::new(RESOURCE_POOL_CAPACITY),
            closed: AtomicBool::new(false),
            options,
            sector_size: DISK_SECTOR_SIZE,
        });
        shared.warm_up_resources();

        let workers = (0..thread_pool_size)
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("flashpq-io-{index}"))
                    .spawn(move || completion_loop(&shared))
                    .context("spawning completion worker")
            })
            .collect::<AnnResult<Vec<_>>>()?;

        info!(
            path,
            sector_size = shared.sector_size,
            workers = workers.len(),
            "async file reader ready"
        );
        Ok(Self { shared, workers })
    }

    fn open_unbuffered(path: &str) -> AnnResult<File> {
        let direct = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path);

        match direct {
            Ok(file) => Ok(file),
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => {
                warn!(path, "filesystem rejected O_DIRECT, using buffered reads");
                OpenOptions::new()
                    .read(true)
                    .open(path)
                    .with_context(|| format!("opening {} for buffered reads", path))
            }
            Err(err) => Err(err).with_context(|| format!("opening {} for unbuffered reads", path)),
        }
    }

    /// The alignment unit submissions are validated against.
    pub fn sector_size(&self) -> u64 {
        self.shared.sector_size
    }

    /// Submit one read; returns whether *submission* succeeded.
    ///
    /// On success the request's callback will run exactly once on a worker
    /// thread. On failure (closed reader, invalid request, or OS submission
    /// error) the borrowed resource returns to the pool, the callback is
    /// dropped un-invoked, and `false` is returned. Never blocks beyond the
    /// OS submission call.
    pub fn read_async(&self, request: AsyncReadRequest) -> bool {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            warn!("read_async called after shutdown");
            return false;
        }
        if !request_is_valid(&request, shared.sector_size, shared.options.max_io_size) {
            return false;
        }

        let buffer = request.buffer();
        let read_size = request.read_size() as u32;
        let offset = request.offset();

        let mut resource = shared
            .resources
            .pop_or_else(|| Box::new(ReadResource::default()));
        resource.request = Some(request);
        let user_data = Box::into_raw(resource) as u64;

        let entry = opcode::Read::new(types::Fixed(0), buffer, read_size)
            .offset(offset)
            .build()
            .user_data(user_data);

        match shared.submit_entry(entry) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, offset, "read submission failed");
                // SAFETY: `user_data` came from `Box::into_raw` above and the
                // entry never reached the kernel, so ownership is still ours.
                let mut resource = unsafe { Box::from_raw(user_data as *mut ReadResource) };
                resource.request = None;
                shared.resources.push(resource);
                false
            }
        }
    }

    /// Blocking single read: returns the number of bytes read, or 0 on any
    /// failure. `buffer` must be sector aligned and at least `read_size`
    /// bytes.
    pub fn read(&self, read_size: u64, buffer: &mut [u8], offset: u64) -> u64 {
        if (buffer.len() as u64) < read_size {
            warn!(
                read_size,
                buffer_len = buffer.len(),
                "sync read buffer is smaller than the requested size"
            );
            return 0;
        }

        let (sender, receiver) = mpsc::channel();
        // SAFETY: this function blocks on the channel until the callback has
        // fired (or the submission was rejected), so the buffer outlives the
        // read.
        let request = unsafe {
            AsyncReadRequest::new(offset, buffer.as_mut_ptr(), read_size, move |ok| {
                let _ = sender.send(ok);
            })
        };
        let request = match request {
            Ok(request) => request,
            Err(_) => return 0,
        };

        if !self.read_async(request) {
            return 0;
        }

        match receiver.recv() {
            Ok(true) => read_size,
            _ => 0,
        }
    }

    /// Writes are not part of the core; always returns 0.
    pub fn write(&self, _write_size: u64, _buffer: &[u8], _offset: u64) -> u64 {
        0
    }

    /// Stop accepting work, wake and join every worker, and drain the
    /// resource pool. Idempotent. Callbacks of still-outstanding reads are
    /// never fired after this returns; their buffers must outlive the kernel
    /// side of the read regardless.
    pub fn shutdown(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("shutting down async file reader");

        for _ in 0..self.workers.len() {
            let entry = opcode::Nop::new().build().user_data(EXIT_USER_DATA);
            if let Err(err) = self.shared.submit_entry(entry) {
                warn!(error = %err, "failed to post a worker exit signal");
            }
        }

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("completion worker panicked during shutdown");
            }
        }

        self.shared.resources.drain();
        info!("async file reader shut down");
    }
}

impl Drop for LinuxAsyncFileReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ReaderShared {
    /// Push one entry and notify the kernel, flushing and retrying a bounded
    /// number of times if the submission queue is full.
    fn submit_entry(&self, entry: squeue::Entry) -> io::Result<()> {
        let mut attempts = 0u32;
        loop {
            let pushed = {
                let _guard = lock(&self.submission_lock);
                // SAFETY: pushes are serialized by `submission_lock`; the
                // completion side is touched only under `completion_lock`.
                let mut submission = unsafe { self.ring.submission_shared() };
                // SAFETY: the entry's buffer and fd stay valid until its
                // completion is reaped, per the request contract.
                unsafe { submission.push(&entry).is_ok() }
            };

            if pushed {
                self.ring.submit()?;
                return Ok(());
            }

            if attempts >= self.options.max_read_retries {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "io_uring submission queue is full",
                ));
            }
            attempts += 1;
            // Let the kernel drain the queue, then retry.
            self.ring.submit()?;
        }
    }

    fn warm_up_resources(&self) {
        let mut resources = Vec::with_capacity(RESOURCE_POOL_WARMUP);
        for _ in 0..RESOURCE_POOL_WARMUP {
            resources.push(
                self.resources
                    .pop_or_else(|| Box::new(ReadResource::default())),
            );
        }
        for resource in resources {
            self.resources.push(resource);
        }
        debug!(pooled = self.resources.len(), "resource pool warmed up");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            mutex.clear_poison();
            poisoned.into_inner()
        }
    }
}

/// Worker body: block on the ring, reap one completion at a time, and
/// dispatch it. Exits on the sentinel posted by `shutdown`.
fn completion_loop(shared: &ReaderShared) {
    loop {
        let entry = {
            let _guard = lock(&shared.completion_lock);
            // SAFETY: pops are serialized by `completion_lock`; the
            // submission side is touched only under `submission_lock`.
            let mut completion = unsafe { shared.ring.completion_shared() };
            completion.next()
        };

        match entry {
            Some(entry) => {
                if entry.user_data() == EXIT_USER_DATA {
                    debug!("completion worker exiting");
                    return;
                }
                dispatch_completion(shared, &entry);
            }
            None => {
                if shared.closed.load(Ordering::Acquire) {
                    return;
                }
                if let Err(err) = shared.ring.submitter().submit_and_wait(1) {
                    if err.raw_os_error() == Some(libc::EINTR) {
                        continue;
                    }
                    warn!(error = %err, "waiting for completions failed");
                    return;
                }
            }
        }
    }
}

fn dispatch_completion(shared: &ReaderShared, entry: &cqueue::Entry) {
    let ok = entry.result() >= 0;
    if !ok {
        debug!(result = entry.result(), "read completed with an error");
    }

    // SAFETY: every non-sentinel `user_data` in this ring is a
    // `Box<ReadResource>` leaked at submission time and reaped exactly once.
    let mut resource = unsafe { Box::from_raw(entry.user_data() as *mut ReadResource) };
    let request = resource.request.take();

    // Return the resource before running user code.
    shared.resources.push(resource);

    if let Some(request) = request {
        request.complete(ok);
    }
}
