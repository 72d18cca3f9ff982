/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    ffi::CString,
    io,
    ptr,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread::JoinHandle,
};

use flashpq::{utils::ResourcePool, AnnError, AnnErrorKind, AnnResult, ErrorContext};
use tracing::{debug, info, warn};
use windows_sys::Win32::{
    Foundation::{CloseHandle, GetLastError, GENERIC_READ, HANDLE, INVALID_HANDLE_VALUE},
    Storage::FileSystem::{
        CreateFileA, ReadFile, FILE_FLAG_NO_BUFFERING, FILE_FLAG_OVERLAPPED,
        FILE_FLAG_RANDOM_ACCESS, FILE_SHARE_READ, OPEN_EXISTING,
    },
    System::IO::{
        CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus, OVERLAPPED,
    },
};

use super::{
    request_is_valid, ReaderOptions, DISK_SECTOR_SIZE, RESOURCE_POOL_CAPACITY,
    RESOURCE_POOL_WARMUP,
};
use crate::request::AsyncReadRequest;

const ERROR_IO_PENDING: u32 = 997;
const INFINITE: u32 = u32::MAX;

/// Owned Windows handle closed on drop.
struct Handle(HANDLE);

// SAFETY: file and completion-port handles may be used from multiple threads
// with the overlapped APIs; exclusivity requirements are handled by the
// reader's own synchronization.
unsafe impl Send for Handle {}
// SAFETY: see above.
unsafe impl Sync for Handle {}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.0 != INVALID_HANDLE_VALUE && !self.0.is_null() {
            // SAFETY: the handle is owned and closed exactly once.
            let result = unsafe { CloseHandle(self.0) };
            if result == 0 {
                // SAFETY: reading the thread-local error code.
                let error = io::Error::from_raw_os_error(unsafe { GetLastError() } as i32);
                warn!(error = %error, "error closing handle");
            }
        }
    }
}

/// Per-request bookkeeping. The embedded `OVERLAPPED` must stay first so the
/// pointer dequeued from the completion port can be cast back to the
/// resource.
#[repr(C)]
struct ReadResource {
    overlapped: OVERLAPPED,
    request: Option<AsyncReadRequest>,
}

// SAFETY: the raw `OVERLAPPED` is only touched by the owning submission and
// the kernel; the resource moves between threads through the pool and the
// completion port.
unsafe impl Send for ReadResource {}

impl Default for ReadResource {
    fn default() -> Self {
        Self {
            // SAFETY: `OVERLAPPED` is a plain C struct for which zeroes are a
            // valid (idle) state.
            overlapped: unsafe { std::mem::zeroed() },
            request: None,
        }
    }
}

struct ReaderShared {
    file: Handle,
    completion_port: Handle,
    resources: ResourcePool<Box<ReadResource>>,
    closed: AtomicBool,
    options: ReaderOptions,
    sector_size: u64,
}

/// Completion-driven file reader for Windows, backed by an I/O completion
/// port serviced by a pool of worker threads.
pub struct WindowsAsyncFileReader {
    shared: Arc<ReaderShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WindowsAsyncFileReader {
    /// Open `path` for unbuffered overlapped reads and start the completion
    /// workers.
    pub fn new(path: &str, options: ReaderOptions) -> AnnResult<Self> {
        let file_name = CString::new(path).map_err(|_| {
            AnnError::message(
                AnnErrorKind::IOError,
                format!("invalid file name: {}", path),
            )
        })?;

        // SAFETY: `file_name` is a valid NUL-terminated string for the
        // duration of the call.
        let file = unsafe {
            CreateFileA(
                file_name.as_ptr() as *const u8,
                GENERIC_READ,
                FILE_SHARE_READ,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_NO_BUFFERING | FILE_FLAG_OVERLAPPED | FILE_FLAG_RANDOM_ACCESS,
                ptr::null_mut(),
            )
        };
        if file == INVALID_HANDLE_VALUE {
            // SAFETY: reading the thread-local error code.
            let error = io::Error::from_raw_os_error(unsafe { GetLastError() } as i32);
            return Err(error).with_context(|| format!("opening {} for unbuffered reads", path));
        }
        let file = Handle(file);

        let thread_pool_size = options.thread_pool_size.max(1);
        // SAFETY: `file` is a valid open handle; a null existing-port handle
        // asks the system to create a new port.
        let completion_port = unsafe {
            CreateIoCompletionPort(file.0, ptr::null_mut(), 0, thread_pool_size as u32)
        };
        if completion_port.is_null() {
            // SAFETY: reading the thread-local error code.
            let error = io::Error::from_raw_os_error(unsafe { GetLastError() } as i32);
            return Err(error).context("creating the I/O completion port");
        }
        let completion_port = Handle(completion_port);

        let shared = Arc::new(ReaderShared {
            file,
            completion_port,
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

    /// The alignment unit submissions are validated against.
    pub fn sector_size(&self) -> u64 {
        self.shared.sector_size
    }

    /// Submit one read; returns whether *submission* succeeded.
    ///
    /// On failure the borrowed resource returns to the pool, the callback is
    /// dropped un-invoked, and `false` is returned.
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
        // SAFETY: zeroes are the idle state the overlapped API expects; the
        // offset fields live behind a union projection.
        unsafe {
            resource.overlapped = std::mem::zeroed();
            resource.overlapped.Anonymous.Anonymous.Offset = offset as u32;
            resource.overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;
        }
        resource.request = Some(request);

        let resource_ptr = Box::into_raw(resource);

        // SAFETY: the handle is open for overlapped reads; the buffer and the
        // overlapped structure stay valid until the completion is dequeued,
        // per the request contract and the leaked resource box.
        let accepted = unsafe {
            let result = ReadFile(
                shared.file.0,
                buffer,
                read_size,
                ptr::null_mut(),
                resource_ptr as *mut OVERLAPPED,
            );
            result != 0 || GetLastError() == ERROR_IO_PENDING
        };

        if !accepted {
            // SAFETY: the kernel rejected the read, so the resource was never
            // handed off and ownership is still ours.
            let mut resource = unsafe { Box::from_raw(resource_ptr) };
            resource.request = None;
            warn!(offset, "read submission failed");
            shared.resources.push(resource);
            return false;
        }

        true
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
    /// resource pool. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("shutting down async file reader");

        for _ in 0..self.workers.len() {
            // SAFETY: posting a packet with a null overlapped pointer, the
            // worker-exit signal.
            let posted = unsafe {
                PostQueuedCompletionStatus(self.shared.completion_port.0, 0, 0, ptr::null_mut())
            };
            if posted == 0 {
                warn!("failed to post a worker exit signal");
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

impl Drop for WindowsAsyncFileReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ReaderShared {
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

/// Worker body: block on the completion port and dispatch one completion at
/// a time. Exits on a dequeue failure with no packet or on the null packet
/// posted by `shutdown`.
fn completion_loop(shared: &ReaderShared) {
    loop {
        let mut bytes_transferred: u32 = 0;
        let mut completion_key: usize = 0;
        let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

        // SAFETY: out-pointers are valid locals; the call blocks until a
        // packet arrives or the port is closed.
        let result = unsafe {
            GetQueuedCompletionStatus(
                shared.completion_port.0,
                &mut bytes_transferred,
                &mut completion_key,
                &mut overlapped,
                INFINITE,
            )
        };

        if overlapped.is_null() {
            // Exit signal or closed port.
            debug!("completion worker exiting");
            return;
        }

        let ok = result != 0;
        if !ok {
            debug!("read completed with an error");
        }

        // SAFETY: every non-null overlapped dequeued from this port is the
        // leading field of a `Box<ReadResource>` leaked at submission time
        // and reaped exactly once.
        let mut resource = unsafe { Box::from_raw(overlapped as *mut ReadResource) };
        let request = resource.request.take();

        // Return the resource before running user code.
        shared.resources.push(resource);

        if let Some(request) = request {
            request.complete(ok);
        }
    }
}
