/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{fmt, ptr::NonNull};

use flashpq::{AnnError, AnnErrorKind, AnnResult};

/// One asynchronous read: where to read from, how much, where the bytes land,
/// and the one-shot callback to run on completion.
///
/// The reader borrows the request for the duration of a single read and never
/// frees the destination buffer; the callback receives `true` on a normal
/// completion and `false` on an OS-reported I/O error. If submission fails
/// the callback is dropped without ever being invoked.
pub struct AsyncReadRequest {
    offset: u64,
    read_size: u64,
    buffer: NonNull<u8>,
    callback: Box<dyn FnOnce(bool) + Send + 'static>,
}

// SAFETY: the buffer pointer is only dereferenced by the kernel and by the
// caller, under the lifetime contract of [`AsyncReadRequest::new`]; the
// callback is `Send` by bound.
unsafe impl Send for AsyncReadRequest {}

impl AsyncReadRequest {
    /// Describe a read of `read_size` bytes at `offset` into `buffer`.
    ///
    /// # Safety
    ///
    /// `buffer` must point to at least `read_size` writable bytes and stay
    /// valid, and untouched by other code, until the callback fires, the
    /// submission is rejected, or the reader is shut down, whichever happens
    /// last. Offset, size, and buffer address must honor the reader's sector
    /// alignment for the submission to be accepted.
    pub unsafe fn new<F>(
        offset: u64,
        buffer: *mut u8,
        read_size: u64,
        callback: F,
    ) -> AnnResult<Self>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let buffer = NonNull::new(buffer).ok_or_else(|| {
            AnnError::message(
                AnnErrorKind::AsyncIOError,
                "read request constructed with a null buffer",
            )
        })?;

        Ok(Self {
            offset,
            read_size,
            buffer,
            callback: Box::new(callback),
        })
    }

    /// Byte offset of the read within the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes to read.
    pub fn read_size(&self) -> u64 {
        self.read_size
    }

    /// The destination buffer.
    pub fn buffer(&self) -> *mut u8 {
        self.buffer.as_ptr()
    }

    /// Consume the request and run its callback.
    pub(crate) fn complete(self, ok: bool) {
        (self.callback)(ok);
    }
}

impl fmt::Debug for AsyncReadRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AsyncReadRequest")
            .field("offset", &self.offset)
            .field("read_size", &self.read_size)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn null_buffer_is_rejected() {
        // SAFETY: a null buffer never escapes `new`.
        let result = unsafe { AsyncReadRequest::new(0, std::ptr::null_mut(), 512, |_| {}) };
        assert!(result.is_err());
    }

    #[test]
    fn complete_runs_the_callback_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut buffer = [0u8; 512];

        let calls_in_callback = Arc::clone(&calls);
        // SAFETY: the buffer outlives the request; the callback runs before
        // this test returns.
        let request = unsafe {
            AsyncReadRequest::new(0, buffer.as_mut_ptr(), 512, move |ok| {
                assert!(ok);
                calls_in_callback.fetch_add(1, Ordering::SeqCst);
            })
        }
        .unwrap();

        assert_eq!(request.offset(), 0);
        assert_eq!(request.read_size(), 512);

        request.complete(true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_a_request_never_invokes_the_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut buffer = [0u8; 512];

        let calls_in_callback = Arc::clone(&calls);
        // SAFETY: the buffer outlives the request.
        let request = unsafe {
            AsyncReadRequest::new(0, buffer.as_mut_ptr(), 512, move |_| {
                calls_in_callback.fetch_add(1, Ordering::SeqCst);
            })
        }
        .unwrap();

        drop(request);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
