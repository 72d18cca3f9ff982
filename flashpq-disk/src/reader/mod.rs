/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Platform-specific completion-driven file readers behind one interface.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::request::AsyncReadRequest;

/// Alignment unit for offsets, sizes, and destination buffers of unbuffered
/// reads.
pub const DISK_SECTOR_SIZE: u64 = 512;

/// Maximum number of per-request resources retained for reuse.
pub(crate) const RESOURCE_POOL_CAPACITY: usize = 128;

/// Number of resources cycled through the pool at startup to amortize
/// first-use allocation latency.
pub(crate) const RESOURCE_POOL_WARMUP: usize = 4096;

/// Tuning knobs for an asynchronous file reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderOptions {
    /// Largest read `read_async` accepts.
    pub max_io_size: u64,

    /// Submission retry budget when the OS submission queue is transiently
    /// full.
    pub max_read_retries: u32,

    /// Carried for interface parity; the core does not implement writes.
    pub max_write_retries: u32,

    /// Number of completion worker threads.
    pub thread_pool_size: u16,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_io_size: 1 << 20,
            max_read_retries: 2,
            max_write_retries: 2,
            thread_pool_size: 4,
        }
    }
}

/// Check the submission preconditions shared by every platform: sector
/// alignment of offset, size, and buffer address, and the configured size
/// ceiling.
pub(crate) fn request_is_valid(
    request: &AsyncReadRequest,
    sector_size: u64,
    max_io_size: u64,
) -> bool {
    if request.read_size() == 0 || request.read_size() > max_io_size {
        warn!(
            read_size = request.read_size(),
            max_io_size, "rejecting read request with out-of-bounds size"
        );
        return false;
    }

    let misaligned = request.offset() % sector_size != 0
        || request.read_size() % sector_size != 0
        || (request.buffer() as u64) % sector_size != 0;
    if misaligned {
        warn!(
            offset = request.offset(),
            read_size = request.read_size(),
            sector_size,
            "rejecting read request that is not sector aligned"
        );
        return false;
    }

    true
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::LinuxAsyncFileReader;
    } else if #[cfg(windows)] {
        mod windows;
        pub use windows::WindowsAsyncFileReader;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(offset: u64, size: u64, buffer: &mut [u8]) -> AsyncReadRequest {
        // SAFETY: validation never dereferences the buffer.
        unsafe { AsyncReadRequest::new(offset, buffer.as_mut_ptr(), size, |_| {}) }.unwrap()
    }

    #[test]
    fn default_options() {
        let options = ReaderOptions::default();
        assert_eq!(options.max_io_size, 1 << 20);
        assert_eq!(options.max_read_retries, 2);
        assert_eq!(options.max_write_retries, 2);
        assert_eq!(options.thread_pool_size, 4);
    }

    #[test]
    fn validation_rejects_misalignment_and_oversize() {
        let mut backing = crate::AlignedBoxWithSlice::<u8>::new(8192, 4096).unwrap();
        let ptr_is_aligned = (backing.as_ptr() as u64) % DISK_SECTOR_SIZE == 0;
        assert!(ptr_is_aligned);

        let ok = request(0, 4096, &mut backing);
        assert!(request_is_valid(&ok, DISK_SECTOR_SIZE, 1 << 20));

        let bad_offset = request(100, 4096, &mut backing);
        assert!(!request_is_valid(&bad_offset, DISK_SECTOR_SIZE, 1 << 20));

        let bad_size = request(0, 100, &mut backing);
        assert!(!request_is_valid(&bad_size, DISK_SECTOR_SIZE, 1 << 20));

        let zero_size = request(0, 0, &mut backing);
        assert!(!request_is_valid(&zero_size, DISK_SECTOR_SIZE, 1 << 20));

        let oversize = request(0, 8192, &mut backing);
        assert!(!request_is_valid(&oversize, DISK_SECTOR_SIZE, 4096));
    }
}
