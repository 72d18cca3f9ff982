/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! # flashpq-disk
//!
//! A high-throughput asynchronous block reader for fetching posting lists and
//! candidate vectors from SSD during search. Reads are submitted against an
//! unbuffered file handle and dispatched to one-shot callbacks from a small
//! pool of completion worker threads; per-request bookkeeping is recycled
//! through a bounded resource pool so steady-state submission allocates
//! nothing.
#![cfg_attr(
    not(test),
    warn(clippy::panic, clippy::unwrap_used, clippy::expect_used)
)]

mod aligned;
pub use aligned::AlignedBoxWithSlice;

mod request;
pub use request::AsyncReadRequest;

pub mod reader;
pub use reader::{ReaderOptions, DISK_SECTOR_SIZE};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub use reader::LinuxAsyncFileReader;
        pub use reader::LinuxAsyncFileReader as AsyncFileReader;
    } else if #[cfg(windows)] {
        pub use reader::WindowsAsyncFileReader;
        pub use reader::WindowsAsyncFileReader as AsyncFileReader;
    }
}
