// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Random-access byte sources.
//!
//! An image is read exclusively through positional reads; the source keeps
//! no seek state, so one source can serve any number of concurrent readers.

use std::fs::File;
use std::io::Result;
use std::sync::Arc;

/// Random access to the bytes of a SquashFS image.
///
/// Implementations must be safe for concurrent `read_at` calls.
pub trait ImageSource: Send + Sync {
    /// Read bytes starting at `offset` into `buf`, returning how many bytes
    /// were read. A short read is not an error; it signals the end of the
    /// source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Fill `buf` completely from `offset`, failing with `UnexpectedEof`
    /// when the source ends first.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.read_at(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "short read from image source",
                ));
            }
            done += n;
        }
        Ok(())
    }
}

impl ImageSource for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

impl ImageSource for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ImageSource for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<S: ImageSource + ?Sized> ImageSource for Arc<S> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<S: ImageSource + ?Sized> ImageSource for Box<S> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        (**self).read_at(buf, offset)
    }
}
