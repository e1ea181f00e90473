// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Result;
use std::os::raw::c_char;

use lz4_sys::{LZ4_compressBound, LZ4_compress_default, LZ4_decompress_safe};

pub(super) fn lz4_decompress(src: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if src.len() > i32::MAX as usize || max_size > i32::MAX as usize {
        return Err(einval!("lz4 block is too big"));
    }

    let mut dst_buf = Vec::with_capacity(max_size);
    let dec_bytes = unsafe {
        LZ4_decompress_safe(
            src.as_ptr() as *const c_char,
            dst_buf.as_mut_ptr() as *mut c_char,
            src.len() as i32,
            max_size as i32,
        )
    };

    if dec_bytes < 0 {
        return Err(eio!("lz4 decompression failed"));
    }

    // Safe because LZ4_decompress_safe never writes past max_size.
    unsafe { dst_buf.set_len(dec_bytes as usize) };

    Ok(dst_buf)
}

#[cfg(test)]
pub(super) fn lz4_compress(src: &[u8]) -> Result<Vec<u8>> {
    let bound = unsafe { LZ4_compressBound(src.len() as i32) };
    if src.len() > i32::MAX as usize || bound <= 0 {
        return Err(einval!("compression input data is too big"));
    }

    let mut dst_buf = Vec::with_capacity(bound as usize);
    let cmp_bytes = unsafe {
        LZ4_compress_default(
            src.as_ptr() as *const c_char,
            dst_buf.as_mut_ptr() as *mut c_char,
            src.len() as i32,
            bound,
        )
    };

    if cmp_bytes <= 0 {
        return Err(eio!("lz4 compression failed"));
    }

    unsafe { dst_buf.set_len(cmp_bytes as usize) };

    Ok(dst_buf)
}
