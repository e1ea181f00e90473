// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Errno-style error macros.
//!
//! `einval!("...")` and friends build a `std::io::Error` from the matching
//! libc error code and log the failure with its source location, so the
//! place a parse or I/O step went wrong is visible without threading
//! context strings through every layer.

use std::env;
use std::fmt::Debug;

use backtrace::Backtrace;

/// Whether error sites should dump a backtrace as well: debug builds only,
/// gated by the standard `RUST_BACKTRACE` variable.
fn backtrace_enabled() -> bool {
    cfg!(debug_assertions)
        && env::var("RUST_BACKTRACE")
            .map(|v| v.trim() != "0")
            .unwrap_or(false)
}

/// Log an error's origin with its source location and hand the prepared
/// `io::Error` back. Called through the error macros, not directly.
pub fn log_error_site(
    err: std::io::Error,
    raw: impl Debug,
    file: &str,
    line: u32,
) -> std::io::Error {
    if backtrace_enabled() {
        error!("Stack:\n{:?}", Backtrace::new());
        error!("Error:\n\t{:?}\n\tat {}:{}", raw, file, line);
    } else {
        error!(
            "Error:\n\t{:?}\n\tat {}:{}\n\tnote: enable `RUST_BACKTRACE=1` env to display a backtrace",
            raw, file, line
        );
    }
    err
}

/// Define an error macro `name!()` / `name!(detail)` producing `$err`.
macro_rules! define_error_macro {
    ($name:ident, $err:expr) => {
        #[macro_export]
        macro_rules! $name {
            () => {
                $err
            };
            ($raw:expr) => {
                $crate::error::log_error_site($err, &$raw, file!(), line!())
            };
        }
    };
}

/// Define an error macro for a libc error code.
macro_rules! define_errno_macro {
    ($name:ident, $code:ident) => {
        define_error_macro!($name, std::io::Error::from_raw_os_error(libc::$code));
    };
}

define_errno_macro!(einval, EINVAL);
define_errno_macro!(enoent, ENOENT);
define_errno_macro!(ebadf, EBADF);
define_errno_macro!(enotdir, ENOTDIR);
define_errno_macro!(eio, EIO);

define_error_macro!(last_error, std::io::Error::last_os_error());
define_error_macro!(
    eother,
    std::io::Error::new(std::io::ErrorKind::Other, "unexpected failure")
);
