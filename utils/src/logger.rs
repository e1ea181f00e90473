// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Logging setup for binaries and test harnesses built on top of sqfs.
//!
//! The library crates only emit records through the `log` facade; nothing in
//! here is initialized implicitly.

use std::io::Result;
use std::path::Path;

use flexi_logger::{style, DeferredNow, FileSpec, Logger, TS_DASHES_BLANK_COLONS_DOT_BLANK};
use log::{Level, LevelFilter, Record};

fn get_file_name<'a>(record: &'a Record) -> Option<&'a str> {
    record.file().map(|v| match v.rfind("/src/") {
        None => v,
        Some(pos) => match v[..pos].rfind('/') {
            None => &v[pos..],
            Some(p) => &v[p..],
        },
    })
}

fn opt_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::result::Result<(), std::io::Error> {
    let level = record.level();
    if level == Level::Info {
        write!(
            w,
            "[{}] {} {}",
            now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK),
            level,
            &record.args()
        )
    } else {
        write!(
            w,
            "[{}] {} [{}:{}] {}",
            now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK),
            level,
            get_file_name(record).unwrap_or("<unnamed>"),
            record.line().unwrap_or(0),
            &record.args()
        )
    }
}

fn colored_opt_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::result::Result<(), std::io::Error> {
    let level = record.level();
    write!(
        w,
        "[{}] {} {}",
        style(level).paint(now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK).to_string()),
        style(level).paint(level.to_string()),
        style(level).paint(record.args().to_string())
    )
}

/// Initialize a global logger writing to `path`, or to stderr when no path
/// is given. The `level` caps `log::max_level`; the underlying logger is
/// always configured at trace so the cap can be raised later.
pub fn setup_logging(path: Option<&Path>, level: LevelFilter) -> Result<()> {
    if let Some(path) = path {
        let basename = path
            .file_stem()
            .and_then(|v| v.to_str())
            .ok_or_else(|| einval!("failed to get log file basename"))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let spec = FileSpec::default()
            .directory(dir)
            .basename(basename)
            .suppress_timestamp();

        Logger::try_with_env_or_str("trace")
            .map_err(|e| eother!(e))?
            .log_to_file(spec)
            .append()
            .format(opt_format)
            .start()
            .map_err(|e| eother!(e))?;
    } else {
        Logger::try_with_env_or_str("trace")
            .map_err(|e| eother!(e))?
            .format(colored_opt_format)
            .start()
            .map_err(|e| eother!(e))?;
    }

    // Rely on the `log` facade to limit the effective level rather than
    // flexi_logger, so the cap can be adjusted at runtime.
    log::set_max_level(level);

    Ok(())
}
