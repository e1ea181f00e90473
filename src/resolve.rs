// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Path resolution.
//!
//! Paths are resolved component by component from the root inode. Symbolic
//! links splice their target into the not-yet-consumed remainder of the
//! path and restart the walk from the root, under a fixed redirection
//! budget so link cycles terminate. Whether the final component itself is
//! followed distinguishes stat from lstat semantics.

use std::sync::Arc;

use crate::directory::dir_entry_by_name;
use crate::error::{Error, Result};
use crate::fs::Image;
use crate::inode::{entry_at, Entry, Inode};

/// How many symlink redirections one lookup may consume.
const MAX_REDIRECTS: u32 = 1024;

/// Normalize a caller-supplied path: strip surrounding slashes and map the
/// root to `"."`. Backslashes and `..` components are refused outright.
pub(crate) fn normalize(path: &str) -> Result<String> {
    if path.is_empty() || path.contains('\\') {
        return Err(Error::Invalid);
    }

    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return Ok(".".to_string());
    }

    if trimmed.split('/').any(|c| c == "..") {
        return Err(Error::Invalid);
    }

    Ok(trimmed.to_string())
}

/// Lexically clean a relative slash-separated path: drop empty and `.`
/// segments and resolve `..` against earlier segments. The empty path
/// cleans to `"."`. Leading `..` segments that would escape the root are
/// kept; lookup then fails on them naturally.
fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), None | Some(&"..")) {
                    segments.push("..");
                } else {
                    segments.pop();
                }
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join("/")
    }
}

/// Join path fragments with single slashes, ignoring empty ones.
fn join(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

/// Resolve `path` to an entry, walking from the root inode.
///
/// `follow_last` selects stat semantics (a symlink in the final position
/// is followed) over lstat semantics (it is returned as-is).
pub(crate) fn resolve(image: &Arc<Image>, path: &str, follow_last: bool) -> Result<Entry> {
    let mut full_path = normalize(path)?;

    let root = entry_at(image, image.meta.root_inode, "")?;
    let mut curr = root.clone();

    // `rest` is the unconsumed tail of `full_path`; `cut_at` indexes just
    // past the last consumed component, so `full_path[..cut_at]` is the
    // directory prefix symlink targets splice onto.
    let mut rest = full_path.clone();
    let mut cut_at = 0usize;
    let mut redirects = MAX_REDIRECTS;

    while !rest.is_empty() {
        let dir = match &curr.inode {
            Inode::Dir(d) => d.clone(),
            _ => return Err(Error::Invalid),
        };

        let name = match rest.find('/') {
            Some(pos) => {
                let name = rest[..pos].to_string();
                rest = rest[pos + 1..].to_string();
                cut_at += pos + 1;
                name
            }
            None => std::mem::take(&mut rest),
        };

        if name.is_empty() || name == "." {
            continue;
        }

        curr = dir_entry_by_name(image, &dir, &name)?;

        let sym = match &curr.inode {
            Inode::Symlink(s) if !rest.is_empty() || follow_last => s.target.clone(),
            _ => continue,
        };

        redirects -= 1;
        if redirects == 0 {
            return Err(Error::Invalid);
        }

        if let Some(absolute) = sym.strip_prefix('/') {
            full_path = clean(absolute);
        } else if rest.is_empty() {
            // `cut_at` still points at the start of the link's own name.
            full_path = clean(&join(&[&full_path[..cut_at], &sym]));
        } else {
            // Drop the link's name and its slash, splice in the target and
            // reattach the unresolved tail.
            let prefix = &full_path[..cut_at - name.len() - 1];
            full_path = clean(&join(&[prefix, &sym, &rest]));
        }

        rest = full_path.clone();
        cut_at = 0;
        curr = root.clone();
    }

    Ok(curr)
}
