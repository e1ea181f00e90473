// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Directory listings.
//!
//! A directory's byte range in the directory table holds one or more
//! groups: a 12-byte header carrying an entry count (stored one less), the
//! metadata block its children's inodes start in and a base inode number,
//! followed by that many entries of name, type tag and in-block offset.
//! Entries are sorted by name within a listing, which lets lookups stop as
//! soon as they pass the wanted name. The listing's total length is the
//! directory inode's size minus three.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::fs::Image;
use crate::inode::{entry_at, DirInode, Entry, FileType};
use crate::metadata::{MetadataStream, POINTER_SHIFT};

/// Offset between a directory inode's size field and its listing length.
const DIR_SIZE_OFFSET: u64 = 3;

const GROUP_HEADER_BYTES: u64 = 12;
const ENTRY_FIXED_BYTES: u64 = 8;

/// One not-yet-decoded entry of a directory listing.
pub(crate) struct RawDirEntry {
    pub name: String,
    pub inode_type: u16,
    /// Metadata pointer to the child's inode, relative to the inode table.
    pub pointer: u64,
}

/// Streaming walker over a directory's grouped, sorted listing.
pub(crate) struct DirWalker {
    stream: MetadataStream,
    /// Listing bytes not yet consumed.
    remaining: u64,
    /// Entries left in the current group.
    group_remaining: u64,
    /// Start metadata block for child inodes of the current group.
    start_block: u32,
}

impl DirWalker {
    pub fn new(image: &Arc<Image>, dir: &DirInode) -> Result<DirWalker> {
        if (dir.file_size as u64) < DIR_SIZE_OFFSET {
            return Err(Error::Invalid);
        }

        let pointer = (dir.start_block as u64) << POINTER_SHIFT | dir.block_offset as u64;
        let stream = MetadataStream::new(image.clone(), pointer, image.meta.dir_table)?;

        Ok(DirWalker {
            stream,
            remaining: dir.file_size as u64 - DIR_SIZE_OFFSET,
            group_remaining: 0,
            start_block: 0,
        })
    }

    /// Account for `bytes` of the listing, refusing to read past its end.
    fn take(&mut self, bytes: u64) -> Result<()> {
        if self.remaining < bytes {
            return Err(Error::Invalid);
        }
        self.remaining -= bytes;
        Ok(())
    }

    /// The next entry, or `None` once the listing is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<RawDirEntry>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        if self.group_remaining == 0 {
            self.take(GROUP_HEADER_BYTES)?;
            let count = self.stream.read_u32()?;
            self.start_block = self.stream.read_u32()?;
            let _base_inode = self.stream.read_u32()?;
            self.group_remaining = count as u64 + 1;
        }

        self.take(ENTRY_FIXED_BYTES)?;
        let offset = self.stream.read_u16()?;
        let _inode_delta = self.stream.read_i16()?;
        let inode_type = self.stream.read_u16()?;
        let name_len = self.stream.read_u16()? as u64 + 1;

        self.take(name_len)?;
        let name = crate::inode::read_name(&mut self.stream, name_len as usize)?;

        self.group_remaining -= 1;

        Ok(Some(RawDirEntry {
            name,
            inode_type,
            pointer: (self.start_block as u64) << POINTER_SHIFT | offset as u64,
        }))
    }
}

/// Find `name` in the listing of `dir` and decode its inode.
///
/// Listings are sorted, so the scan stops early once it walks past where
/// the name would sort.
pub(crate) fn dir_entry_by_name(image: &Arc<Image>, dir: &DirInode, name: &str) -> Result<Entry> {
    let mut walker = DirWalker::new(image, dir)?;

    while let Some(raw) = walker.next_entry()? {
        if raw.name == name {
            return entry_at(image, raw.pointer, name);
        }
        if name < raw.name.as_str() {
            break;
        }
    }

    Err(Error::NotFound)
}

/// One entry of a directory listing, as returned by `read_dir`.
#[derive(Clone)]
pub struct DirEntry {
    image: Arc<Image>,
    name: String,
    file_type: FileType,
    pointer: u64,
}

impl DirEntry {
    pub(crate) fn new(image: Arc<Image>, raw: RawDirEntry) -> Result<DirEntry> {
        let file_type = FileType::from_inode_type(raw.inode_type).ok_or(Error::Invalid)?;
        Ok(DirEntry {
            image,
            name: raw.name,
            file_type,
            pointer: raw.pointer,
        })
    }

    /// Base name of the entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the entry, decoded from the listing itself without touching
    /// the inode table.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn is_dir(&self) -> bool {
        self.file_type.is_dir()
    }

    /// Decode the full inode behind this entry.
    pub fn info(&self) -> Result<Entry> {
        entry_at(&self.image, self.pointer, &self.name)
    }
}

impl std::fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirEntry")
            .field("name", &self.name)
            .field("file_type", &self.file_type)
            .finish()
    }
}

/// An open directory handle.
pub struct Dir {
    entry: Entry,
    state: Mutex<DirState>,
}

impl std::fmt::Debug for Dir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dir").field("entry", &self.entry).finish()
    }
}

struct DirState {
    image: Option<Arc<Image>>,
    walker: Option<DirWalker>,
}

impl Dir {
    pub(crate) fn new(image: Arc<Image>, entry: Entry) -> Dir {
        debug_assert!(entry.is_dir());
        Dir {
            entry,
            state: Mutex::new(DirState {
                image: Some(image),
                walker: None,
            }),
        }
    }

    /// Read up to `n` entries from the listing, in name order.
    ///
    /// With `n <= 0` the whole remaining listing is returned. With a
    /// positive `n`, an empty result means the listing is exhausted; a
    /// shorter-than-requested result carries everything up to the end.
    pub fn read_dir(&self, n: isize) -> Result<Vec<DirEntry>> {
        let mut state = self.state.lock().unwrap();
        let image = match &state.image {
            Some(image) => image.clone(),
            None => return Err(Error::Closed),
        };

        if state.walker.is_none() {
            let dir = match &self.entry.inode {
                crate::inode::Inode::Dir(d) => d,
                _ => return Err(Error::Invalid),
            };
            state.walker = Some(DirWalker::new(&image, dir)?);
        }
        let walker = state.walker.as_mut().unwrap();

        let mut entries = Vec::new();
        while n <= 0 || entries.len() < n as usize {
            match walker.next_entry()? {
                Some(raw) => entries.push(DirEntry::new(image.clone(), raw)?),
                None => break,
            }
        }

        Ok(entries)
    }

    /// Stat record of the directory itself.
    pub fn stat(&self) -> Entry {
        self.entry.clone()
    }

    /// Detach the handle. Later operations fail with `Closed`, as does a
    /// second `close`.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.image.take().is_none() {
            return Err(Error::Closed);
        }
        state.walker = None;
        Ok(())
    }
}
