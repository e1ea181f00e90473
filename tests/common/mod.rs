// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! A minimal SquashFS v4.0 image producer for the integration suite.
//!
//! Builds small but fully valid images in memory: data blocks (raw,
//! zlib-compressed, sparse, or packed into a shared fragment block),
//! chained metadata blocks, grouped and sorted directory listings, the
//! two-level fragment and ID lookup tables, and a 96-byte superblock.
//! Metadata can be stored raw (chains of any length) or zlib-compressed
//! (tables limited to a single metadata block).

// Each test binary pulls in the subset it needs.
#![allow(dead_code)]

use std::io::Write;

const SUPERBLOCK_SIZE: usize = 96;
const METABLOCK_SIZE: usize = 8192;
const METABLOCK_HEADER: usize = 2;
const METABLOCK_RAW: u16 = 0x8000;

const BLOCK_UNCOMPRESSED: u32 = 1 << 24;
const NO_FRAGMENT: u32 = 0xffff_ffff;
const XATTR_DISABLED: u32 = 0xffff_ffff;
const TABLE_ABSENT: u64 = u64::MAX;

pub const DEFAULT_MODE: u16 = 0o555;
pub const DEFAULT_MTIME: u32 = 1_234_567_890;

/// One node of the tree fed to the builder.
pub struct Node {
    pub name: String,
    pub mode: u16,
    pub mtime: u32,
    pub kind: NodeKind,
}

pub enum NodeKind {
    Dir(Vec<Node>),
    File(Vec<u8>),
    Symlink(String),
    BlockDev(u32),
    CharDev(u32),
    Fifo,
    Socket,
}

pub fn dir(name: &str, children: Vec<Node>) -> Node {
    Node {
        name: name.to_string(),
        mode: DEFAULT_MODE,
        mtime: DEFAULT_MTIME,
        kind: NodeKind::Dir(children),
    }
}

pub fn file(name: &str, content: impl Into<Vec<u8>>) -> Node {
    Node {
        name: name.to_string(),
        mode: DEFAULT_MODE,
        mtime: DEFAULT_MTIME,
        kind: NodeKind::File(content.into()),
    }
}

pub fn symlink(name: &str, target: &str) -> Node {
    Node {
        name: name.to_string(),
        mode: DEFAULT_MODE,
        mtime: DEFAULT_MTIME,
        kind: NodeKind::Symlink(target.to_string()),
    }
}

pub fn special(name: &str, kind: NodeKind) -> Node {
    Node {
        name: name.to_string(),
        mode: DEFAULT_MODE,
        mtime: DEFAULT_MTIME,
        kind,
    }
}

impl Node {
    pub fn mode(mut self, mode: u16) -> Node {
        self.mode = mode;
        self
    }

    pub fn mtime(mut self, mtime: u32) -> Node {
        self.mtime = mtime;
        self
    }
}

/// Image-wide knobs.
pub struct ImageBuilder {
    pub block_size: u32,
    /// zlib-compress data blocks (kept raw when compression grows them).
    pub compress_data: bool,
    /// zlib-compress metadata tables; limits each table to one block.
    pub compress_metadata: bool,
    /// Pack sub-block file tails into a shared fragment block.
    pub use_fragments: bool,
    /// Emit extended file inodes instead of basic ones.
    pub ext_file_inodes: bool,
    /// Values served by the ID lookup table.
    pub ids: Vec<u32>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        ImageBuilder {
            block_size: 128 << 10,
            compress_data: true,
            compress_metadata: false,
            use_fragments: true,
            ext_file_inodes: false,
            ids: vec![1000],
        }
    }
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Grows a metadata table and answers pointer queries against its final
/// on-disk chunking.
struct MetaTable {
    raw: Vec<u8>,
    compress: bool,
}

impl MetaTable {
    fn new(compress: bool) -> MetaTable {
        MetaTable {
            raw: Vec::new(),
            compress,
        }
    }

    fn offset(&self) -> usize {
        self.raw.len()
    }

    /// Translate a decompressed offset into the packed metadata pointer
    /// `(on-disk block offset << 16) | within-block offset`.
    fn pointer(&self, offset: usize) -> u64 {
        if self.compress {
            // Compressed tables are limited to a single block.
            assert!(offset <= METABLOCK_SIZE);
            offset as u64
        } else {
            let block = offset / METABLOCK_SIZE;
            let disk = block * (METABLOCK_SIZE + METABLOCK_HEADER);
            ((disk as u64) << 16) | (offset % METABLOCK_SIZE) as u64
        }
    }

    /// Encode the table as a chain of metadata blocks.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.compress {
            assert!(self.raw.len() <= METABLOCK_SIZE);
            let compressed = zlib(&self.raw);
            assert!(compressed.len() <= METABLOCK_SIZE);
            out.extend_from_slice(&(compressed.len() as u16).to_le_bytes());
            out.extend_from_slice(&compressed);
        } else {
            for chunk in self.raw.chunks(METABLOCK_SIZE) {
                out.extend_from_slice(&(chunk.len() as u16 | METABLOCK_RAW).to_le_bytes());
                out.extend_from_slice(chunk);
            }
        }
        out
    }

    fn put_u16(&mut self, v: u16) {
        self.raw.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.raw.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.raw.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.raw.extend_from_slice(v);
    }
}

struct SerializedChild {
    name: String,
    inode_type: u16,
    inode_number: u32,
    inode_offset: usize,
}

struct Builder {
    opts: ImageBuilder,
    /// Data region contents; absolute offset = SUPERBLOCK_SIZE + position.
    data: Vec<u8>,
    inodes: MetaTable,
    dirs: MetaTable,
    /// Collected fragment tail bytes.
    fragment: Vec<u8>,
    next_inode: u32,
}

impl Builder {
    fn data_end(&self) -> u64 {
        (SUPERBLOCK_SIZE + self.data.len()) as u64
    }

    /// Append one data block, compressing when enabled and profitable.
    /// Returns the encoded block-size entry.
    fn write_data_block(&mut self, block: &[u8]) -> u32 {
        if block.iter().all(|&b| b == 0) {
            return 0; // sparse
        }

        if self.opts.compress_data {
            let compressed = zlib(block);
            if compressed.len() < block.len() {
                self.data.extend_from_slice(&compressed);
                return compressed.len() as u32;
            }
        }

        self.data.extend_from_slice(block);
        block.len() as u32 | BLOCK_UNCOMPRESSED
    }

    fn common_prefix(&mut self, inode_type: u16, node: &Node, inode_number: u32) {
        self.inodes.put_u16(inode_type);
        self.inodes.put_u16(node.mode);
        self.inodes.put_u16(0); // uid index
        self.inodes.put_u16(0); // gid index
        self.inodes.put_u32(node.mtime);
        self.inodes.put_u32(inode_number);
    }

    fn serialize_file(&mut self, node: &Node, content: &[u8], inode_number: u32) -> usize {
        let block_size = self.opts.block_size as usize;
        let blocks_start = self.data_end();

        let tail_len = content.len() % block_size;
        let in_fragment = self.opts.use_fragments && tail_len != 0;

        let full = content.len() - if in_fragment { tail_len } else { 0 };
        let mut sizes = Vec::new();
        for chunk in content[..full].chunks(block_size) {
            sizes.push(self.write_data_block(chunk));
        }

        let (frag_index, frag_offset) = if in_fragment {
            let offset = self.fragment.len() as u32;
            self.fragment.extend_from_slice(&content[full..]);
            (0u32, offset)
        } else {
            (NO_FRAGMENT, 0)
        };

        let offset = self.inodes.offset();
        if self.opts.ext_file_inodes {
            self.common_prefix(9, node, inode_number);
            self.inodes.put_u64(blocks_start);
            self.inodes.put_u64(content.len() as u64);
            self.inodes.put_u64(0); // sparse bytes
            self.inodes.put_u32(1); // nlink
            self.inodes.put_u32(frag_index);
            self.inodes.put_u32(frag_offset);
            self.inodes.put_u32(XATTR_DISABLED);
        } else {
            self.common_prefix(2, node, inode_number);
            self.inodes.put_u32(blocks_start as u32);
            self.inodes.put_u32(frag_index);
            self.inodes.put_u32(frag_offset);
            self.inodes.put_u32(content.len() as u32);
        }
        for size in sizes {
            self.inodes.put_u32(size);
        }
        offset
    }

    fn serialize_symlink(&mut self, node: &Node, target: &str, inode_number: u32) -> usize {
        let offset = self.inodes.offset();
        self.common_prefix(3, node, inode_number);
        self.inodes.put_u32(1); // nlink
        self.inodes.put_u32(target.len() as u32);
        self.inodes.put_bytes(target.as_bytes());
        offset
    }

    fn serialize_device(
        &mut self,
        node: &Node,
        inode_type: u16,
        device: u32,
        inode_number: u32,
    ) -> usize {
        let offset = self.inodes.offset();
        self.common_prefix(inode_type, node, inode_number);
        self.inodes.put_u32(1); // nlink
        self.inodes.put_u32(device);
        offset
    }

    fn serialize_ipc(&mut self, node: &Node, inode_type: u16, inode_number: u32) -> usize {
        let offset = self.inodes.offset();
        self.common_prefix(inode_type, node, inode_number);
        self.inodes.put_u32(1); // nlink
        offset
    }

    fn serialize_dir(&mut self, node: &Node, children: &[Node], inode_number: u32) -> usize {
        // Children first: the listing needs their inode locations.
        let mut entries = Vec::new();
        for child in children {
            entries.push(self.serialize_node(child));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let listing_offset = self.dirs.offset();

        // Emit a new group whenever the children's metadata block changes;
        // entry offsets are only 16 bits wide.
        let mut index = 0;
        while index < entries.len() {
            let start_block = (self.inodes.pointer(entries[index].inode_offset) >> 16) as u32;

            let mut group_end = index;
            while group_end < entries.len()
                && (self.inodes.pointer(entries[group_end].inode_offset) >> 16) as u32
                    == start_block
                && group_end - index < 256
            {
                group_end += 1;
            }

            let base_inode = entries[index].inode_number;
            self.dirs.put_u32((group_end - index - 1) as u32);
            self.dirs.put_u32(start_block);
            self.dirs.put_u32(base_inode);

            for entry in &entries[index..group_end] {
                let pointer = self.inodes.pointer(entry.inode_offset);
                self.dirs.put_u16((pointer & 0xffff) as u16);
                let delta = entry.inode_number as i64 - base_inode as i64;
                self.dirs.put_u16(delta as i16 as u16);
                self.dirs.put_u16(entry.inode_type);
                self.dirs.put_u16((entry.name.len() - 1) as u16);
                self.dirs.put_bytes(entry.name.as_bytes());
            }

            index = group_end;
        }

        let listing_len = self.dirs.offset() - listing_offset;
        let listing_pointer = self.dirs.pointer(listing_offset);

        let subdirs = children
            .iter()
            .filter(|c| matches!(c.kind, NodeKind::Dir(_)))
            .count() as u32;

        let offset = self.inodes.offset();
        self.common_prefix(1, node, inode_number);
        self.inodes.put_u32((listing_pointer >> 16) as u32);
        self.inodes.put_u32(2 + subdirs); // nlink
        self.inodes.put_u16((listing_len + 3) as u16);
        self.inodes.put_u16((listing_pointer & 0xffff) as u16);
        self.inodes.put_u32(0); // parent inode, unused by the reader
        offset
    }

    fn serialize_node(&mut self, node: &Node) -> SerializedChild {
        let inode_number = self.next_inode;
        self.next_inode += 1;

        let (inode_type, inode_offset) = match &node.kind {
            NodeKind::File(content) => (2, self.serialize_file(node, content, inode_number)),
            NodeKind::Symlink(target) => (3, self.serialize_symlink(node, target, inode_number)),
            NodeKind::Dir(children) => (1, self.serialize_dir(node, children, inode_number)),
            NodeKind::BlockDev(device) => {
                (4, self.serialize_device(node, 4, *device, inode_number))
            }
            NodeKind::CharDev(device) => (5, self.serialize_device(node, 5, *device, inode_number)),
            NodeKind::Fifo => (6, self.serialize_ipc(node, 6, inode_number)),
            NodeKind::Socket => (7, self.serialize_ipc(node, 7, inode_number)),
        };

        SerializedChild {
            name: node.name.clone(),
            inode_type,
            inode_number,
            inode_offset,
        }
    }
}

/// Build an image holding `children` under the root directory.
pub fn build_image(opts: ImageBuilder, children: Vec<Node>) -> Vec<u8> {
    let compress_metadata = opts.compress_metadata;
    let block_size = opts.block_size;
    let ids = opts.ids.clone();

    let mut builder = Builder {
        opts,
        data: Vec::new(),
        inodes: MetaTable::new(compress_metadata),
        dirs: MetaTable::new(compress_metadata),
        fragment: Vec::new(),
        next_inode: 1,
    };

    let root = Node {
        name: String::new(),
        mode: 0o755,
        mtime: DEFAULT_MTIME,
        kind: NodeKind::Dir(children),
    };
    let root_serialized = builder.serialize_node(&root);
    let inode_count = builder.next_inode - 1;

    // Fragment block, placed after all file data.
    let mut frag_count = 0u32;
    let mut frag_descriptor = None;
    if !builder.fragment.is_empty() {
        let start = builder.data_end();
        let fragment = std::mem::take(&mut builder.fragment);
        let size = builder.write_data_block(&fragment);
        assert!(size != 0, "fragment block must not be sparse");
        frag_count = 1;
        frag_descriptor = Some((start, size));
    }

    let inode_table_start = builder.data_end();
    let inode_table = builder.inodes.encode();
    let dir_table_start = inode_table_start + inode_table.len() as u64;
    let dir_table = builder.dirs.encode();
    let mut next_table = dir_table_start + dir_table.len() as u64;

    // Fragment lookup table: descriptor metablock, then the top level of
    // absolute metablock addresses.
    let mut frag_region = Vec::new();
    let frag_table_start = match frag_descriptor {
        Some((start, size)) => {
            let mut descriptor = MetaTable::new(false);
            descriptor.put_u64(start);
            descriptor.put_u32(size);
            descriptor.put_u32(0);
            let encoded = descriptor.encode();

            let meta_start = next_table;
            let table_start = meta_start + encoded.len() as u64;
            frag_region.extend_from_slice(&encoded);
            frag_region.extend_from_slice(&meta_start.to_le_bytes());
            next_table = table_start + 8;
            table_start
        }
        None => TABLE_ABSENT,
    };

    // ID lookup table, same two-level shape.
    let mut id_block = MetaTable::new(false);
    for id in &ids {
        id_block.put_u32(*id);
    }
    let id_block = id_block.encode();
    let id_meta_start = next_table;
    let id_table_start = id_meta_start + id_block.len() as u64;
    let bytes_used = id_table_start + 8;

    let root_pointer = builder.inodes.pointer(root_serialized.inode_offset);

    let mut image = Vec::new();
    image.extend_from_slice(&0x7371_7368u32.to_le_bytes()); // magic
    image.extend_from_slice(&inode_count.to_le_bytes());
    image.extend_from_slice(&DEFAULT_MTIME.to_le_bytes());
    image.extend_from_slice(&block_size.to_le_bytes());
    image.extend_from_slice(&frag_count.to_le_bytes());
    image.extend_from_slice(&1u16.to_le_bytes()); // compressor: gzip
    image.extend_from_slice(&(block_size.trailing_zeros() as u16).to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes()); // flags
    image.extend_from_slice(&(ids.len() as u16).to_le_bytes());
    image.extend_from_slice(&4u16.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes());
    image.extend_from_slice(&root_pointer.to_le_bytes());
    image.extend_from_slice(&bytes_used.to_le_bytes());
    image.extend_from_slice(&id_table_start.to_le_bytes());
    image.extend_from_slice(&TABLE_ABSENT.to_le_bytes()); // xattr table
    image.extend_from_slice(&inode_table_start.to_le_bytes());
    image.extend_from_slice(&dir_table_start.to_le_bytes());
    image.extend_from_slice(&frag_table_start.to_le_bytes());
    image.extend_from_slice(&TABLE_ABSENT.to_le_bytes()); // export table
    assert_eq!(image.len(), SUPERBLOCK_SIZE);

    image.extend_from_slice(&builder.data);
    image.extend_from_slice(&inode_table);
    image.extend_from_slice(&dir_table);
    image.extend_from_slice(&frag_region);
    image.extend_from_slice(&id_block);
    image.extend_from_slice(&id_meta_start.to_le_bytes());
    assert_eq!(image.len() as u64, bytes_used);

    image
}

/// Build with default options.
pub fn build_default(children: Vec<Node>) -> Vec<u8> {
    build_image(ImageBuilder::default(), children)
}
