// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Storage layer for sqfs: the random-access byte source an image sits on
//! and the shared cache of decompressed blocks.

#[macro_use]
extern crate log;

pub mod cache;
pub mod source;

pub use cache::{BlockCache, BlockDecoder};
pub use source::ImageSource;
