/*
 * Copyright 2026 The Tern developers
 *
 * This file is part of Tern.
 *
 * Tern is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Tern is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Tern. If not, see <https://www.gnu.org/licenses/>.
 */

//! Supplemental page table entries.
//!
//! One [`UserPage`] exists for every page a process may legitimately touch, whether or not the
//! page currently has a frame. The entry records where the page's contents come from
//! ([`PageSource`]) and where they currently are ([`PageState`]).

use crate::{
	file::File,
	memory::{frame::FrameId, swap::SwapSlot},
};
use alloc::sync::Arc;

/// The file region a page is loaded from.
#[derive(Clone)]
pub struct FileBacking {
	/// Handle to the backing file.
	pub file: Arc<File>,
	/// Offset of the page's contents in the file, in bytes.
	pub off: u64,
	/// The number of bytes to read from the file.
	pub read_bytes: usize,
	/// The number of bytes to fill with zeros after the read bytes.
	///
	/// `read_bytes + zero_bytes` always equals the size of a page.
	pub zero_bytes: usize,
}

/// The provenance of a page's contents.
#[derive(Clone)]
pub enum PageSource {
	/// An executable segment page, lazily loaded from the program image.
	File(FileBacking),
	/// A stack page, starting zeroed.
	Stack,
	/// A page of a file mapping, backed by the mapping's re-opened handle.
	Mapped {
		/// The id of the mapping covering this page.
		mapping: u32,
		/// The mapped file region.
		backing: FileBacking,
	},
}

/// The current residency of a page. A page is in exactly one state at any time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PageState {
	/// The page has no frame; its contents can be recovered from its source.
	NotLoaded,
	/// The page is in memory, in the given frame.
	Resident(FrameId),
	/// The page was evicted to the given swap slot.
	Swapped(SwapSlot),
}

/// A supplemental page table entry.
///
/// The page's virtual address is the key of the owning table and is not repeated here.
pub struct UserPage {
	/// The provenance of the page's contents.
	pub source: PageSource,
	/// Whether the process may write to the page.
	pub writable: bool,
	/// The page's current residency.
	pub state: PageState,
}

impl UserPage {
	/// Tells whether the page belongs to a file mapping.
	pub fn is_mapped(&self) -> bool {
		matches!(self.source, PageSource::Mapped { .. })
	}
}
