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

//! Per-process virtual memory context.
//!
//! x86 virtual memory works with a tree structure. The page directory contains page tables, each
//! covering a 4 MB block of the address space. Each page table entry maps one 4096 bytes page.
//!
//! Entries hold the physical address of the target page together with flags. Since physical
//! addresses are page-aligned, the lower 12 bits of each entry are free for the flags.
//!
//! [`PageDir`] keeps this exact layout in software. The MMU's side of the contract (walking the
//! tree on access and setting the accessed/dirty bits) is performed by [`PageDir::mark_access`],
//! which the kernel-side user memory accessors call on every load and store they emulate.

use crate::memory::{frame::FrameId, VirtAddr, PAGE_SIZE};
use alloc::{boxed::Box, vec::Vec};
use bitflags::bitflags;

/// x86 paging flag. Indicates that the page has been written.
pub const FLAG_DIRTY: u32 = 0b001000000;
/// x86 paging flag. Set if the page has been read or written.
pub const FLAG_ACCESSED: u32 = 0b000100000;
/// x86 paging flag. If set, the page can be accessed by userspace operations.
pub const FLAG_USER: u32 = 0b000000100;
/// x86 paging flag. If set, the page can be written.
pub const FLAG_WRITE: u32 = 0b000000010;
/// x86 paging flag. If set, the page is present.
pub const FLAG_PRESENT: u32 = 0b000000001;

/// Flags mask in a page directory entry.
pub const FLAGS_MASK: u32 = 0xfff;
/// Address mask in a page directory entry.
pub const ADDR_MASK: u32 = !FLAGS_MASK;

bitflags! {
	/// The error code pushed by the CPU on a page fault.
	#[derive(Clone, Copy, Debug, Eq, PartialEq)]
	pub struct FaultCode: u32 {
		/// If set, the fault was a protection violation on a present page. If clear, the page was
		/// not present.
		const PRESENT = 0b001;
		/// If set, the faulting access was a write. If clear, a read.
		const WRITE = 0b010;
		/// If set, the fault happened in user mode. If clear, in kernel mode.
		const USER = 0b100;
	}
}

/// The number of entries in a table.
const ENTRIES_PER_TABLE: usize = 1024;

/// A page table, or the page directory itself.
type Table = [u32; ENTRIES_PER_TABLE];

/// Returns the page directory and page table indexes for the given virtual address.
#[inline]
fn indexes(vpage: VirtAddr) -> (usize, usize) {
	let page = vpage.0 / PAGE_SIZE;
	(page / ENTRIES_PER_TABLE, page % ENTRIES_PER_TABLE)
}

/// A software page directory, one per process.
///
/// Mappings installed here are what the process can actually reach. The supplemental page table
/// describes what the process may *legitimately* reach, and the fault policy engine reconciles the
/// two on each page fault.
pub struct PageDir {
	/// The page tables, indexed by page directory entry.
	tables: Vec<Option<Box<Table>>>,
}

impl Default for PageDir {
	fn default() -> Self {
		Self::new()
	}
}

impl PageDir {
	/// Creates a new, empty page directory.
	pub fn new() -> Self {
		let mut tables = Vec::new();
		tables.resize_with(ENTRIES_PER_TABLE, || None);
		Self {
			tables,
		}
	}

	/// Returns the entry for `vpage`, if its page table exists.
	fn entry(&self, vpage: VirtAddr) -> Option<u32> {
		let (dir_i, tab_i) = indexes(vpage);
		let table = self.tables[dir_i].as_ref()?;
		Some(table[tab_i])
	}

	/// Returns a mutable reference to the entry for `vpage`, allocating the page table if
	/// necessary.
	fn entry_mut(&mut self, vpage: VirtAddr) -> &mut u32 {
		let (dir_i, tab_i) = indexes(vpage);
		let table = self.tables[dir_i].get_or_insert_with(|| Box::new([0; ENTRIES_PER_TABLE]));
		&mut table[tab_i]
	}

	/// Installs a mapping from `vpage` to `frame`.
	///
	/// If `writable` is set, the page can be written by the process.
	///
	/// If a mapping is already present for `vpage`, it is replaced and its accessed/dirty bits are
	/// discarded.
	pub fn map(&mut self, vpage: VirtAddr, frame: FrameId, writable: bool) {
		debug_assert!(vpage.is_aligned_to(PAGE_SIZE));
		let mut flags = FLAG_PRESENT | FLAG_USER;
		if writable {
			flags |= FLAG_WRITE;
		}
		*self.entry_mut(vpage) = ((frame.0 * PAGE_SIZE) as u32) | flags;
	}

	/// Removes the mapping for `vpage`, making further accesses fault.
	///
	/// The function returns the entry as it was before removal, so that the caller can inspect the
	/// accessed and dirty bits without losing them. If no mapping was present, the function
	/// returns `None`.
	pub fn unmap(&mut self, vpage: VirtAddr) -> Option<u32> {
		debug_assert!(vpage.is_aligned_to(PAGE_SIZE));
		let (dir_i, tab_i) = indexes(vpage);
		let table = self.tables[dir_i].as_mut()?;
		let prev = table[tab_i];
		table[tab_i] = 0;
		(prev & FLAG_PRESENT != 0).then_some(prev)
	}

	/// Reinstalls a mapping from `vpage` to `frame` with the given raw entry flags.
	///
	/// This is used to undo an aborted eviction without losing the accessed and dirty bits.
	pub fn remap(&mut self, vpage: VirtAddr, frame: FrameId, flags: u32) {
		debug_assert!(vpage.is_aligned_to(PAGE_SIZE));
		*self.entry_mut(vpage) = ((frame.0 * PAGE_SIZE) as u32) | (flags & FLAGS_MASK);
	}

	/// Translates `vpage` to the frame it is mapped to.
	///
	/// The function returns the frame together with the entry's flags. If no mapping is present,
	/// the function returns `None`.
	pub fn translate(&self, vpage: VirtAddr) -> Option<(FrameId, u32)> {
		let entry = self.entry(vpage)?;
		if entry & FLAG_PRESENT == 0 {
			return None;
		}
		let frame = FrameId((entry & ADDR_MASK) as usize / PAGE_SIZE);
		Some((frame, entry & FLAGS_MASK))
	}

	/// Tells whether the page at `vpage` has been written since it was mapped.
	///
	/// If no mapping is present, the function returns `false`.
	pub fn is_dirty(&self, vpage: VirtAddr) -> bool {
		self.entry(vpage)
			.is_some_and(|e| e & (FLAG_PRESENT | FLAG_DIRTY) == (FLAG_PRESENT | FLAG_DIRTY))
	}

	/// Tells whether the page at `vpage` has been accessed since the bit was last cleared.
	///
	/// If no mapping is present, the function returns `false`.
	pub fn is_accessed(&self, vpage: VirtAddr) -> bool {
		self.entry(vpage)
			.is_some_and(|e| e & (FLAG_PRESENT | FLAG_ACCESSED) == (FLAG_PRESENT | FLAG_ACCESSED))
	}

	/// Clears the accessed bit of the page at `vpage`.
	pub fn clear_accessed(&mut self, vpage: VirtAddr) {
		let (dir_i, tab_i) = indexes(vpage);
		if let Some(table) = self.tables[dir_i].as_mut() {
			table[tab_i] &= !FLAG_ACCESSED;
		}
	}

	/// Records an access to the page at `vpage`, the way the MMU would on a user load or store.
	///
	/// The accessed bit is set; the dirty bit is also set if `write` is set.
	///
	/// The function returns `false` if the access would fault: no mapping present, or a write to a
	/// read-only page.
	pub fn mark_access(&mut self, vpage: VirtAddr, write: bool) -> bool {
		let Some(entry) = self.entry(vpage) else {
			return false;
		};
		if entry & FLAG_PRESENT == 0 || (write && entry & FLAG_WRITE == 0) {
			return false;
		}
		let mut flags = FLAG_ACCESSED;
		if write {
			flags |= FLAG_DIRTY;
		}
		*self.entry_mut(vpage) = entry | flags;
		true
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn map_translate() {
		let mut pd = PageDir::new();
		let vpage = VirtAddr(0x20000000);
		assert!(pd.translate(vpage).is_none());
		pd.map(vpage, FrameId(5), true);
		let (frame, flags) = pd.translate(vpage).unwrap();
		assert_eq!(frame, FrameId(5));
		assert_ne!(flags & FLAG_WRITE, 0);
		assert_ne!(flags & FLAG_USER, 0);
		// Neighbouring pages are unaffected
		assert!(pd.translate(vpage + PAGE_SIZE).is_none());
		assert!(pd.translate(vpage - PAGE_SIZE).is_none());
	}

	#[test]
	fn unmap_returns_old_flags() {
		let mut pd = PageDir::new();
		let vpage = VirtAddr(0x8048000);
		pd.map(vpage, FrameId(1), true);
		assert!(pd.mark_access(vpage, true));
		let prev = pd.unmap(vpage).unwrap();
		assert_ne!(prev & FLAG_DIRTY, 0);
		assert_ne!(prev & FLAG_ACCESSED, 0);
		assert!(pd.translate(vpage).is_none());
		assert!(pd.unmap(vpage).is_none());
	}

	#[test]
	fn access_bits() {
		let mut pd = PageDir::new();
		let vpage = VirtAddr(0x1000);
		pd.map(vpage, FrameId(0), false);
		assert!(!pd.is_accessed(vpage));
		assert!(!pd.is_dirty(vpage));
		// Read access
		assert!(pd.mark_access(vpage, false));
		assert!(pd.is_accessed(vpage));
		assert!(!pd.is_dirty(vpage));
		// Write to read-only page faults
		assert!(!pd.mark_access(vpage, true));
		assert!(!pd.is_dirty(vpage));
		pd.clear_accessed(vpage);
		assert!(!pd.is_accessed(vpage));
	}
}
