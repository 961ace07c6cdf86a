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

//! The swap area.
//!
//! The swap partition is carved into page-sized slots of [`SLOT_SECTORS`] consecutive sectors
//! each. A slot holds the contents of one evicted page until the owning process faults it back in
//! or exits. Slot ownership is tracked with a bitmap; the area is volatile and not preserved
//! across reboots.

use crate::{
	device::{BlockDev, SECTOR_SIZE},
	errno,
	errno::EResult,
	memory::{Page, PAGE_SIZE},
};
use alloc::{boxed::Box, vec, vec::Vec};
use spin::Mutex;

/// The number of sectors per swap slot.
pub const SLOT_SECTORS: usize = PAGE_SIZE / SECTOR_SIZE;

/// An allocated slot of the swap area.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SwapSlot(pub usize);

/// A bitmap with one bit per swap slot. A set bit marks an allocated slot.
struct Bitmap {
	/// The bitmap's words.
	words: Vec<u64>,
	/// The number of valid bits.
	len: usize,
}

impl Bitmap {
	/// Creates a new bitmap with `len` bits, all clear.
	fn new(len: usize) -> Self {
		Self {
			words: vec![0; len.div_ceil(u64::BITS as usize)],
			len,
		}
	}

	/// Finds the first clear bit, sets it and returns its index.
	///
	/// If every bit is set, the function returns `None`.
	fn set_first_clear(&mut self) -> Option<usize> {
		for (word_i, word) in self.words.iter_mut().enumerate() {
			if *word == u64::MAX {
				continue;
			}
			let bit = word.trailing_ones() as usize;
			let i = word_i * u64::BITS as usize + bit;
			if i >= self.len {
				break;
			}
			*word |= 1 << bit;
			return Some(i);
		}
		None
	}

	/// Tells whether bit `i` is set.
	fn is_set(&self, i: usize) -> bool {
		self.words[i / u64::BITS as usize] & (1 << (i % u64::BITS as usize)) != 0
	}

	/// Clears bit `i`.
	fn clear(&mut self, i: usize) {
		self.words[i / u64::BITS as usize] &= !(1 << (i % u64::BITS as usize));
	}

	/// Returns the number of set bits.
	fn count_set(&self) -> usize {
		self.words.iter().map(|w| w.count_ones() as usize).sum()
	}
}

/// The swap slot allocator, owning the swap partition.
pub struct SwapSpace {
	/// The device holding the swap partition.
	dev: Mutex<Box<dyn BlockDev>>,
	/// Slot allocation state.
	bitmap: Mutex<Bitmap>,
}

impl SwapSpace {
	/// Creates a new swap area on the given device.
	///
	/// Trailing sectors that do not make up a whole slot are unused.
	pub fn new(dev: Box<dyn BlockDev>) -> Self {
		let slots = dev.sectors() as usize / SLOT_SECTORS;
		Self {
			dev: Mutex::new(dev),
			bitmap: Mutex::new(Bitmap::new(slots)),
		}
	}

	/// Returns the total number of slots in the area.
	pub fn slots(&self) -> usize {
		self.bitmap.lock().len
	}

	/// Returns the number of currently allocated slots.
	pub fn used_slots(&self) -> usize {
		self.bitmap.lock().count_set()
	}

	/// Allocates a slot.
	///
	/// If the area is full, the function returns `None`.
	pub fn alloc(&self) -> Option<SwapSlot> {
		let slot = self.bitmap.lock().set_first_clear().map(SwapSlot);
		if slot.is_none() {
			log::warn!("swap: out of slots");
		}
		slot
	}

	/// Frees the given slot.
	pub fn free(&self, slot: SwapSlot) {
		let mut bitmap = self.bitmap.lock();
		debug_assert!(bitmap.is_set(slot.0));
		bitmap.clear(slot.0);
	}

	/// Reads the contents of `slot` into `dst`.
	///
	/// The caller must ensure the destination frame is pinned for the duration of the read.
	pub fn read(&self, slot: SwapSlot, dst: &mut Page) -> EResult<()> {
		if slot.0 >= self.slots() {
			return Err(errno!(ENXIO));
		}
		self.dev
			.lock()
			.read(dst, (slot.0 * SLOT_SECTORS) as u64)
	}

	/// Writes the contents of `src` to `slot`.
	///
	/// The caller must ensure the source frame is pinned for the duration of the write.
	pub fn write(&self, src: &Page, slot: SwapSlot) -> EResult<()> {
		if slot.0 >= self.slots() {
			return Err(errno!(ENXIO));
		}
		self.dev
			.lock()
			.write(src, (slot.0 * SLOT_SECTORS) as u64)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::device::ramdisk::RamDisk;

	/// Creates a swap area with the given number of slots.
	fn swap_area(slots: usize) -> SwapSpace {
		SwapSpace::new(Box::new(RamDisk::new((slots * SLOT_SECTORS) as u64)))
	}

	#[test]
	fn alloc_exhaust() {
		let swap = swap_area(4);
		assert_eq!(swap.slots(), 4);
		let slots: Vec<_> = (0..4).map(|_| swap.alloc().unwrap()).collect();
		// First-fit allocation returns increasing indexes
		assert_eq!(slots, vec![SwapSlot(0), SwapSlot(1), SwapSlot(2), SwapSlot(3)]);
		assert!(swap.alloc().is_none());
		swap.free(SwapSlot(2));
		assert_eq!(swap.alloc(), Some(SwapSlot(2)));
	}

	#[test]
	fn round_trip() {
		let swap = swap_area(2);
		let slot = swap.alloc().unwrap();
		let src = [0x5au8; PAGE_SIZE];
		swap.write(&src, slot).unwrap();
		let mut dst = [0u8; PAGE_SIZE];
		swap.read(slot, &mut dst).unwrap();
		assert_eq!(src[..], dst[..]);
	}

	#[test]
	fn bitmap_boundary() {
		// A bitmap spanning more than one word
		let swap = swap_area(65);
		for _ in 0..65 {
			assert!(swap.alloc().is_some());
		}
		assert!(swap.alloc().is_none());
		assert_eq!(swap.used_slots(), 65);
		swap.free(SwapSlot(64));
		assert_eq!(swap.alloc(), Some(SwapSlot(64)));
	}
}
