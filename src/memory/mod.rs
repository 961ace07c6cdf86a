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

//! Memory management for user processes.
//!
//! The virtual memory is divided in two halves:
//! - Userspace: below [`PHYS_BASE`], private to the currently running process
//! - Kernelspace: from [`PHYS_BASE`] upward, shared across processes
//!
//! This module provides the building blocks the per-process memory space is made of: the frame
//! table, the swap area, the software page directory and kernel-side access to user memory.

pub mod frame;
pub mod stats;
pub mod swap;
pub mod user;
pub mod vmem;

use core::{
	fmt,
	ops::{Add, Sub},
};

/// The size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// The boundary between userspace and kernelspace.
pub const PHYS_BASE: VirtAddr = VirtAddr(0xc0000000);
/// The maximum size of a process's user stack in bytes.
pub const STACK_MAX_SIZE: usize = 0x800000;
/// The lowest address the user stack is allowed to grow down to.
pub const STACK_LIMIT: VirtAddr = VirtAddr(PHYS_BASE.0 - STACK_MAX_SIZE);

/// Type representing a memory page.
pub type Page = [u8; PAGE_SIZE];

/// An address on physical memory.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PhysAddr(pub usize);

/// An address on virtual memory.
///
/// This would usually be represented by a pointer. However, the subsystem mostly needs to reason
/// about user addresses without dereferencing them.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
	/// Tells whether the address lies in userspace.
	#[inline]
	pub fn is_user(self) -> bool {
		self < PHYS_BASE
	}
}

macro_rules! addr_impl {
	($name:ident) => {
		impl $name {
			/// Tells whether the address is null.
			pub fn is_null(self) -> bool {
				self.0 == 0
			}

			/// Tells whether the address is aligned to `align`.
			pub fn is_aligned_to(self, align: usize) -> bool {
				self.0 % align == 0
			}

			/// Computes and returns the next address to be aligned to `align`.
			///
			/// If `self` is already aligned, the function returns `self`.
			pub fn align_to(self, align: usize) -> Self {
				Self(self.0.next_multiple_of(align))
			}

			/// Computes and returns the previous address to be aligned to `align`.
			///
			/// If `self` is already aligned, the function returns `self`.
			pub fn down_align_to(self, align: usize) -> Self {
				Self(self.0 & !(align - 1))
			}
		}

		impl Add<usize> for $name {
			type Output = Self;

			/// Adds the given offset in bytes, wrapping on overflow.
			fn add(self, off: usize) -> Self::Output {
				Self(self.0.wrapping_add(off))
			}
		}

		impl Sub<usize> for $name {
			type Output = Self;

			/// Subtracts the given offset in bytes, wrapping on overflow.
			fn sub(self, off: usize) -> Self::Output {
				Self(self.0.wrapping_sub(off))
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(fmt, "{:08x}", self.0)
			}
		}
	};
}

addr_impl!(PhysAddr);
addr_impl!(VirtAddr);

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn addr_align() {
		let addr = VirtAddr(0x1234);
		assert!(!addr.is_aligned_to(PAGE_SIZE));
		assert_eq!(addr.down_align_to(PAGE_SIZE), VirtAddr(0x1000));
		assert_eq!(addr.align_to(PAGE_SIZE), VirtAddr(0x2000));
		assert_eq!(VirtAddr(0x2000).align_to(PAGE_SIZE), VirtAddr(0x2000));
	}

	#[test]
	fn addr_user() {
		assert!(VirtAddr(0x1000).is_user());
		assert!(VirtAddr(PHYS_BASE.0 - 1).is_user());
		assert!(!PHYS_BASE.is_user());
		assert!(!VirtAddr(0xffffffff).is_user());
	}
}
