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

//! Access to user memory from the kernel.
//!
//! System calls receive user pointers; the kernel must validate them and be ready to take a page
//! fault on their behalf, since the pages they point to may not be loaded yet. Accesses performed
//! here go through the same fault policy engine as user-mode accesses, and set the MMU accessed
//! and dirty bits the same way the hardware would.
//!
//! The frame backing an access is pinned for the duration of the byte copy, so an eviction cannot
//! pull it out from under the copy.

use crate::{
	errno,
	errno::EResult,
	memory::{
		frame::FrameId,
		vmem::{FaultCode, FLAG_WRITE},
		VirtAddr, PAGE_SIZE, PHYS_BASE,
	},
	process::mem_space::MemSpace,
};
use alloc::sync::Arc;

/// Checks that the range `[addr, addr + len)` is a plausible user buffer: non-null and entirely
/// in userspace.
///
/// The check does not tell whether the range is actually mapped; accesses through
/// [`copy_from_user`] and [`copy_to_user`] fault pages in lazily and report failure themselves.
pub fn check_range(addr: VirtAddr, len: usize) -> EResult<()> {
	if addr.is_null() {
		return Err(errno!(EFAULT));
	}
	let end = addr.0.checked_add(len).ok_or(errno!(EFAULT))?;
	if end > PHYS_BASE.0 {
		return Err(errno!(EFAULT));
	}
	Ok(())
}

/// Makes the page containing `addr` resident and accessible, faulting it in if necessary, and
/// returns its frame, pinned.
///
/// The caller must unpin the frame once done with it.
fn pin_page(space: &Arc<MemSpace>, addr: VirtAddr, write: bool) -> EResult<FrameId> {
	let vpage = addr.down_align_to(PAGE_SIZE);
	loop {
		let frame = {
			let pd = space.page_dir.lock();
			pd.translate(vpage)
				.and_then(|(frame, flags)| (!write || flags & FLAG_WRITE != 0).then_some(frame))
		};
		let Some(frame) = frame else {
			let code = if write {
				FaultCode::WRITE
			} else {
				FaultCode::empty()
			};
			// Kernel-mode access: the engine uses the esp saved at system call entry
			MemSpace::handle_page_fault(space, addr, code, VirtAddr(0))?;
			continue;
		};
		space.frames.pin(frame);
		// The page may have been evicted between the lookup and the pin; check again under the
		// pin, and record the access like the MMU would
		let ok = {
			let mut pd = space.page_dir.lock();
			match pd.translate(vpage) {
				Some((f, _)) if f == frame => pd.mark_access(vpage, write),
				_ => false,
			}
		};
		if ok {
			return Ok(frame);
		}
		space.frames.unpin(frame);
	}
}

/// Touches the byte at `addr`, faulting its page in if necessary.
///
/// If `write` is set, the touch behaves like a store, setting the MMU dirty bit.
pub fn touch(space: &Arc<MemSpace>, addr: VirtAddr, write: bool) -> EResult<()> {
	check_range(addr, 1)?;
	let frame = pin_page(space, addr, write)?;
	space.frames.unpin(frame);
	Ok(())
}

/// Copies `buf.len()` bytes from user memory at `addr` into `buf`.
///
/// If any part of the range cannot be made resident, the function returns an error.
pub fn copy_from_user(space: &Arc<MemSpace>, addr: VirtAddr, buf: &mut [u8]) -> EResult<()> {
	check_range(addr, buf.len())?;
	let mut i = 0;
	while i < buf.len() {
		let cur = addr + i;
		let page_off = cur.0 % PAGE_SIZE;
		let len = (PAGE_SIZE - page_off).min(buf.len() - i);
		let frame = pin_page(space, cur, false)?;
		{
			let data = space.frames.data(frame).lock();
			buf[i..(i + len)].copy_from_slice(&data[page_off..(page_off + len)]);
		}
		space.frames.unpin(frame);
		i += len;
	}
	Ok(())
}

/// Copies `buf` into user memory at `addr`.
///
/// If any part of the range cannot be made resident and writable, the function returns an error.
pub fn copy_to_user(space: &Arc<MemSpace>, addr: VirtAddr, buf: &[u8]) -> EResult<()> {
	check_range(addr, buf.len())?;
	let mut i = 0;
	while i < buf.len() {
		let cur = addr + i;
		let page_off = cur.0 % PAGE_SIZE;
		let len = (PAGE_SIZE - page_off).min(buf.len() - i);
		let frame = pin_page(space, cur, true)?;
		{
			let mut data = space.frames.data(frame).lock();
			data[page_off..(page_off + len)].copy_from_slice(&buf[i..(i + len)]);
		}
		space.frames.unpin(frame);
		i += len;
	}
	Ok(())
}
