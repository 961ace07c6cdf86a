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

//! The frame table owns the pool of physical frames available to user processes.
//!
//! When the pool is exhausted, allocation evicts a victim chosen by a second-chance (clock)
//! policy. A frame holds a non-owning tenant reference `(memory space, vpage)`; the supplemental
//! page table entry of the tenant owns the logical page, and the evictor re-resolves it through
//! the tenant's space. This keeps ownership one-way and avoids dangling back-pointers when an
//! entry is removed.
//!
//! Locking: the table's internal lock is held across "pick victim, pin, clear the MMU mapping,
//! snapshot the dirty bit", so eviction is atomic relative to other allocators. It is released
//! before the eviction's I/O and re-acquired to publish the freed frame. A pinned frame is never
//! selected for eviction, so a thread performing I/O into a frame observes stable contents.

use crate::{
	errno,
	errno::EResult,
	file::FILESYS_LOCK,
	memory::{stats, swap::SwapSpace, Page, VirtAddr, PAGE_SIZE},
	process::mem_space::{page::PageState, MemSpace, Writeback},
};
use alloc::{
	boxed::Box,
	sync::{Arc, Weak},
	vec::Vec,
};
use spin::Mutex;

/// Identifier of a frame in the user pool.
///
/// The corresponding physical address is `FrameId * PAGE_SIZE` from the base of the pool.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FrameId(pub usize);

/// The current tenant of a frame.
pub struct Tenant {
	/// The memory space the frame is installed in.
	pub space: Weak<MemSpace>,
	/// The user virtual page mapped to the frame.
	pub vpage: VirtAddr,
}

/// A frame of the user pool.
#[derive(Default)]
struct Frame {
	/// Whether the frame is handed out.
	allocated: bool,
	/// The number of holds forbidding eviction. I/O into or out of a frame is always done with at
	/// least one hold.
	pins: u32,
	/// The frame's tenant, if installed in a memory space.
	tenant: Option<Tenant>,
}

/// Frame allocation state, behind the frame lock.
struct FrameTableInner {
	/// The frames of the pool.
	frames: Vec<Frame>,
	/// The clock hand: the index the next eviction scan starts at.
	hand: usize,
}

impl FrameTableInner {
	/// Selects an eviction victim with the second-chance policy.
	///
	/// Starting at the clock hand, up to `2 * |frames|` entries are examined. Pinned frames are
	/// skipped; a frame whose accessed bit is set gets its bit cleared and is passed over. The
	/// first frame with the accessed bit clear is chosen.
	///
	/// The function returns the victim's index along with its resolved tenant. Frames whose
	/// tenant space has been dropped are skipped: the exiting process's teardown frees them.
	///
	/// If no candidate is found, the function returns an error.
	fn pick_victim(&mut self) -> EResult<(usize, Arc<MemSpace>, VirtAddr)> {
		let n = self.frames.len();
		for _ in 0..(2 * n) {
			let i = self.hand;
			self.hand = (self.hand + 1) % n;
			let frame = &mut self.frames[i];
			if frame.pins > 0 {
				continue;
			}
			let Some(tenant) = &frame.tenant else {
				continue;
			};
			let Some(space) = tenant.space.upgrade() else {
				continue;
			};
			if space.frame_accessed(tenant.vpage) {
				// Second chance
				space.clear_frame_accessed(tenant.vpage);
				continue;
			}
			return Ok((i, space, tenant.vpage));
		}
		Err(errno!(ENOMEM))
	}
}

/// The table of physical frames available to user processes.
pub struct FrameTable {
	/// Allocation state. This is the frame lock.
	inner: Mutex<FrameTableInner>,
	/// The frames' contents, indexed by [`FrameId`].
	data: Vec<Mutex<Box<Page>>>,
	/// The swap area evicted pages are written to.
	swap: Arc<SwapSpace>,
}

impl FrameTable {
	/// Creates a table owning `count` frames, evicting to `swap` under memory pressure.
	pub fn new(count: usize, swap: Arc<SwapSpace>) -> Arc<Self> {
		let mut frames = Vec::new();
		frames.resize_with(count, Frame::default);
		let mut data = Vec::new();
		data.resize_with(count, || Mutex::new(Box::new([0; PAGE_SIZE])));
		Arc::new(Self {
			inner: Mutex::new(FrameTableInner {
				frames,
				hand: 0,
			}),
			data,
			swap,
		})
	}

	/// Returns the number of frames in the pool.
	pub fn frames(&self) -> usize {
		self.data.len()
	}

	/// Returns the number of frames currently free.
	pub fn free_frames(&self) -> usize {
		self.inner
			.lock()
			.frames
			.iter()
			.filter(|f| !f.allocated)
			.count()
	}

	/// Returns the contents of the given frame.
	pub(crate) fn data(&self, frame: FrameId) -> &Mutex<Box<Page>> {
		&self.data[frame.0]
	}

	/// Allocates a frame, ready to be installed in a memory space.
	///
	/// Arguments:
	/// - `zero` tells whether the frame's contents are cleared
	/// - `pin` tells whether the frame is returned pinned
	///
	/// If no frame is free, a victim is evicted. Eviction writes the victim's contents to its
	/// backing store if required, then detaches it from its supplemental page table entry.
	///
	/// If eviction requires a swap slot and the swap area is full, the eviction is aborted, the
	/// victim is left untouched and the function returns an error.
	pub fn alloc(&self, zero: bool, pin: bool) -> EResult<FrameId> {
		let frame = {
			let mut inner = self.inner.lock();
			match inner.frames.iter().position(|f| !f.allocated) {
				Some(i) => {
					let frame = &mut inner.frames[i];
					frame.allocated = true;
					frame.pins += pin as u32;
					frame.tenant = None;
					FrameId(i)
				}
				None => {
					drop(inner);
					self.evict(pin)?
				}
			}
		};
		if zero {
			self.data[frame.0].lock().fill(0);
		}
		Ok(frame)
	}

	/// Evicts a victim frame and returns it, pinned if `pin` is set.
	fn evict(&self, pin: bool) -> EResult<FrameId> {
		let mut inner = self.inner.lock();
		// A frame may have been freed while the lock was released
		if let Some(i) = inner.frames.iter().position(|f| !f.allocated) {
			let frame = &mut inner.frames[i];
			frame.allocated = true;
			frame.pins += pin as u32;
			frame.tenant = None;
			return Ok(FrameId(i));
		}
		let (i, space, vpage) = inner.pick_victim()?;
		// Pin the victim for the duration of the write-back
		inner.frames[i].pins += 1;
		// Clear the MMU mapping and snapshot the dirty bit before releasing the frame lock, so
		// the bits cannot be lost to a concurrent access
		let plan = space.evict_prepare(vpage);
		drop(inner);
		let Some((writeback, prev_flags)) = plan else {
			// The entry changed under us; the frame is no longer anyone's
			let mut inner = self.inner.lock();
			let frame = &mut inner.frames[i];
			frame.tenant = None;
			frame.pins -= 1;
			if pin {
				frame.pins += 1;
			}
			return Ok(FrameId(i));
		};
		log::trace!("evicting frame {i} (vpage {vpage:?})");
		stats::EVICTIONS.inc();
		let new_state = match writeback {
			Writeback::None => PageState::NotLoaded,
			Writeback::File {
				file,
				off,
				len,
			} => {
				let _fs = FILESYS_LOCK.lock();
				let data = self.data[i].lock();
				file.write_at(&data[..len], off);
				stats::FILE_WRITEBACKS.inc();
				PageState::NotLoaded
			}
			Writeback::Swap => {
				let Some(slot) = self.swap.alloc() else {
					self.abort_eviction(i, &space, vpage, prev_flags);
					return Err(errno!(ENOMEM));
				};
				let res = {
					let data = self.data[i].lock();
					self.swap.write(&data, slot)
				};
				if let Err(errno) = res {
					self.swap.free(slot);
					self.abort_eviction(i, &space, vpage, prev_flags);
					return Err(errno);
				}
				stats::SWAP_OUTS.inc();
				PageState::Swapped(slot)
			}
		};
		// Re-acquire the frame lock to publish the transition and the freed frame
		let mut inner = self.inner.lock();
		space.evict_finish(vpage, new_state);
		let frame = &mut inner.frames[i];
		frame.tenant = None;
		frame.pins -= 1;
		if pin {
			frame.pins += 1;
		}
		Ok(FrameId(i))
	}

	/// Aborts an eviction whose write-back failed: the victim's MMU mapping is reinstalled with
	/// its pre-eviction flags and the frame is unpinned.
	fn abort_eviction(&self, i: usize, space: &Arc<MemSpace>, vpage: VirtAddr, prev_flags: u32) {
		let mut inner = self.inner.lock();
		space.evict_restore(vpage, FrameId(i), prev_flags);
		inner.frames[i].pins -= 1;
	}

	/// Frees the given frame, dropping its tenant.
	pub fn free(&self, frame: FrameId) {
		let mut inner = self.inner.lock();
		let frame = &mut inner.frames[frame.0];
		frame.allocated = false;
		frame.pins = 0;
		frame.tenant = None;
	}

	/// Records `tenant` as the tenant of `frame`.
	pub fn set_tenant(&self, frame: FrameId, tenant: Tenant) {
		let mut inner = self.inner.lock();
		inner.frames[frame.0].tenant = Some(tenant);
	}

	/// Returns the tenant of `frame`, if any.
	pub fn tenant(&self, frame: FrameId) -> Option<(Weak<MemSpace>, VirtAddr)> {
		let inner = self.inner.lock();
		inner.frames[frame.0]
			.tenant
			.as_ref()
			.map(|t| (t.space.clone(), t.vpage))
	}

	/// Pins the given frame, excluding it from eviction.
	pub fn pin(&self, frame: FrameId) {
		let mut inner = self.inner.lock();
		inner.frames[frame.0].pins += 1;
	}

	/// Removes a pin from the given frame.
	pub fn unpin(&self, frame: FrameId) {
		let mut inner = self.inner.lock();
		let frame = &mut inner.frames[frame.0];
		debug_assert!(frame.pins > 0);
		frame.pins = frame.pins.saturating_sub(1);
	}
}
