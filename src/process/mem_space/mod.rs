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

//! A memory space is the virtual memory handler of a process.
//!
//! It holds the supplemental page table: the set of pages the process may legitimately touch,
//! with their provenance and current residency. The page fault policy engine consults it to
//! decide, for each fault, between growing the stack, materializing a lazy page, reading a page
//! back from swap, and terminating the process.
//!
//! The table is mutated by the owning process, and by the frame table's evictor which performs
//! the `RESIDENT → {SWAPPED, NOT_LOADED}` transitions under the frame lock.

pub mod mapping;
pub mod page;

use crate::{
	errno,
	errno::EResult,
	file::{File, FILESYS_LOCK},
	memory::{
		frame::{FrameId, FrameTable, Tenant},
		stats,
		swap::{SwapSlot, SwapSpace},
		vmem,
		vmem::{FaultCode, PageDir},
		VirtAddr, PAGE_SIZE, PHYS_BASE, STACK_LIMIT,
	},
};
use alloc::{
	collections::BTreeMap,
	sync::Arc,
	vec::Vec,
};
use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use hashbrown::HashMap;
use mapping::MemMapping;
use page::{FileBacking, PageSource, PageState, UserPage};
use spin::Mutex;

/// The furthest below the stack pointer a legitimate access may land: the PUSHA instruction
/// writes 32 bytes below `esp`.
const STACK_SLACK: usize = 32;

/// What the evictor must do with a victim page's contents.
pub(crate) enum Writeback {
	/// Discard: the contents can be recovered from the page's source.
	None,
	/// Write the page to a swap slot.
	Swap,
	/// Write the page through to the mapped file.
	File {
		/// The mapping's file handle.
		file: Arc<File>,
		/// The offset of the page in the file.
		off: u64,
		/// The number of bytes to write.
		len: usize,
	},
}

/// Inner state of the memory space.
#[derive(Default)]
struct SpaceState {
	/// The supplemental page table, keyed by page-aligned user virtual address.
	pages: HashMap<VirtAddr, UserPage>,
	/// The active file mappings, keyed by id. Iteration order is creation order.
	mappings: BTreeMap<u32, MemMapping>,
	/// The end of the virtual memory reserved by the loader for code and data. File mappings must
	/// lie strictly above.
	data_end: VirtAddr,
	/// The id to hand to the next mapping.
	next_mapping_id: u32,
}

/// A process's virtual memory space.
pub struct MemSpace {
	/// The space's structure.
	state: Mutex<SpaceState>,
	/// The space's virtual memory context.
	pub(crate) page_dir: Mutex<PageDir>,
	/// The user stack pointer saved at the most recent system call entry, for faults arriving
	/// from kernel mode.
	saved_esp: AtomicUsize,

	/// The frame table frames are drawn from.
	pub(crate) frames: Arc<FrameTable>,
	/// The swap area evicted pages live in.
	pub(crate) swap: Arc<SwapSpace>,
}

impl MemSpace {
	/// Creates a new, empty memory space drawing frames from `frames` and swap slots from `swap`.
	pub fn new(frames: Arc<FrameTable>, swap: Arc<SwapSpace>) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(SpaceState {
				next_mapping_id: 1,
				..Default::default()
			}),
			page_dir: Mutex::new(PageDir::new()),
			saved_esp: AtomicUsize::new(0),

			frames,
			swap,
		})
	}

	/// Registers a lazy executable segment page, to be loaded from `file` on first access.
	///
	/// Arguments:
	/// - `file` is the program image
	/// - `off` is the offset of the page's contents in `file`
	/// - `vpage` is the page-aligned user virtual address of the page
	/// - `read_bytes` is the number of bytes to read from `file`
	/// - `zero_bytes` is the number of bytes to zero after the read bytes
	/// - `writable` tells whether the process may write to the page
	///
	/// The loader calls this for every page of every segment at program load.
	pub fn map_segment(
		&self,
		file: Arc<File>,
		off: u64,
		vpage: VirtAddr,
		read_bytes: usize,
		zero_bytes: usize,
		writable: bool,
	) -> EResult<()> {
		if !vpage.is_aligned_to(PAGE_SIZE) || read_bytes + zero_bytes != PAGE_SIZE {
			return Err(errno!(EINVAL));
		}
		if vpage.is_null() || !vpage.is_user() {
			return Err(errno!(EFAULT));
		}
		let mut state = self.state.lock();
		if state.pages.contains_key(&vpage) {
			return Err(errno!(EEXIST));
		}
		state.pages.insert(
			vpage,
			UserPage {
				source: PageSource::File(FileBacking {
					file,
					off,
					read_bytes,
					zero_bytes,
				}),
				writable,
				state: PageState::NotLoaded,
			},
		);
		// Keep track of the top of the loaded image
		let end = vpage + PAGE_SIZE;
		if end.0 > state.data_end.0 {
			state.data_end = end;
		}
		Ok(())
	}

	/// Sets the end of the virtual memory reserved by the loader for code and data.
	pub fn set_data_end(&self, addr: VirtAddr) {
		self.state.lock().data_end = addr;
	}

	/// Records the user stack pointer, to be used for faults arriving from kernel mode.
	pub fn set_saved_esp(&self, esp: VirtAddr) {
		self.saved_esp.store(esp.0, Relaxed);
	}

	/// Returns the saved user stack pointer.
	pub fn saved_esp(&self) -> VirtAddr {
		VirtAddr(self.saved_esp.load(Relaxed))
	}

	/// Returns the residency of the page at `vpage`, if the process may touch it.
	pub fn page_state(&self, vpage: VirtAddr) -> Option<PageState> {
		self.state.lock().pages.get(&vpage).map(|p| p.state)
	}

	/// Returns the residency of every page of the space.
	pub fn page_states(&self) -> Vec<(VirtAddr, PageState)> {
		self.state
			.lock()
			.pages
			.iter()
			.map(|(vpage, p)| (*vpage, p.state))
			.collect()
	}

	/// Returns the frame the MMU maps `vpage` to, along with its writable bit.
	///
	/// If no mapping is present, the function returns `None`.
	pub fn translate(&self, vpage: VirtAddr) -> Option<(FrameId, bool)> {
		self.page_dir
			.lock()
			.translate(vpage)
			.map(|(frame, flags)| (frame, flags & vmem::FLAG_WRITE != 0))
	}

	/// Function called whenever the CPU triggered a page fault for the context.
	///
	/// Arguments:
	/// - `fault_addr` is the virtual address of the access that caused the fault, read from `CR2`
	/// - `code` is the error code pushed by the CPU
	/// - `frame_esp` is the user stack pointer saved in the interrupt frame; it is only meaningful
	///   when the fault arrived from user mode
	///
	/// On success, the faulting access can be retried. On failure, the collaborator must
	/// terminate the process with exit status `-1`; the error is surfaced through the normal
	/// thread-exit path so that exit cleanup runs.
	pub fn handle_page_fault(
		this: &Arc<Self>,
		fault_addr: VirtAddr,
		code: FaultCode,
		frame_esp: VirtAddr,
	) -> EResult<()> {
		stats::PAGE_FAULTS.inc();
		if fault_addr.is_null() || !fault_addr.is_user() {
			return Err(errno!(EFAULT));
		}
		// A fault taken in kernel mode, e.g. while servicing a system call, uses the user stack
		// pointer saved at system call entry
		let esp = if code.contains(FaultCode::USER) {
			frame_esp
		} else {
			this.saved_esp()
		};
		let vpage = fault_addr.down_align_to(PAGE_SIZE);
		loop {
			let page = {
				let state = this.state.lock();
				state
					.pages
					.get(&vpage)
					.map(|p| (p.source.clone(), p.writable, p.state))
			};
			let Some((source, writable, page_state)) = page else {
				return Self::grow_stack(this, fault_addr, vpage, esp);
			};
			if code.contains(FaultCode::WRITE) && !writable {
				log::trace!("write to read-only page {vpage:?}");
				return Err(errno!(EACCES));
			}
			match page_state {
				PageState::Resident(_) => {
					// If the MMU mapping is present, the fault was spurious. Otherwise an
					// eviction is in flight; wait for the evictor to publish the new residency
					if this.page_dir.lock().translate(vpage).is_some() {
						return Ok(());
					}
					core::hint::spin_loop();
				}
				PageState::NotLoaded => {
					return Self::materialize(this, vpage, &source, writable, None);
				}
				PageState::Swapped(slot) => {
					if matches!(source, PageSource::Mapped { .. }) {
						// Mapped pages are written through to their file on eviction; they are
						// never in swap
						return Err(errno!(EFAULT));
					}
					Self::materialize(this, vpage, &source, writable, Some(slot))?;
					if matches!(source, PageSource::Stack) {
						this.set_saved_esp(fault_addr);
					}
					return Ok(());
				}
			}
		}
	}

	/// Attempts to grow the user stack with a new page at `vpage`.
	///
	/// The access is a legitimate stack growth iff it lies within the stack region and at most
	/// [`STACK_SLACK`] bytes below `esp`.
	fn grow_stack(
		this: &Arc<Self>,
		fault_addr: VirtAddr,
		vpage: VirtAddr,
		esp: VirtAddr,
	) -> EResult<()> {
		if fault_addr < STACK_LIMIT {
			log::trace!("fault at {fault_addr:?}: below the stack limit");
			return Err(errno!(EFAULT));
		}
		if fault_addr.0 < esp.0.saturating_sub(STACK_SLACK) {
			log::trace!("fault at {fault_addr:?}: outside the stack growth window (esp {esp:?})");
			return Err(errno!(EFAULT));
		}
		this.state.lock().pages.insert(
			vpage,
			UserPage {
				source: PageSource::Stack,
				writable: true,
				state: PageState::NotLoaded,
			},
		);
		Self::materialize(this, vpage, &PageSource::Stack, true, None)?;
		stats::STACK_GROWTHS.inc();
		this.set_saved_esp(fault_addr);
		Ok(())
	}

	/// Gives the page at `vpage` a frame filled with its contents, and installs it in the MMU.
	///
	/// If `slot` is given, the contents are read back from the swap area; otherwise they come
	/// from the page's source. The frame stays pinned until the installation is complete.
	///
	/// On any intermediate failure, the frame is released and the error is propagated.
	fn materialize(
		this: &Arc<Self>,
		vpage: VirtAddr,
		source: &PageSource,
		writable: bool,
		slot: Option<SwapSlot>,
	) -> EResult<()> {
		let zero = slot.is_none() && matches!(source, PageSource::Stack);
		let frame = this.frames.alloc(zero, true)?;
		let res = match slot {
			Some(slot) => {
				let res = {
					let mut data = this.frames.data(frame).lock();
					this.swap.read(slot, &mut data)
				};
				if res.is_ok() {
					this.swap.free(slot);
					stats::SWAP_INS.inc();
				}
				res
			}
			None => match source {
				PageSource::Stack => Ok(()),
				PageSource::File(backing)
				| PageSource::Mapped {
					backing, ..
				} => this.load_from_file(frame, backing),
			},
		};
		if let Err(errno) = res {
			this.frames.free(frame);
			return Err(errno);
		}
		{
			let mut state = this.state.lock();
			let Some(page) = state.pages.get_mut(&vpage) else {
				this.frames.free(frame);
				return Err(errno!(EFAULT));
			};
			this.page_dir.lock().map(vpage, frame, writable);
			page.state = PageState::Resident(frame);
		}
		this.frames.set_tenant(
			frame,
			Tenant {
				space: Arc::downgrade(this),
				vpage,
			},
		);
		this.frames.unpin(frame);
		log::trace!("page {vpage:?} resident in frame {frame:?}");
		Ok(())
	}

	/// Fills `frame` with a page read from `backing`.
	fn load_from_file(&self, frame: FrameId, backing: &FileBacking) -> EResult<()> {
		let _fs = FILESYS_LOCK.lock();
		let mut data = self.frames.data(frame).lock();
		backing.file.seek(backing.off);
		let n = backing.file.read(&mut data[..backing.read_bytes]);
		if n != backing.read_bytes {
			log::trace!("short read: {n}/{} bytes at {}", backing.read_bytes, backing.off);
			return Err(errno!(EIO));
		}
		data[backing.read_bytes..].fill(0);
		Ok(())
	}

	/// Maps the whole of `file` at `addr`.
	///
	/// The file is re-opened so the mapping is detached from the caller's file descriptor. One
	/// page is registered per covered page of the file, lazily loaded on first access.
	///
	/// Validations: `addr` is page-aligned and non-null; the file is non-empty; every covered
	/// page lies strictly between the loaded image and the stack region, and overlaps no existing
	/// page.
	///
	/// On success, the function returns the mapping's id, unique within the process.
	pub fn mmap(this: &Arc<Self>, file: &File, addr: VirtAddr) -> EResult<u32> {
		if addr.is_null() || !addr.is_aligned_to(PAGE_SIZE) {
			return Err(errno!(EINVAL));
		}
		let len = {
			let _fs = FILESYS_LOCK.lock();
			file.len()
		};
		if len == 0 {
			return Err(errno!(EINVAL));
		}
		let count = len.div_ceil(PAGE_SIZE as u64) as usize;
		let mut state = this.state.lock();
		for i in 0..count {
			let vpage = addr + i * PAGE_SIZE;
			if vpage.0 <= state.data_end.0 || vpage.0 >= PHYS_BASE.0 - PAGE_SIZE {
				return Err(errno!(EINVAL));
			}
			if state.pages.contains_key(&vpage) {
				return Err(errno!(EEXIST));
			}
		}
		let id = state.next_mapping_id;
		state.next_mapping_id += 1;
		let handle = file.reopen();
		let mut pages = Vec::with_capacity(count);
		let mut remaining = len;
		let mut off = 0;
		for i in 0..count {
			let vpage = addr + i * PAGE_SIZE;
			let read_bytes = remaining.min(PAGE_SIZE as u64) as usize;
			state.pages.insert(
				vpage,
				UserPage {
					source: PageSource::Mapped {
						mapping: id,
						backing: FileBacking {
							file: handle.clone(),
							off,
							read_bytes,
							zero_bytes: PAGE_SIZE - read_bytes,
						},
					},
					writable: true,
					state: PageState::NotLoaded,
				},
			);
			pages.push(vpage);
			remaining -= read_bytes as u64;
			off += read_bytes as u64;
		}
		state.mappings.insert(
			id,
			MemMapping {
				id,
				addr,
				len,
				file: handle,
				pages,
			},
		);
		log::debug!("mmap: {count} pages at {addr:?}, id {id}");
		Ok(id)
	}

	/// Destroys the mapping with the given id.
	///
	/// Every covered page whose MMU dirty bit is set is written through to the mapped file. All
	/// covered pages then release their frame or swap slot and leave the supplemental page table,
	/// and the mapping's file handle is closed.
	///
	/// If no mapping has the given id, the function returns an error.
	pub fn munmap(&self, id: u32) -> EResult<()> {
		let mapping = {
			let mut state = self.state.lock();
			state.mappings.remove(&id).ok_or(errno!(EINVAL))?
		};
		log::debug!("munmap: id {id} at {:?}", mapping.addr);
		for vpage in &mapping.pages {
			self.reclaim_page(*vpage, true);
		}
		// Dropping the record closes the mapping's file handle
		Ok(())
	}

	/// Removes the page at `vpage` from the supplemental page table and releases whatever it
	/// holds: frame, swap slot and MMU mapping.
	///
	/// If `write_back` is set and the page belongs to a file mapping, a dirty page is first
	/// written through to the file.
	///
	/// If the page is concurrently being evicted, the function waits for the eviction to settle.
	fn reclaim_page(&self, vpage: VirtAddr, write_back: bool) {
		loop {
			let page_state = {
				self.state.lock().pages.get(&vpage).map(|p| p.state)
			};
			match page_state {
				None => return,
				Some(PageState::NotLoaded | PageState::Swapped(_)) => {
					let mut state = self.state.lock();
					match state.pages.get(&vpage).map(|p| p.state) {
						Some(PageState::NotLoaded) => {
							state.pages.remove(&vpage);
							return;
						}
						Some(PageState::Swapped(slot)) => {
							state.pages.remove(&vpage);
							drop(state);
							self.swap.free(slot);
							return;
						}
						None => return,
						// Changed in between, retry
						Some(PageState::Resident(_)) => continue,
					}
				}
				Some(PageState::Resident(frame)) => {
					// Pin first so the frame cannot be evicted or reassigned under us
					self.frames.pin(frame);
					let mut state = self.state.lock();
					if state.pages.get(&vpage).map(|p| p.state) != Some(PageState::Resident(frame))
					{
						drop(state);
						self.frames.unpin(frame);
						continue;
					}
					let prev = self.page_dir.lock().unmap(vpage);
					let Some(prev) = prev else {
						// An eviction cleared the mapping but has not published yet
						drop(state);
						self.frames.unpin(frame);
						core::hint::spin_loop();
						continue;
					};
					let page = state.pages.remove(&vpage);
					drop(state);
					if write_back && prev & vmem::FLAG_DIRTY != 0 {
						if let Some(UserPage {
							source: PageSource::Mapped {
								backing, ..
							},
							..
						}) = &page
						{
							let _fs = FILESYS_LOCK.lock();
							let data = self.frames.data(frame).lock();
							backing.file.write_at(&data[..backing.read_bytes], backing.off);
							stats::FILE_WRITEBACKS.inc();
						}
					}
					self.frames.free(frame);
					return;
				}
			}
		}
	}

	/// Releases every resource the space holds, as part of the owning process's exit.
	///
	/// Active mappings are unmapped in creation order, with the same write-back as an explicit
	/// `munmap`. Every remaining page then releases its frame or swap slot.
	pub fn exit(&self) {
		loop {
			let id = {
				self.state.lock().mappings.keys().next().copied()
			};
			let Some(id) = id else {
				break;
			};
			let _ = self.munmap(id);
		}
		let vpages: Vec<VirtAddr> = {
			self.state.lock().pages.keys().copied().collect()
		};
		for vpage in vpages {
			self.reclaim_page(vpage, false);
		}
	}

	/// Tells whether the accessed bit of the MMU mapping for `vpage` is set.
	pub(crate) fn frame_accessed(&self, vpage: VirtAddr) -> bool {
		self.page_dir.lock().is_accessed(vpage)
	}

	/// Clears the accessed bit of the MMU mapping for `vpage`.
	pub(crate) fn clear_frame_accessed(&self, vpage: VirtAddr) {
		self.page_dir.lock().clear_accessed(vpage);
	}

	/// First half of an eviction, called by the frame table with the frame lock held: clears the
	/// MMU mapping for `vpage` and decides the destination of the page's contents from the dirty
	/// bit snapshot and the page's source.
	///
	/// The function returns the write-back plan along with the pre-clear MMU entry flags, needed
	/// to undo the eviction if it aborts. If the page is not resident, the function returns
	/// `None` and the eviction is abandoned.
	pub(crate) fn evict_prepare(&self, vpage: VirtAddr) -> Option<(Writeback, u32)> {
		let state = self.state.lock();
		let page = state.pages.get(&vpage)?;
		let PageState::Resident(_) = page.state else {
			return None;
		};
		let prev = self.page_dir.lock().unmap(vpage)?;
		let dirty = prev & vmem::FLAG_DIRTY != 0;
		let writeback = match &page.source {
			// Stack pages have no backing store; their contents survive only in swap
			PageSource::Stack => Writeback::Swap,
			PageSource::File(_) if dirty => Writeback::Swap,
			PageSource::File(_) => Writeback::None,
			PageSource::Mapped {
				backing, ..
			} if dirty => Writeback::File {
				file: backing.file.clone(),
				off: backing.off,
				len: backing.read_bytes,
			},
			PageSource::Mapped {
				..
			} => Writeback::None,
		};
		Some((writeback, prev))
	}

	/// Second half of an eviction, called by the frame table with the frame lock re-acquired:
	/// publishes the page's new residency.
	pub(crate) fn evict_finish(&self, vpage: VirtAddr, new_state: PageState) {
		let mut state = self.state.lock();
		if let Some(page) = state.pages.get_mut(&vpage) {
			page.state = new_state;
		}
	}

	/// Undoes an aborted eviction: the MMU mapping for `vpage` is reinstalled with its pre-clear
	/// flags so the accessed and dirty bits are not lost.
	pub(crate) fn evict_restore(&self, vpage: VirtAddr, frame: FrameId, prev_flags: u32) {
		self.page_dir.lock().remap(vpage, frame, prev_flags);
	}
}

impl Drop for MemSpace {
	fn drop(&mut self) {
		self.exit();
	}
}
