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

//! End-to-end tests driving the subsystem the way the trap handler, loader and system call layer
//! do: registering segments, faulting pages in, growing the stack, evicting under memory
//! pressure and mapping files.

use std::collections::HashSet;
use std::sync::Arc;
use tern::{
	device::ramdisk::RamDisk,
	file::Filesystem,
	memory::{
		frame::FrameTable,
		swap::{SwapSpace, SLOT_SECTORS},
		user,
		vmem::FaultCode,
		PAGE_SIZE, PHYS_BASE, STACK_LIMIT, VirtAddr,
	},
	process::{
		mem_space::{page::PageState, MemSpace},
		Process,
	},
};

/// Creates a frame pool of `frames` frames with a swap area of `swap_slots` slots.
fn setup(frames: usize, swap_slots: usize) -> (Arc<FrameTable>, Arc<SwapSpace>) {
	let swap = Arc::new(SwapSpace::new(Box::new(RamDisk::new(
		(swap_slots * SLOT_SECTORS) as u64,
	))));
	(FrameTable::new(frames, swap.clone()), swap)
}

/// Checks the cross-table invariants over the given spaces: no frame and no swap slot is
/// referenced by two pages, and residency agrees with the MMU.
fn check_invariants(spaces: &[&Arc<MemSpace>]) {
	let mut frames_seen = HashSet::new();
	let mut slots_seen = HashSet::new();
	for space in spaces {
		for (vpage, state) in space.page_states() {
			match state {
				PageState::Resident(frame) => {
					assert!(frames_seen.insert(frame), "frame {frame:?} has two tenants");
					let (mapped, _writable) = space
						.translate(vpage)
						.expect("resident page without MMU mapping");
					assert_eq!(mapped, frame);
				}
				PageState::Swapped(slot) => {
					assert!(slots_seen.insert(slot), "slot {slot:?} has two owners");
					assert!(space.translate(vpage).is_none());
				}
				PageState::NotLoaded => {
					assert!(space.translate(vpage).is_none());
				}
			}
		}
	}
}

/// A 10-page program image, each page filled with a distinct byte.
fn image(pages: usize) -> Vec<u8> {
	let mut data = Vec::new();
	for i in 0..pages {
		data.extend(std::iter::repeat(b'a' + i as u8).take(PAGE_SIZE));
	}
	data
}

const CODE_BASE: VirtAddr = VirtAddr(0x08048000);
const MMAP_BASE: VirtAddr = VirtAddr(0x20000000);

/// Registers a `pages`-page executable image on `space`, all pages lazy.
fn load_image(space: &Arc<MemSpace>, fs: &Filesystem, pages: usize, writable: bool) {
	let file = fs.create("prog", &image(pages)).unwrap();
	for i in 0..pages {
		space
			.map_segment(
				file.clone(),
				(i * PAGE_SIZE) as u64,
				CODE_BASE + i * PAGE_SIZE,
				PAGE_SIZE,
				0,
				writable,
			)
			.unwrap();
	}
}

#[test]
fn lazy_exec_load() {
	let (frames, swap) = setup(16, 8);
	let fs = Filesystem::new();
	let space = MemSpace::new(frames.clone(), swap);
	load_image(&space, &fs, 10, false);
	// Nothing is loaded, no frame is charged
	assert_eq!(space.page_states().len(), 10);
	for i in 0..10 {
		assert_eq!(
			space.page_state(CODE_BASE + i * PAGE_SIZE),
			Some(PageState::NotLoaded)
		);
	}
	assert_eq!(frames.free_frames(), 16);
	// Execute (read) each page once
	for i in 0..10 {
		let mut buf = [0u8; 16];
		user::copy_from_user(&space, CODE_BASE + i * PAGE_SIZE, &mut buf).unwrap();
		assert!(buf.iter().all(|b| *b == b'a' + i as u8));
	}
	for i in 0..10 {
		assert!(matches!(
			space.page_state(CODE_BASE + i * PAGE_SIZE),
			Some(PageState::Resident(_))
		));
	}
	assert_eq!(frames.free_frames(), 6);
	check_invariants(&[&space]);
}

#[test]
fn stack_growth_at_boundary() {
	let (frames, swap) = setup(8, 8);
	let space = MemSpace::new(frames, swap);
	let esp = PHYS_BASE - 0x1000;
	// The process enters a system call; the kernel faults on its behalf
	space.set_saved_esp(esp);
	user::copy_to_user(&space, esp - 32, b"x").unwrap();
	let grown = (esp - 32).down_align_to(PAGE_SIZE);
	assert!(matches!(space.page_state(grown), Some(PageState::Resident(_))));
	// The recorded esp moved down to the first fault's address, so one byte further down is
	// still within the window
	user::copy_to_user(&space, esp - 33, b"y").unwrap();
	let mut buf = [0u8; 2];
	user::copy_from_user(&space, esp - 33, &mut buf).unwrap();
	assert_eq!(&buf, b"yx");
	check_invariants(&[&space]);
}

#[test]
fn stack_growth_denied() {
	let (frames, swap) = setup(8, 8);
	let space = MemSpace::new(frames, swap);
	let esp = PHYS_BASE - 0x1000;
	space.set_saved_esp(esp);
	// 64 bytes below esp is outside the growth window
	assert!(user::copy_to_user(&space, esp - 64, b"x").is_err());
	assert_eq!(space.page_state((esp - 64).down_align_to(PAGE_SIZE)), None);
}

#[test]
fn stack_bound() {
	let (frames, swap) = setup(8, 8);
	let space = MemSpace::new(frames, swap);
	// Any fault below the stack limit kills the process
	space.set_saved_esp(STACK_LIMIT);
	assert!(user::touch(&space, STACK_LIMIT - 1, true).is_err());
	// At the limit, within the window, growth succeeds
	space.set_saved_esp(STACK_LIMIT + 32);
	user::touch(&space, STACK_LIMIT, true).unwrap();
	assert!(matches!(
		space.page_state(STACK_LIMIT),
		Some(PageState::Resident(_))
	));
}

#[test]
fn bad_addresses() {
	let (frames, swap) = setup(2, 2);
	let space = MemSpace::new(frames, swap);
	assert!(MemSpace::handle_page_fault(
		&space,
		VirtAddr(0),
		FaultCode::USER,
		PHYS_BASE - 64,
	)
	.is_err());
	assert!(MemSpace::handle_page_fault(
		&space,
		PHYS_BASE + 0x1000,
		FaultCode::USER,
		PHYS_BASE - 64,
	)
	.is_err());
	assert!(user::check_range(VirtAddr(0), 1).is_err());
	assert!(user::check_range(PHYS_BASE - 8, 16).is_err());
	assert!(user::check_range(VirtAddr(0x1000), 16).is_ok());
}

#[test]
fn write_to_read_only() {
	let (frames, swap) = setup(4, 4);
	let fs = Filesystem::new();
	let space = MemSpace::new(frames, swap);
	load_image(&space, &fs, 1, false);
	// Reading is fine
	let mut buf = [0u8; 1];
	user::copy_from_user(&space, CODE_BASE, &mut buf).unwrap();
	// Writing kills
	assert!(user::copy_to_user(&space, CODE_BASE, b"x").is_err());
	assert!(MemSpace::handle_page_fault(
		&space,
		CODE_BASE,
		FaultCode::PRESENT | FaultCode::WRITE | FaultCode::USER,
		PHYS_BASE - 64,
	)
	.is_err());
}

#[test]
fn eviction_of_dirty_stack() {
	let (frames, swap) = setup(8, 16);
	let space = MemSpace::new(frames.clone(), swap.clone());
	// Touch 9 stack pages; the 9th fault evicts one of the first 8
	for i in 1..=9usize {
		let esp = PHYS_BASE - i * PAGE_SIZE;
		space.set_saved_esp(esp);
		user::copy_to_user(&space, esp, &[i as u8; 8]).unwrap();
	}
	let states: Vec<_> = space.page_states().iter().map(|(_, s)| *s).collect();
	assert_eq!(states.len(), 9);
	let resident = states
		.iter()
		.filter(|s| matches!(s, PageState::Resident(_)))
		.count();
	let swapped = states
		.iter()
		.filter(|s| matches!(s, PageState::Swapped(_)))
		.count();
	assert_eq!(resident, 8);
	assert_eq!(swapped, 1);
	assert_eq!(swap.used_slots(), 1);
	check_invariants(&[&space]);
	// Reading every page back returns the bytes previously written, faulting the evicted one
	// back in from swap
	for i in 1..=9usize {
		let esp = PHYS_BASE - i * PAGE_SIZE;
		let mut buf = [0u8; 8];
		user::copy_from_user(&space, esp, &mut buf).unwrap();
		assert_eq!(buf, [i as u8; 8]);
	}
	check_invariants(&[&space]);
}

#[test]
fn clean_file_page_reverts_to_not_loaded() {
	let (frames, swap) = setup(1, 4);
	let fs = Filesystem::new();
	let space = MemSpace::new(frames, swap.clone());
	load_image(&space, &fs, 2, false);
	let mut buf = [0u8; 1];
	user::copy_from_user(&space, CODE_BASE, &mut buf).unwrap();
	// The second page's fault evicts the first; a clean file page is discarded, not swapped
	user::copy_from_user(&space, CODE_BASE + PAGE_SIZE, &mut buf).unwrap();
	assert_eq!(space.page_state(CODE_BASE), Some(PageState::NotLoaded));
	assert_eq!(swap.used_slots(), 0);
	// Reloading it from the file still works
	user::copy_from_user(&space, CODE_BASE, &mut buf).unwrap();
	assert_eq!(buf[0], b'a');
	assert_eq!(
		space.page_state(CODE_BASE + PAGE_SIZE),
		Some(PageState::NotLoaded)
	);
}

#[test]
fn dirty_file_page_goes_to_swap() {
	let (frames, swap) = setup(1, 4);
	let fs = Filesystem::new();
	let space = MemSpace::new(frames, swap.clone());
	// A writable data segment
	load_image(&space, &fs, 2, true);
	user::copy_to_user(&space, CODE_BASE, b"dirty").unwrap();
	// Evict it
	let mut buf = [0u8; 5];
	user::copy_from_user(&space, CODE_BASE + PAGE_SIZE, &mut buf).unwrap();
	assert!(matches!(
		space.page_state(CODE_BASE),
		Some(PageState::Swapped(_))
	));
	assert_eq!(swap.used_slots(), 1);
	// The modified contents come back from swap, not from the file
	user::copy_from_user(&space, CODE_BASE, &mut buf).unwrap();
	assert_eq!(&buf, b"dirty");
	assert_eq!(swap.used_slots(), 0);
}

#[test]
fn mmap_round_trip() {
	let (frames, swap) = setup(8, 8);
	let fs = Filesystem::new();
	let proc = Process::new(1, frames, swap);
	let mut contents = Vec::new();
	contents.extend([b'A'; PAGE_SIZE]);
	contents.extend([b'B'; PAGE_SIZE]);
	contents.extend([b'C'; PAGE_SIZE]);
	fs.create("data", &contents).unwrap();
	let fd = proc.open(&fs, "data").unwrap();
	let id = proc.mmap(fd, MMAP_BASE);
	assert!(id > 0);
	// All three pages are lazy
	for i in 0..3 {
		assert_eq!(
			proc.space.page_state(MMAP_BASE + i * PAGE_SIZE),
			Some(PageState::NotLoaded)
		);
	}
	// Write a byte in the middle of the second page
	user::copy_to_user(&proc.space, MMAP_BASE + 5000, b"X").unwrap();
	proc.munmap(id).unwrap();
	// The mapping is gone
	assert_eq!(proc.space.page_state(MMAP_BASE + PAGE_SIZE), None);
	// The file holds the original bytes, except offset 5000
	let check = fs.open("data").unwrap();
	let mut data = vec![0u8; 3 * PAGE_SIZE];
	assert_eq!(check.read(&mut data), 3 * PAGE_SIZE);
	for (i, b) in data.iter().enumerate() {
		let expected = match i {
			5000 => b'X',
			i if i < PAGE_SIZE => b'A',
			i if i < 2 * PAGE_SIZE => b'B',
			_ => b'C',
		};
		assert_eq!(*b, expected, "byte {i}");
	}
	// Unmapping again reports an unknown id
	assert!(proc.munmap(id).is_err());
	// The implicit unmap at exit is a no-op
	proc.exit();
}

#[test]
fn mmap_overlap_rejected() {
	let (frames, swap) = setup(8, 8);
	let fs = Filesystem::new();
	let proc = Process::new(1, frames, swap);
	fs.create("one", &[1u8; 2 * PAGE_SIZE]).unwrap();
	fs.create("two", &[2u8; PAGE_SIZE]).unwrap();
	let fd1 = proc.open(&fs, "one").unwrap();
	let fd2 = proc.open(&fs, "two").unwrap();
	let id = proc.mmap(fd1, MMAP_BASE);
	assert!(id > 0);
	// The second page of the existing mapping is in the way
	assert_eq!(proc.mmap(fd2, MMAP_BASE + PAGE_SIZE), -1);
	// The existing mapping is intact
	let mut buf = [0u8; 4];
	user::copy_from_user(&proc.space, MMAP_BASE + PAGE_SIZE, &mut buf).unwrap();
	assert_eq!(buf, [1u8; 4]);
	proc.munmap(id).unwrap();
}

#[test]
fn mmap_validations() {
	let (frames, swap) = setup(8, 8);
	let fs = Filesystem::new();
	let proc = Process::new(1, frames, swap);
	fs.create("empty", b"").unwrap();
	fs.create("data", &[7u8; PAGE_SIZE]).unwrap();
	let fd_empty = proc.open(&fs, "empty").unwrap();
	let fd = proc.open(&fs, "data").unwrap();
	// The standard descriptors cannot be mapped
	assert_eq!(proc.mmap(0, MMAP_BASE), -1);
	assert_eq!(proc.mmap(1, MMAP_BASE), -1);
	// Unknown fd
	assert_eq!(proc.mmap(99, MMAP_BASE), -1);
	// Empty file
	assert_eq!(proc.mmap(fd_empty, MMAP_BASE), -1);
	// Null or unaligned address
	assert_eq!(proc.mmap(fd, VirtAddr(0)), -1);
	assert_eq!(proc.mmap(fd, MMAP_BASE + 123), -1);
	// Too close to the kernel half
	assert_eq!(proc.mmap(fd, PHYS_BASE - PAGE_SIZE), -1);
	// Below the loaded image
	proc.space.set_data_end(VirtAddr(0x10000000));
	assert_eq!(proc.mmap(fd, VirtAddr(0x0ffff000)), -1);
	// A valid call still goes through
	assert!(proc.mmap(fd, MMAP_BASE) > 0);
}

#[test]
fn mmap_detached_from_descriptor() {
	let (frames, swap) = setup(8, 8);
	let fs = Filesystem::new();
	let proc = Process::new(1, frames, swap);
	fs.create("data", &[9u8; PAGE_SIZE]).unwrap();
	let fd = proc.open(&fs, "data").unwrap();
	let id = proc.mmap(fd, MMAP_BASE);
	assert!(id > 0);
	// Closing the descriptor does not tear the mapping down
	proc.close(fd).unwrap();
	let mut buf = [0u8; 4];
	user::copy_from_user(&proc.space, MMAP_BASE, &mut buf).unwrap();
	assert_eq!(buf, [9u8; 4]);
	proc.munmap(id).unwrap();
}

#[test]
fn mmap_writeback_on_exit() {
	let (frames, swap) = setup(8, 8);
	let fs = Filesystem::new();
	let proc = Process::new(1, frames, swap);
	fs.create("data", &[0u8; PAGE_SIZE]).unwrap();
	let fd = proc.open(&fs, "data").unwrap();
	assert!(proc.mmap(fd, MMAP_BASE) > 0);
	user::copy_to_user(&proc.space, MMAP_BASE, b"exit writes back").unwrap();
	// Process exits without an explicit munmap
	proc.exit();
	let check = fs.open("data").unwrap();
	let mut data = [0u8; 16];
	assert_eq!(check.read(&mut data), 16);
	assert_eq!(&data, b"exit writes back");
}

#[test]
fn mmap_dirty_page_written_through_on_eviction() {
	let (frames, swap) = setup(1, 4);
	let fs = Filesystem::new();
	let proc = Process::new(1, frames, swap.clone());
	fs.create("data", &[0u8; 2 * PAGE_SIZE]).unwrap();
	let fd = proc.open(&fs, "data").unwrap();
	let id = proc.mmap(fd, MMAP_BASE);
	assert!(id > 0);
	user::copy_to_user(&proc.space, MMAP_BASE, b"through").unwrap();
	// Faulting the second page in evicts the first; a dirty mapped page is written through to
	// the file, never to swap
	let mut buf = [0u8; 7];
	user::copy_from_user(&proc.space, MMAP_BASE + PAGE_SIZE, &mut buf).unwrap();
	assert_eq!(proc.space.page_state(MMAP_BASE), Some(PageState::NotLoaded));
	assert_eq!(swap.used_slots(), 0);
	let check = fs.open("data").unwrap();
	let mut data = [0u8; 7];
	assert_eq!(check.read(&mut data), 7);
	assert_eq!(&data, b"through");
	// Faulting it back in re-reads the written-through contents
	user::copy_from_user(&proc.space, MMAP_BASE, &mut buf).unwrap();
	assert_eq!(&buf, b"through");
	proc.munmap(id).unwrap();
}

#[test]
fn swap_exhaustion_kills_faulting_process() {
	let (frames, swap) = setup(1, 0);
	let space = MemSpace::new(frames, swap);
	let esp = PHYS_BASE - PAGE_SIZE;
	space.set_saved_esp(esp);
	user::copy_to_user(&space, esp, b"first").unwrap();
	let first = (PHYS_BASE - PAGE_SIZE).down_align_to(PAGE_SIZE);
	// Growing a second stack page needs an eviction, which needs a swap slot
	let esp2 = PHYS_BASE - 2 * PAGE_SIZE;
	space.set_saved_esp(esp2);
	assert!(user::copy_to_user(&space, esp2, b"second").is_err());
	// The aborted eviction left the victim untouched
	assert!(matches!(space.page_state(first), Some(PageState::Resident(_))));
	assert!(space.translate(first).is_some());
	let mut buf = [0u8; 5];
	user::copy_from_user(&space, first, &mut buf).unwrap();
	assert_eq!(&buf, b"first");
}

#[test]
fn exit_reclaims_everything() {
	let (frames, swap) = setup(4, 8);
	let fs = Filesystem::new();
	let space = MemSpace::new(frames.clone(), swap.clone());
	load_image(&space, &fs, 2, true);
	// Touch both file pages and grow stack pages until something swaps
	let mut buf = [0u8; 1];
	user::copy_from_user(&space, CODE_BASE, &mut buf).unwrap();
	user::copy_from_user(&space, CODE_BASE + PAGE_SIZE, &mut buf).unwrap();
	for i in 1..=4usize {
		let esp = PHYS_BASE - i * PAGE_SIZE;
		space.set_saved_esp(esp);
		user::copy_to_user(&space, esp, &[i as u8; 4]).unwrap();
	}
	assert!(swap.used_slots() > 0 || frames.free_frames() == 0);
	space.exit();
	assert_eq!(space.page_states().len(), 0);
	assert_eq!(frames.free_frames(), 4);
	assert_eq!(swap.used_slots(), 0);
}

#[test]
fn frames_and_slots_unique_across_processes() {
	let (frames, swap) = setup(4, 16);
	let spaces: Vec<_> = (0..3)
		.map(|_| MemSpace::new(frames.clone(), swap.clone()))
		.collect();
	// Three processes fight over four frames
	for (n, space) in spaces.iter().enumerate() {
		for i in 1..=3usize {
			let esp = PHYS_BASE - i * PAGE_SIZE;
			space.set_saved_esp(esp);
			user::copy_to_user(space, esp, &[(n * 10 + i) as u8; 4]).unwrap();
		}
	}
	let refs: Vec<_> = spaces.iter().collect();
	check_invariants(&refs);
	// Every page still holds its own process's bytes
	for (n, space) in spaces.iter().enumerate() {
		for i in 1..=3usize {
			let esp = PHYS_BASE - i * PAGE_SIZE;
			let mut buf = [0u8; 4];
			user::copy_from_user(space, esp, &mut buf).unwrap();
			assert_eq!(buf, [(n * 10 + i) as u8; 4]);
		}
	}
	check_invariants(&refs);
}

#[test]
fn concurrent_fault_and_eviction() {
	let (frames, swap) = setup(4, 64);
	let handles: Vec<_> = (0..4)
		.map(|n| {
			let frames = frames.clone();
			let swap = swap.clone();
			std::thread::spawn(move || {
				let space = MemSpace::new(frames, swap);
				for round in 0..20usize {
					for i in 1..=6usize {
						let esp = PHYS_BASE - i * PAGE_SIZE;
						space.set_saved_esp(esp);
						let val = (n * 50 + i + round) as u8;
						user::copy_to_user(&space, esp, &[val; 16]).unwrap();
						let mut buf = [0u8; 16];
						user::copy_from_user(&space, esp, &mut buf).unwrap();
						assert_eq!(buf, [val; 16]);
					}
				}
				space.exit();
			})
		})
		.collect();
	for handle in handles {
		handle.join().unwrap();
	}
	assert_eq!(frames.free_frames(), 4);
	assert_eq!(swap.used_slots(), 0);
}
