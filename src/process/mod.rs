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

//! A process is the endpoint this subsystem serves.
//!
//! Only the memory-facing part of the process lives here: its memory space, its file descriptor
//! table (enough to carry the `mmap`/`munmap` system call surface) and the user stack pointer
//! saved at system call entry. Scheduling and the rest of the process lifecycle belong to other
//! parts of the kernel.

pub mod mem_space;

use crate::{
	errno,
	errno::EResult,
	file::{File, Filesystem, FILESYS_LOCK},
	memory::{frame::FrameTable, swap::SwapSpace, VirtAddr},
};
use alloc::{sync::Arc, vec, vec::Vec};
use mem_space::MemSpace;
use spin::Mutex;

/// Type representing a Process IDentifier.
pub type Pid = u32;

/// The number of slots in a process's file descriptor table.
pub const FD_TABLE_SIZE: usize = 128;
/// The first usable file descriptor. Slots `0` and `1` are reserved for the console.
const FIRST_FD: usize = 2;

/// The memory-facing context of a process.
pub struct Process {
	/// The process's id.
	pub pid: Pid,
	/// The process's memory space.
	pub space: Arc<MemSpace>,
	/// The process's open files.
	fds: Mutex<Vec<Option<Arc<File>>>>,
}

impl Process {
	/// Creates a new process drawing frames from `frames` and swap slots from `swap`.
	pub fn new(pid: Pid, frames: Arc<FrameTable>, swap: Arc<SwapSpace>) -> Self {
		Self {
			pid,
			space: MemSpace::new(frames, swap),
			fds: Mutex::new(vec![None; FD_TABLE_SIZE]),
		}
	}

	/// Opens the file named `name` on `fs` and returns a new file descriptor for it.
	pub fn open(&self, fs: &Filesystem, name: &str) -> EResult<i32> {
		let file = {
			let _fs = FILESYS_LOCK.lock();
			fs.open(name)?
		};
		let mut fds = self.fds.lock();
		let fd = fds
			.iter()
			.skip(FIRST_FD)
			.position(|f| f.is_none())
			.map(|i| i + FIRST_FD)
			.ok_or(errno!(EMFILE))?;
		fds[fd] = Some(file);
		Ok(fd as i32)
	}

	/// Returns the file open as `fd`.
	pub fn file(&self, fd: i32) -> EResult<Arc<File>> {
		if fd < FIRST_FD as i32 {
			return Err(errno!(EBADF));
		}
		self.fds
			.lock()
			.get(fd as usize)
			.and_then(|f| f.clone())
			.ok_or(errno!(EBADF))
	}

	/// Closes the file descriptor `fd`.
	pub fn close(&self, fd: i32) -> EResult<()> {
		if fd < FIRST_FD as i32 {
			return Err(errno!(EBADF));
		}
		let mut fds = self.fds.lock();
		let slot = fds.get_mut(fd as usize).ok_or(errno!(EBADF))?;
		slot.take().map(|_| ()).ok_or(errno!(EBADF))
	}

	/// The `mmap` system call: maps the whole of the file open as `fd` at `addr`.
	///
	/// The function returns the mapping's id, or `-1` on any validation failure. The standard
	/// descriptors cannot be mapped.
	pub fn mmap(&self, fd: i32, addr: VirtAddr) -> i32 {
		if fd == 0 || fd == 1 {
			return -1;
		}
		let Ok(file) = self.file(fd) else {
			return -1;
		};
		match MemSpace::mmap(&self.space, &file, addr) {
			Ok(id) => id as i32,
			Err(_) => -1,
		}
	}

	/// The `munmap` system call: destroys the mapping with the given id.
	///
	/// On an unknown id the function returns an error, upon which the caller terminates the
	/// process with exit status `-1`.
	pub fn munmap(&self, id: i32) -> EResult<()> {
		if id <= 0 {
			return Err(errno!(EINVAL));
		}
		self.space.munmap(id as u32)
	}

	/// Records the user stack pointer at system call entry, so the fault engine can find it when
	/// a fault occurs in kernel mode.
	pub fn set_saved_esp(&self, esp: VirtAddr) {
		self.space.set_saved_esp(esp);
	}

	/// Releases every resource the process holds: active mappings are written back and torn down,
	/// then every page releases its frame or swap slot, then open files are closed.
	pub fn exit(&self) {
		self.space.exit();
		self.fds.lock().fill(None);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::device::ramdisk::RamDisk;
	use alloc::boxed::Box;

	fn new_proc() -> (Filesystem, Process) {
		let swap = Arc::new(SwapSpace::new(Box::new(RamDisk::new(64))));
		let frames = FrameTable::new(4, swap.clone());
		(Filesystem::new(), Process::new(1, frames, swap))
	}

	#[test]
	fn fd_allocation() {
		let (fs, proc) = new_proc();
		fs.create("a", b"x").unwrap();
		fs.create("b", b"y").unwrap();
		let fd1 = proc.open(&fs, "a").unwrap();
		let fd2 = proc.open(&fs, "b").unwrap();
		assert_eq!(fd1, 2);
		assert_eq!(fd2, 3);
		proc.close(fd1).unwrap();
		// The freed slot is reused
		assert_eq!(proc.open(&fs, "a").unwrap(), 2);
		// The console descriptors are not real files
		assert!(proc.file(0).is_err());
		assert!(proc.close(1).is_err());
		assert!(proc.file(99).is_err());
		assert!(proc.close(fd1).is_ok());
		assert!(proc.close(fd1).is_err());
	}

	#[test]
	fn munmap_unknown_id() {
		let (_fs, proc) = new_proc();
		assert!(proc.munmap(0).is_err());
		assert!(proc.munmap(7).is_err());
	}
}
