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

//! A memory mapping is a contiguous file-backed region of a process's address space, established
//! by `mmap` and destroyed by `munmap` or by the process's exit.

use crate::{file::File, memory::VirtAddr};
use alloc::{sync::Arc, vec::Vec};

/// A record of an active file mapping.
///
/// The record keeps its own handle to the mapped file, obtained by re-opening the file passed to
/// `mmap`, so the mapping survives the closing of the caller's file descriptor. The handle is
/// closed when the record is destroyed.
pub struct MemMapping {
	/// The mapping's id, unique within the owning process.
	pub id: u32,
	/// The virtual address of the beginning of the mapping.
	pub addr: VirtAddr,
	/// The length of the mapping in bytes.
	pub len: u64,
	/// The mapping's own handle to the mapped file.
	pub file: Arc<File>,
	/// The pages covering the mapping, in address order.
	pub pages: Vec<VirtAddr>,
}
