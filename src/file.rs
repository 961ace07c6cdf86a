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

//! The filesystem collaborator.
//!
//! The subsystem reads executable segments and mapped files from here, and writes dirty mapped
//! pages back. A [`Filesystem`] is a flat, in-memory volume of named nodes; a [`File`] is an open
//! handle with its own cursor, so that re-opening a file detaches the new handle from the
//! original descriptor's position.
//!
//! The filesystem is not thread-safe at operation granularity: every caller performing file I/O
//! must hold [`FILESYS_LOCK`] across the whole operation, like every other filesystem user in the
//! kernel.

use crate::{errno, errno::EResult};
use alloc::{
	collections::BTreeMap,
	string::{String, ToString},
	sync::Arc,
	vec::Vec,
};
use spin::Mutex;

/// The lock serializing all accesses to the filesystem.
pub static FILESYS_LOCK: Mutex<()> = Mutex::new(());

/// A node of the filesystem, holding the file's contents.
struct Vnode {
	/// The file's data.
	data: Mutex<Vec<u8>>,
}

/// An open file handle.
///
/// Several handles may point to the same node; each has an independent cursor.
pub struct File {
	/// The underlying node.
	node: Arc<Vnode>,
	/// The handle's cursor, in bytes from the beginning of the file.
	off: Mutex<u64>,
}

impl File {
	/// Returns the length of the file in bytes.
	pub fn len(&self) -> u64 {
		self.node.data.lock().len() as u64
	}

	/// Tells whether the file is empty.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Creates a new handle to the same file, with an independent cursor set to the beginning.
	pub fn reopen(&self) -> Arc<File> {
		Arc::new(File {
			node: self.node.clone(),
			off: Mutex::new(0),
		})
	}

	/// Moves the handle's cursor to `off` bytes from the beginning of the file.
	pub fn seek(&self, off: u64) {
		*self.off.lock() = off;
	}

	/// Reads from the file at the handle's cursor, advancing it.
	///
	/// The function returns the number of bytes read, which is less than `buf.len()` if the end of
	/// the file is reached.
	pub fn read(&self, buf: &mut [u8]) -> usize {
		let mut off = self.off.lock();
		let data = self.node.data.lock();
		let start = (*off as usize).min(data.len());
		let len = buf.len().min(data.len() - start);
		buf[..len].copy_from_slice(&data[start..(start + len)]);
		*off += len as u64;
		len
	}

	/// Writes `buf` to the file at offset `off`, without touching the handle's cursor.
	///
	/// Writes past the end of the file are truncated: the function returns the number of bytes
	/// written.
	pub fn write_at(&self, buf: &[u8], off: u64) -> usize {
		let mut data = self.node.data.lock();
		let start = (off as usize).min(data.len());
		let len = buf.len().min(data.len() - start);
		data[start..(start + len)].copy_from_slice(&buf[..len]);
		len
	}
}

/// A flat, in-memory volume.
#[derive(Default)]
pub struct Filesystem {
	/// The volume's nodes, by name.
	nodes: Mutex<BTreeMap<String, Arc<Vnode>>>,
}

impl Filesystem {
	/// Creates a new, empty volume.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a file named `name` with the given contents, and returns a handle to it.
	///
	/// If a file with the same name exists, the function returns an error.
	pub fn create(&self, name: &str, contents: &[u8]) -> EResult<Arc<File>> {
		let mut nodes = self.nodes.lock();
		if nodes.contains_key(name) {
			return Err(errno!(EEXIST));
		}
		let node = Arc::new(Vnode {
			data: Mutex::new(contents.to_vec()),
		});
		nodes.insert(name.to_string(), node.clone());
		Ok(Arc::new(File {
			node,
			off: Mutex::new(0),
		}))
	}

	/// Opens the file named `name`.
	///
	/// If no such file exists, the function returns an error.
	pub fn open(&self, name: &str) -> EResult<Arc<File>> {
		let nodes = self.nodes.lock();
		let node = nodes.get(name).ok_or(errno!(ENOENT))?;
		Ok(Arc::new(File {
			node: node.clone(),
			off: Mutex::new(0),
		}))
	}
}
