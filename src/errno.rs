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

//! This module stores the errno utilities.
//!
//! Each fallible operation of the subsystem returns an [`EResult`]. An error reaching the trap or
//! system call boundary makes the collaborator terminate the offending process with exit status
//! `-1`.

use core::fmt;

/// Permission denied.
pub const EACCES: i32 = 1;
/// Bad file descriptor.
pub const EBADF: i32 = 7;
/// Device or resource busy.
pub const EBUSY: i32 = 9;
/// File exists.
pub const EEXIST: i32 = 19;
/// Bad address.
pub const EFAULT: i32 = 20;
/// Invalid argument.
pub const EINVAL: i32 = 27;
/// I/O error.
pub const EIO: i32 = 28;
/// File descriptor value too large.
pub const EMFILE: i32 = 32;
/// No such file or directory.
pub const ENOENT: i32 = 44;
/// Not enough space.
pub const ENOMEM: i32 = 48;
/// No space left on device.
pub const ENOSPC: i32 = 51;
/// No such device or address.
pub const ENXIO: i32 = 57;
/// Value too large to be stored in data type.
pub const EOVERFLOW: i32 = 61;
/// Operation not permitted.
pub const EPERM: i32 = 63;
/// No such process.
pub const ESRCH: i32 = 71;

/// An Unix-like error code.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Errno(i32);

impl Errno {
	/// Creates a new instance from the given error code.
	pub const fn new(errno: i32) -> Self {
		Self(errno)
	}

	/// Returns the error code.
	pub fn as_int(&self) -> i32 {
		self.0
	}
}

impl fmt::Debug for Errno {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, fmt)
	}
}

impl fmt::Display for Errno {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self.0 {
			EACCES => "EACCES",
			EBADF => "EBADF",
			EBUSY => "EBUSY",
			EEXIST => "EEXIST",
			EFAULT => "EFAULT",
			EINVAL => "EINVAL",
			EIO => "EIO",
			EMFILE => "EMFILE",
			ENOENT => "ENOENT",
			ENOMEM => "ENOMEM",
			ENOSPC => "ENOSPC",
			ENXIO => "ENXIO",
			EOVERFLOW => "EOVERFLOW",
			EPERM => "EPERM",
			ESRCH => "ESRCH",
			_ => return write!(fmt, "errno {}", self.0),
		};
		write!(fmt, "{name}")
	}
}

/// Constructs an [`Errno`] from its name.
#[macro_export]
macro_rules! errno {
	($name:ident) => {
		$crate::errno::Errno::new($crate::errno::$name)
	};
}

/// A result with an [`Errno`] as the error type.
pub type EResult<T> = Result<T, Errno>;
