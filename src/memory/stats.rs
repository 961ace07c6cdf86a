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

//! Subsystem statistics.
//!
//! The counters are printed at shutdown and exported for diagnostics. They only ever increase.

use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

/// A monotonic event counter.
pub struct Counter(AtomicUsize);

impl Counter {
	/// Creates a new counter starting at zero.
	pub const fn new() -> Self {
		Self(AtomicUsize::new(0))
	}

	/// Increments the counter.
	#[inline]
	pub fn inc(&self) {
		self.0.fetch_add(1, Relaxed);
	}

	/// Returns the current value.
	pub fn get(&self) -> usize {
		self.0.load(Relaxed)
	}
}

/// The number of page faults processed.
pub static PAGE_FAULTS: Counter = Counter::new();
/// The number of successful stack growths.
pub static STACK_GROWTHS: Counter = Counter::new();
/// The number of frames evicted.
pub static EVICTIONS: Counter = Counter::new();
/// The number of pages read back from the swap area.
pub static SWAP_INS: Counter = Counter::new();
/// The number of pages written to the swap area.
pub static SWAP_OUTS: Counter = Counter::new();
/// The number of dirty mapped pages written through to their file.
pub static FILE_WRITEBACKS: Counter = Counter::new();
