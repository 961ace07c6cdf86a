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

//! Tern is an x86-32 teaching kernel. This crate is its user-process virtual memory subsystem:
//! the tables and the page fault policy that turn faults and system calls into decisions about
//! physical frames.
//!
//! The subsystem is made of five cooperating parts:
//! - the swap slot allocator ([`memory::swap`]), owning the swap partition
//! - the frame table ([`memory::frame`]), owning the user frame pool and its eviction policy
//! - the per-process supplemental page table and fault policy engine ([`process::mem_space`])
//! - the per-process file mapping table ([`process::mem_space::mapping`])
//! - kernel-side access to user memory ([`memory::user`])
//!
//! Interrupt dispatch, scheduling, the on-disk filesystem and program loading are collaborators:
//! the trap handler feeds faults to [`process::mem_space::MemSpace::handle_page_fault`], the
//! loader registers executable segments with
//! [`process::mem_space::MemSpace::map_segment`], and the system call layer uses
//! [`process::Process`].

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![allow(dead_code)]

extern crate alloc;

pub mod device;
pub mod errno;
pub mod file;
pub mod memory;
pub mod process;

/// The kernel's name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
