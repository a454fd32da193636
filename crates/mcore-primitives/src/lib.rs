//! mcore Primitives - Consolidated Unsafe Code TCB
//!
//! This crate contains ALL unsafe code of the mcore scheduler, consolidated
//! into a single auditable location. The kernel crate uses
//! `#![deny(unsafe_code)]` and builds every cross-core structure on top of
//! the safe interfaces exported here.
//!
//! # Module Organization
//!
//! - `inbox` - Arena-indexed lock-free LIFO inbox (ICI and migration inboxes)
//! - `ring` - Slot ownership bitmask, cursors and ACTIVE flag of the IPC ring
//! - `sync` - Atomic and cell facade that swaps in loom's types under the `loom` feature
//! - `loom_tests` - Concurrency tests using loom (with `loom` feature)
//!
//! # Verification
//!
//! 1. **Loom tests** (`cargo test -p mcore-primitives --features loom -- --test-threads=1 loom`)
//! 2. **Unit tests**: single- and multi-threaded tests on real atomics

#![no_std]
extern crate alloc;

pub mod inbox;
pub mod ring;
mod sync;


pub use inbox::Inbox;
pub use ring::{Acquire, Produced, RingBuffer, RingError, RingKey};
