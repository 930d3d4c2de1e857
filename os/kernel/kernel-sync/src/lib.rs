//! # Kernel synchronization primitives
//!
//! The proxy kernel has no scheduler: a hart that cannot take a lock busy-waits
//! until the holder releases it. [`SpinLock`] is therefore the only primitive.
//! Holders must never block, sleep or re-acquire the same lock; a nested
//! `lock()` on the same hart deadlocks.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{LockStats, SpinLock, SpinLockGuard};
