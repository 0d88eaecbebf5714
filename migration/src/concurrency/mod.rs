//! Concurrency primitives used to coordinate migration tasks.
//!
//! - [`pending`] tracks submitted-but-unfinished tasks and acts as the completion barrier.
//! - [`interrupt`] lets another party cancel a caller that is waiting on the barrier or on
//!   shutdown.
//!
//! Both are built on tokio watch channels: every update happens under the channel lock and
//! bumps its version, so a waiter that checked the value and then suspends cannot miss a
//! change that happened in between.

pub mod interrupt;
pub mod pending;
