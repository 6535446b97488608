//! Concurrency-safe file I/O primitives for the team stores
//!
//! - **File locking**: advisory exclusive lock with polling and stale-lock
//!   reclamation by mtime ([`lock::with_lock`])
//! - **Atomic writes**: temp-file-then-rename so readers never observe a
//!   partial write ([`json::write_json_atomic`])
//!
//! Every store module builds on these two primitives; per-file
//! linearizability comes entirely from the external lock files, never from
//! in-process mutexes.

pub mod json;
pub mod lock;

pub use json::{read_json, read_json_array, read_json_or_default, write_json_atomic};
pub use lock::{LockOptions, with_lock};
