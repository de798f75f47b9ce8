//! Small utilities shared by every nudgebot crate: atomic file writes, the
//! wall clock used by task records and the scheduler, and content hashing
//! for artifact de-duplication.

pub mod atomic_io;
pub mod clock;
pub mod hashing;

pub use atomic_io::write_text_atomic;
pub use clock::current_unix_timestamp_ms;
pub use hashing::{content_hash, sha256_hex};
