// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends behind the [`StorageBackend`](traits::StorageBackend) capability.
//!
//! - [`sql::SqlBackend`]: structured primary store (SQLite)
//! - [`file::FileBackend`]: single-file key/value fallback with a byte quota
//! - [`memory::InMemoryBackend`]: volatile store for tests and last resort

pub mod traits;
pub mod sql;
pub mod file;
pub mod memory;

pub use traits::{StorageBackend, StorageError};
pub use sql::SqlBackend;
pub use file::FileBackend;
pub use memory::InMemoryBackend;
