//! Metadata repository adapters
//!
//! The coordination store holding one record per volume, keyed by display
//! name, with the volume's snapshots and mounts embedded as sub-records.
//! The [`MetadataRepository`] port assumes strong read-after-write
//! consistency for a single key.
//!
//! [`MetadataRepository`]: crate::domain::ports::MetadataRepository

pub mod memory;

pub use memory::MemoryRepository;
