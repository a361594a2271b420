//! Content-addressed build cache
//!
//! Build outputs are stored under a key derived from the SHA256 of their
//! inputs. Same inputs = same key = reusable artifact.
//!
//! # Concurrency Model
//!
//! - One artifact per key: first writer wins, later writers read the winner
//! - Stores serialize per key, unrelated keys never contend
//! - Lookups wait (bounded) on a producer's in-flight build claim
//! - Artifacts own a copy of their bytes, eviction never invalidates them
//!
//! # Entry Lifecycle
//!
//! | Phase | Lookup sees | Description |
//! |-------|-------------|-------------|
//! | Absent | miss | No entry, no claim |
//! | Claimed | waits | A producer is building |
//! | Stored | hit | Blob written, entry indexed |
//! | Evicted | miss | Removed by LRU or age policy |

pub mod blob;
pub mod key;
pub mod store;
pub mod usage;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use key::{detect_lockfiles, BuildInputs, CacheKey, Ecosystem, LockfileInfo};
pub use store::{
    Artifact, ArtifactRef, BuildClaim, CacheEntry, CacheLookup, CacheStore, EvictionPolicy,
    EvictionReport,
};
pub use usage::{format_bytes, CacheSizeStatus, CacheUsage};
