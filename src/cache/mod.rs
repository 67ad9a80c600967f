//! Compile cache for native sources
//!
//! Compiles a source into a shared library once per (content, toolchain)
//! pair and hands back the library, no matter how many processes ask at
//! the same time.
//!
//! # Layout
//!
//! | Path | Description |
//! |------|-------------|
//! | `{source}_{fingerprint}.{ext}` | Artifact with build record trailer |
//! | `{artifact}.{checksum:16}` | Hard link `dlopen`ed for one build's content |
//! | `{artifact}.lock` | Build lock, present only while building |
//! | `.kiln-build-*/` | Staging dir, present only while building |
//!
//! # Artifact States
//!
//! | State | Meaning |
//! |-------|---------|
//! | Missing | Nothing at the artifact path |
//! | Stale | Built from other inputs, or no record (partial copy) |
//! | Valid | Record matches the current checksum and fingerprint |

pub mod artifact;
pub mod clean;
mod compile_cache;
pub mod discover;
pub mod key;
pub mod lock;
pub mod retry;

pub use artifact::{library_extension, ArtifactPaths, ArtifactState, BuildRecord};
pub use clean::{find_leftovers, Leftover};
pub use compile_cache::{Artifact, CompileCache, SourceStatus};
pub use discover::discover_sources;
pub use key::CacheKey;
pub use lock::{BuildLock, LockInfo, LockOptions, LockStatus};
pub use retry::RetryPolicy;
