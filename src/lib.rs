//! kiln - build cache for native extensions
//!
//! Compiles C and C++ sources into shared libraries on demand, keyed by
//! source content and toolchain fingerprint, and loads them into the
//! calling process. Safe to call from many processes at once.
//!
//! ```rust,ignore
//! use kiln::{CompileCache, Config};
//! use std::time::Duration;
//!
//! let cache = CompileCache::from_config(&Config::default());
//! let lib = unsafe { cache.ensure_loaded("ops/add.cpp".as_ref(), Duration::from_secs(300))? };
//! let add = unsafe { lib.get::<extern "C" fn(i32, i32) -> i32>("add")? };
//! assert_eq!(add(2, 3), 5);
//! ```

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod library;
pub mod ui;

pub use cache::{Artifact, CompileCache};
pub use config::Config;
pub use error::{KilnError, KilnResult};
pub use library::{Library, Symbol};
