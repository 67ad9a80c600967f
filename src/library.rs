//! Dynamic library loading
//!
//! Thin wrapper over `dlopen`/`dlsym`/`dlclose`. Symbols borrow the
//! [`Library`] they came from, so they can't outlive the mapping.

use crate::error::{KilnError, KilnResult};
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// A shared library loaded into this process
pub struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

// SAFETY: dl* handles are process-global and the dl* functions are thread-safe.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

/// An exported symbol, valid while its library stays loaded
pub struct Symbol<'lib, T> {
    value: T,
    _lib: PhantomData<&'lib Library>,
}

impl<T> Deref for Symbol<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl Library {
    /// Path the library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use std::ffi::{CStr, CString};
    use std::os::unix::ffi::OsStrExt;

    fn last_error() -> String {
        // SAFETY: dlerror returns null or a NUL-terminated thread-local string.
        let msg = unsafe { libc::dlerror() };
        if msg.is_null() {
            "unknown error".to_string()
        } else {
            // SAFETY: non-null pointer from dlerror, see above.
            unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
        }
    }

    impl Library {
        /// Load the library at `path`
        ///
        /// # Safety
        ///
        /// Loading runs the library's initializers, which can do anything.
        /// The caller vouches that `path` is a library safe to load.
        pub unsafe fn open(path: &Path) -> KilnResult<Self> {
            let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
                KilnError::LibraryLoad {
                    path: path.to_path_buf(),
                    reason: "path contains a NUL byte".to_string(),
                }
            })?;

            let raw = libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL);
            let handle = NonNull::new(raw).ok_or_else(|| KilnError::LibraryLoad {
                path: path.to_path_buf(),
                reason: last_error(),
            })?;

            Ok(Self {
                handle,
                path: path.to_path_buf(),
            })
        }

        fn lookup(&self, symbol: &str) -> KilnResult<NonNull<c_void>> {
            let c_symbol = CString::new(symbol).map_err(|_| KilnError::SymbolNotFound {
                symbol: symbol.to_string(),
                path: self.path.clone(),
                reason: "symbol name contains a NUL byte".to_string(),
            })?;

            // SAFETY: handle is a live dlopen handle; clear any stale error first.
            let raw = unsafe {
                libc::dlerror();
                libc::dlsym(self.handle.as_ptr(), c_symbol.as_ptr())
            };

            NonNull::new(raw).ok_or_else(|| KilnError::SymbolNotFound {
                symbol: symbol.to_string(),
                path: self.path.clone(),
                reason: last_error(),
            })
        }

        /// Look up `symbol` and reinterpret its address as `T`
        ///
        /// # Safety
        ///
        /// `T` must be a pointer-sized type matching the symbol's real type,
        /// usually an `extern "C" fn(..)`.
        pub unsafe fn get<T: Copy>(&self, symbol: &str) -> KilnResult<Symbol<'_, T>> {
            if std::mem::size_of::<T>() != std::mem::size_of::<*mut c_void>() {
                return Err(KilnError::Internal(format!(
                    "symbol type for {} is not pointer-sized",
                    symbol
                )));
            }
            let addr = self.lookup(symbol)?.as_ptr();
            Ok(Symbol {
                value: std::mem::transmute_copy::<*mut c_void, T>(&addr),
                _lib: PhantomData,
            })
        }

        /// Whether the library exports `symbol`
        pub fn has_symbol(&self, symbol: &str) -> bool {
            self.lookup(symbol).is_ok()
        }
    }

    impl Drop for Library {
        fn drop(&mut self) {
            // SAFETY: handle came from dlopen and is closed exactly once.
            unsafe {
                libc::dlclose(self.handle.as_ptr());
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::*;

    impl Library {
        /// Load the library at `path`
        ///
        /// # Safety
        ///
        /// See the unix implementation.
        pub unsafe fn open(_path: &Path) -> KilnResult<Self> {
            Err(KilnError::UnsupportedPlatform(std::env::consts::OS.to_string()))
        }

        /// Look up `symbol`
        ///
        /// # Safety
        ///
        /// See the unix implementation.
        pub unsafe fn get<T: Copy>(&self, symbol: &str) -> KilnResult<Symbol<'_, T>> {
            Err(KilnError::SymbolNotFound {
                symbol: symbol.to_string(),
                path: self.path.clone(),
                reason: "unsupported platform".to_string(),
            })
        }

        pub fn has_symbol(&self, _symbol: &str) -> bool {
            false
        }
    }
}
