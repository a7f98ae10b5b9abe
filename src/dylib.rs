// src/dylib.rs

//! Runtime symbol lookup for the graphics and display libraries.

use anyhow::{Context, Result};
use libloading::Library;
use log::info;

/// Opens a system library by soname.
pub fn open(soname: &str) -> Result<Library> {
    info!("Loading {}", soname);
    // SAFETY: the display and graphics libraries we open only register
    // driver entry points at load time.
    unsafe { Library::new(soname) }.with_context(|| format!("Failed to load {}", soname))
}

/// Copies the function pointer named `name` (NUL-terminated) out of `lib`.
///
/// # Safety
/// `T` must be the exact C signature of the symbol, and the returned pointer
/// must not be called after `lib` is dropped.
pub unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Result<T> {
    let sym = lib.get::<T>(name).with_context(|| {
        format!(
            "Missing symbol {}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
        )
    })?;
    Ok(*sym)
}
