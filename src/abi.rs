//! C-ABI shims over the sketch API.
//!
//! Enabled with:
//!   cargo build --release --features c-abi
//!
//! The produced staticlib exposes a flat `countmin_*` surface for C
//! callers: constructors return an opaque handle (null on failure),
//! `countmin_close` releases it, and the hot-path calls mirror the Rust
//! methods one-to-one. Keys are `(pointer, length)` byte ranges; they are
//! never interpreted as C strings, so embedded NULs are fine. Paths are
//! NUL-terminated byte strings.
//!
//! Handles must not be shared across threads without external locking:
//! the Rust API's `&mut` discipline does not exist on this side.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::slice;

use crate::sketch::Sketch;

/// Convert a nullable C path.
unsafe fn path_from<'a>(ptr: *const c_char) -> Option<&'a Path> {
    if ptr.is_null() {
        return None;
    }
    let bytes = CStr::from_ptr(ptr).to_bytes();
    Some(Path::new(std::ffi::OsStr::from_bytes(bytes)))
}

unsafe fn key_from<'a>(key_addr: *const c_void, key_size: usize) -> &'a [u8] {
    if key_addr.is_null() {
        &[]
    } else {
        slice::from_raw_parts(key_addr as *const u8, key_size)
    }
}

/// Create a sketch; the path may be null for anonymous backing.
/// Returns an owned handle, or null on failure.
#[no_mangle]
pub unsafe extern "C" fn countmin_create(
    width: u64,
    max_value: u64,
    path: *const c_char,
    flags: c_int,
    seed: u64,
) -> *mut Sketch {
    match Sketch::create(width, max_value, path_from(path), flags as u32, seed) {
        Ok(sketch) => Box::into_raw(Box::new(sketch)),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Map an existing sketch file. Returns an owned handle, or null.
#[no_mangle]
pub unsafe extern "C" fn countmin_open(path: *const c_char, flags: c_int) -> *mut Sketch {
    let Some(path) = path_from(path) else {
        return std::ptr::null_mut();
    };
    match Sketch::open(path, flags as u32) {
        Ok(sketch) => Box::into_raw(Box::new(sketch)),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Copy a sketch file into anonymous memory. Returns an owned handle, or null.
#[no_mangle]
pub unsafe extern "C" fn countmin_load(path: *const c_char, flags: c_int) -> *mut Sketch {
    let Some(path) = path_from(path) else {
        return std::ptr::null_mut();
    };
    match Sketch::load(path, flags as u32) {
        Ok(sketch) => Box::into_raw(Box::new(sketch)),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Write the sketch to a new file. Returns 0 on success, -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn countmin_save(
    sketch: *const Sketch,
    path: *const c_char,
    flags: c_int,
) -> c_int {
    let (Some(sketch), Some(path)) = (sketch.as_ref(), path_from(path)) else {
        return -1;
    };
    match sketch.save(path, flags as u32) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Release a handle returned by a constructor. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn countmin_close(sketch: *mut Sketch) {
    if !sketch.is_null() {
        drop(Box::from_raw(sketch));
    }
}

#[no_mangle]
pub unsafe extern "C" fn countmin_get(
    sketch: *const Sketch,
    key_addr: *const c_void,
    key_size: usize,
) -> u64 {
    match sketch.as_ref() {
        Some(sketch) => sketch.get(key_from(key_addr, key_size)),
        None => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn countmin_set(
    sketch: *mut Sketch,
    key_addr: *const c_void,
    key_size: usize,
    value: u64,
) {
    if let Some(sketch) = sketch.as_mut() {
        sketch.set(key_from(key_addr, key_size), value);
    }
}

#[no_mangle]
pub unsafe extern "C" fn countmin_inc(
    sketch: *mut Sketch,
    key_addr: *const c_void,
    key_size: usize,
) -> u64 {
    match sketch.as_mut() {
        Some(sketch) => sketch.inc(key_from(key_addr, key_size)),
        None => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn countmin_add(
    sketch: *mut Sketch,
    key_addr: *const c_void,
    key_size: usize,
    value: u64,
) -> u64 {
    match sketch.as_mut() {
        Some(sketch) => sketch.add(key_from(key_addr, key_size), value),
        None => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn countmin_clear(sketch: *mut Sketch) {
    if let Some(sketch) = sketch.as_mut() {
        sketch.clear();
    }
}

#[no_mangle]
pub unsafe extern "C" fn countmin_width(sketch: *const Sketch) -> u64 {
    sketch.as_ref().map_or(0, Sketch::width)
}

#[no_mangle]
pub unsafe extern "C" fn countmin_depth(sketch: *const Sketch) -> u64 {
    sketch.as_ref().map_or(0, Sketch::depth)
}

#[no_mangle]
pub unsafe extern "C" fn countmin_max_value(sketch: *const Sketch) -> u64 {
    sketch.as_ref().map_or(0, Sketch::max_value)
}

#[no_mangle]
pub unsafe extern "C" fn countmin_value_size(sketch: *const Sketch) -> u64 {
    sketch.as_ref().map_or(0, Sketch::value_size)
}

#[no_mangle]
pub unsafe extern "C" fn countmin_seed(sketch: *const Sketch) -> u64 {
    sketch.as_ref().map_or(0, Sketch::seed)
}

#[no_mangle]
pub unsafe extern "C" fn countmin_table_size(sketch: *const Sketch) -> u64 {
    sketch.as_ref().map_or(0, Sketch::table_size)
}

#[no_mangle]
pub unsafe extern "C" fn countmin_file_size(sketch: *const Sketch) -> u64 {
    sketch.as_ref().map_or(0, Sketch::file_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_use_close_round_trip() {
        unsafe {
            let sketch = countmin_create(100, 3, std::ptr::null(), 0, 0);
            assert!(!sketch.is_null());
            assert_eq!(countmin_width(sketch), 100);
            assert_eq!(countmin_max_value(sketch), 3);

            let key = b"banana";
            countmin_set(sketch, key.as_ptr() as *const c_void, key.len(), 2);
            assert_eq!(countmin_get(sketch, key.as_ptr() as *const c_void, key.len()), 2);
            assert_eq!(countmin_inc(sketch, key.as_ptr() as *const c_void, key.len()), 3);

            countmin_clear(sketch);
            assert_eq!(countmin_get(sketch, key.as_ptr() as *const c_void, key.len()), 0);
            countmin_close(sketch);
        }
    }

    #[test]
    fn null_handles_are_inert() {
        unsafe {
            assert_eq!(countmin_get(std::ptr::null(), std::ptr::null(), 0), 0);
            assert_eq!(countmin_width(std::ptr::null()), 0);
            assert_eq!(
                countmin_save(std::ptr::null(), std::ptr::null(), 0),
                -1
            );
            countmin_close(std::ptr::null_mut());
        }
    }
}
