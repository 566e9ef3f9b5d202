//! Memory-mapped backing regions for sketches.
//!
//! A [`FileMap`] owns one contiguous mapping: anonymous memory, a shared
//! file-backed mapping, or a private (copy-on-write) view of a file. The
//! sketch engine treats it as a flat byte region; the file format is the
//! portability boundary, not the mapping strategy.
//!
//! Each entry point accepts only its documented subset of the `FILE_*`
//! flags and rejects anything else up front, so a surprising flag shows
//! up as an error instead of silently changing the mapping semantics.
//! After construction, [`FileMap::flags`] reports the full effective set
//! including the implied bits.

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::Path;
use std::ptr::NonNull;

use nix::sys::mman::{mmap, mmap_anonymous, munmap, MapFlags, ProtFlags};

use crate::error::{Error, Result};

pub const FILE_CREATE: u32 = 1 << 0;
pub const FILE_TRUNCATE: u32 = 1 << 1;
pub const FILE_READONLY: u32 = 1 << 2;
pub const FILE_WRITABLE: u32 = 1 << 3;
pub const FILE_SHARED: u32 = 1 << 4;
pub const FILE_PRIVATE: u32 = 1 << 5;
pub const FILE_ANONYMOUS: u32 = 1 << 6;
/// Request huge pages for the mapping; falls back silently when the
/// kernel refuses (or on non-Linux targets, where it is ignored).
pub const FILE_HUGETLB: u32 = 1 << 7;
/// Touch one byte of every mapped page right after mapping, so page
/// faults happen up front instead of during the first query burst.
pub const FILE_PRELOAD: u32 = 1 << 8;

/// An owned memory mapping, unmapped on drop. For file-backed mappings
/// the descriptor is held for the lifetime of the mapping.
#[derive(Debug)]
pub struct FileMap {
    addr: NonNull<libc::c_void>,
    size: usize,
    flags: u32,
    _file: Option<File>,
}

// The mapping is exclusively owned; nothing in it is thread-affine.
unsafe impl Send for FileMap {}

impl FileMap {
    /// Create a writable region of `size` bytes, zero-filled.
    ///
    /// With a path: creates the file (failing if it exists, unless
    /// `FILE_TRUNCATE` is given), sizes it, and maps it shared. Without a
    /// path: anonymous private memory.
    ///
    /// Accepted flags: `TRUNCATE`, `HUGETLB`, `PRELOAD`.
    pub fn create(path: Option<&Path>, size: usize, mut flags: u32) -> Result<FileMap> {
        const VALID: u32 = FILE_TRUNCATE | FILE_HUGETLB | FILE_PRELOAD;
        if flags & !VALID != 0 {
            return Err(Error::InvalidArgument("unexpected flags for create"));
        }
        let length = NonZeroUsize::new(size)
            .ok_or(Error::InvalidArgument("cannot map a zero-sized region"))?;
        let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE;

        let (addr, file) = match path {
            None => {
                flags |= FILE_WRITABLE | FILE_PRIVATE | FILE_ANONYMOUS;
                let addr = map_anonymous(length, prot, MapFlags::MAP_PRIVATE, &mut flags)?;
                (addr, None)
            }
            Some(path) => {
                if flags & FILE_TRUNCATE == 0 && path.exists() {
                    return Err(Error::InvalidArgument("file already exists"));
                }
                flags |= FILE_CREATE | FILE_WRITABLE | FILE_SHARED;
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(flags & FILE_TRUNCATE != 0)
                    .open(path)
                    .map_err(|e| Error::io("open", e))?;
                file.set_len(size as u64)
                    .map_err(|e| Error::io("ftruncate", e))?;
                let addr = map_fd(&file, length, prot, MapFlags::MAP_SHARED, &mut flags)?;
                (addr, Some(file))
            }
        };

        if flags & FILE_PRELOAD != 0 {
            preload(addr.as_ptr() as *const u8, size);
        }
        Ok(FileMap {
            addr,
            size,
            flags,
            _file: file,
        })
    }

    /// Map an existing file. Writable and shared unless `FILE_READONLY`
    /// or `FILE_PRIVATE` say otherwise.
    ///
    /// Accepted flags: `READONLY`, `PRIVATE`, `HUGETLB`, `PRELOAD`.
    pub fn open(path: &Path, mut flags: u32) -> Result<FileMap> {
        const VALID: u32 = FILE_READONLY | FILE_PRIVATE | FILE_HUGETLB | FILE_PRELOAD;
        if flags & !VALID != 0 {
            return Err(Error::InvalidArgument("unexpected flags for open"));
        }
        if flags & FILE_READONLY == 0 {
            flags |= FILE_WRITABLE;
        }
        if flags & FILE_PRIVATE == 0 {
            flags |= FILE_SHARED;
        }

        let metadata = std::fs::metadata(path).map_err(|e| Error::io("stat", e))?;
        let length = NonZeroUsize::new(metadata.len() as usize)
            .ok_or(Error::InvalidArgument("cannot map an empty file"))?;

        let file = OpenOptions::new()
            .read(true)
            .write(flags & FILE_WRITABLE != 0 && flags & FILE_PRIVATE == 0)
            .open(path)
            .map_err(|e| Error::io("open", e))?;

        let mut prot = ProtFlags::PROT_READ;
        if flags & FILE_WRITABLE != 0 {
            prot |= ProtFlags::PROT_WRITE;
        }
        let map_flags = if flags & FILE_PRIVATE != 0 {
            MapFlags::MAP_PRIVATE
        } else {
            MapFlags::MAP_SHARED
        };
        let addr = map_fd(&file, length, prot, map_flags, &mut flags)?;

        if flags & FILE_PRELOAD != 0 {
            preload(addr.as_ptr() as *const u8, length.get());
        }
        Ok(FileMap {
            addr,
            size: length.get(),
            flags,
            _file: Some(file),
        })
    }

    /// Copy a file's contents into a fresh anonymous writable region.
    /// The file itself is only read.
    ///
    /// Accepted flags: `HUGETLB`.
    pub fn load(path: &Path, flags: u32) -> Result<FileMap> {
        const VALID: u32 = FILE_HUGETLB;
        if flags & !VALID != 0 {
            return Err(Error::InvalidArgument("unexpected flags for load"));
        }
        let source = FileMap::open(path, FILE_READONLY)?;
        let target = FileMap::create(None, source.size(), flags)?;
        unsafe {
            std::ptr::copy_nonoverlapping(source.addr(), target.addr(), source.size());
        }
        Ok(target)
    }

    /// Write the whole region to a new file at `path` (flags as for
    /// [`FileMap::create`]).
    pub fn save(&self, path: &Path, flags: u32) -> Result<()> {
        let target = FileMap::create(Some(path), self.size, flags)?;
        unsafe {
            std::ptr::copy_nonoverlapping(self.addr(), target.addr(), self.size);
        }
        Ok(())
    }

    /// Base address of the mapping.
    #[inline]
    pub fn addr(&self) -> *mut u8 {
        self.addr.as_ptr() as *mut u8
    }

    /// Mapped length in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Effective flag set, including bits implied by the entry point.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }
}

impl Drop for FileMap {
    fn drop(&mut self) {
        // Unmap errors at teardown have no recovery path.
        let _ = unsafe { munmap(self.addr, self.size) };
    }
}

/// Anonymous mapping, retrying without huge pages if the kernel refuses.
fn map_anonymous(
    length: NonZeroUsize,
    prot: ProtFlags,
    base: MapFlags,
    flags: &mut u32,
) -> Result<NonNull<libc::c_void>> {
    if let Some(map_flags) = hugetlb_flags(base, *flags) {
        if let Ok(addr) = unsafe { mmap_anonymous(None, length, prot, map_flags) } {
            return Ok(addr);
        }
        *flags &= !FILE_HUGETLB;
    }
    unsafe { mmap_anonymous(None, length, prot, base) }.map_err(|e| Error::errno("mmap", e))
}

/// File-backed mapping, with the same huge-page fallback.
fn map_fd(
    file: &File,
    length: NonZeroUsize,
    prot: ProtFlags,
    base: MapFlags,
    flags: &mut u32,
) -> Result<NonNull<libc::c_void>> {
    if let Some(map_flags) = hugetlb_flags(base, *flags) {
        if let Ok(addr) = unsafe { mmap(None, length, prot, map_flags, file, 0) } {
            return Ok(addr);
        }
        *flags &= !FILE_HUGETLB;
    }
    unsafe { mmap(None, length, prot, base, file, 0) }.map_err(|e| Error::errno("mmap", e))
}

#[cfg(target_os = "linux")]
fn hugetlb_flags(base: MapFlags, flags: u32) -> Option<MapFlags> {
    (flags & FILE_HUGETLB != 0).then(|| base | MapFlags::MAP_HUGETLB)
}

#[cfg(not(target_os = "linux"))]
fn hugetlb_flags(_base: MapFlags, _flags: u32) -> Option<MapFlags> {
    None
}

/// Fault in the region by reading one byte per page.
fn preload(addr: *const u8, size: usize) {
    let page = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    };
    let mut offset = 0;
    while offset < size {
        unsafe {
            std::ptr::read_volatile(addr.add(offset));
        }
        offset += page;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(map: &FileMap) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(map.addr(), map.size()) }
    }

    #[test]
    fn anonymous_region_is_zeroed_and_writable() {
        let map = FileMap::create(None, 1 << 16, 0).unwrap();
        assert_eq!(map.size(), 1 << 16);
        assert_eq!(map.flags(), FILE_WRITABLE | FILE_PRIVATE | FILE_ANONYMOUS);
        assert!(bytes(&map).iter().all(|&b| b == 0));
        bytes(&map).fill(0x01);
        assert!(bytes(&map).iter().all(|&b| b == 0x01));
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(FileMap::create(None, 0, 0).is_err());
    }

    #[test]
    fn open_of_a_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileMap::open(&dir.path().join("missing"), 0).is_err());
    }

    #[test]
    fn file_backed_create_then_open_sees_the_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let map = FileMap::create(Some(&path), 1 << 12, 0).unwrap();
        assert_eq!(map.flags(), FILE_CREATE | FILE_WRITABLE | FILE_SHARED);
        bytes(&map).fill(0x02);
        drop(map);

        let map = FileMap::open(&path, 0).unwrap();
        assert_eq!(map.flags(), FILE_WRITABLE | FILE_SHARED);
        assert_eq!(map.size(), 1 << 12);
        assert!(bytes(&map).iter().all(|&b| b == 0x02));
    }

    #[test]
    fn duplicate_create_requires_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        FileMap::create(Some(&path), 1 << 12, 0).unwrap();
        assert!(FileMap::create(Some(&path), 1 << 12, 0).is_err());

        let map = FileMap::create(Some(&path), 1 << 13, FILE_TRUNCATE).unwrap();
        assert_eq!(map.size(), 1 << 13);
        assert!(bytes(&map).iter().all(|&b| b == 0));
    }

    #[test]
    fn readonly_open_reports_readonly_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        FileMap::create(Some(&path), 1 << 12, 0).unwrap();

        let map = FileMap::open(&path, FILE_READONLY).unwrap();
        assert_eq!(map.flags(), FILE_READONLY | FILE_SHARED);
    }

    #[test]
    fn private_open_does_not_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let map = FileMap::create(Some(&path), 1 << 12, 0).unwrap();
        bytes(&map).fill(0x03);
        drop(map);

        let map = FileMap::open(&path, FILE_PRIVATE).unwrap();
        assert_eq!(map.flags(), FILE_WRITABLE | FILE_PRIVATE);
        bytes(&map).fill(0x04);
        drop(map);

        let map = FileMap::open(&path, FILE_READONLY).unwrap();
        assert!(bytes(&map).iter().all(|&b| b == 0x03));
    }

    #[test]
    fn load_copies_into_anonymous_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let map = FileMap::create(Some(&path), 1 << 12, 0).unwrap();
        bytes(&map).fill(0x05);
        drop(map);

        let map = FileMap::load(&path, 0).unwrap();
        assert_eq!(map.flags(), FILE_WRITABLE | FILE_PRIVATE | FILE_ANONYMOUS);
        assert!(bytes(&map).iter().all(|&b| b == 0x05));

        // Mutating the loaded copy leaves the file alone.
        bytes(&map).fill(0x06);
        drop(map);
        let map = FileMap::open(&path, FILE_READONLY).unwrap();
        assert!(bytes(&map).iter().all(|&b| b == 0x05));
    }

    #[test]
    fn save_duplicates_the_region() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source");
        let saved_path = dir.path().join("saved");

        let map = FileMap::create(Some(&source_path), 1 << 12, 0).unwrap();
        bytes(&map).fill(0x07);
        map.save(&saved_path, 0).unwrap();
        assert!(map.save(&saved_path, 0).is_err());
        map.save(&saved_path, FILE_TRUNCATE).unwrap();
        drop(map);

        let map = FileMap::open(&saved_path, FILE_READONLY).unwrap();
        assert_eq!(map.size(), 1 << 12);
        assert!(bytes(&map).iter().all(|&b| b == 0x07));
    }

    #[test]
    fn preload_flag_is_accepted() {
        let map = FileMap::create(None, 1 << 16, FILE_PRELOAD).unwrap();
        assert!(map.flags() & FILE_PRELOAD != 0);
    }

    #[test]
    fn unexpected_flags_are_rejected_per_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        FileMap::create(Some(&path), 1 << 12, 0).unwrap();

        assert!(FileMap::create(None, 1 << 12, FILE_READONLY).is_err());
        assert!(FileMap::open(&path, FILE_TRUNCATE).is_err());
        assert!(FileMap::load(&path, FILE_PRELOAD).is_err());
    }
}
