use crate::error::{Error, Result};
use crate::files::allocate_disk_space;
use memmap2::{MmapOptions, MmapRaw};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// MappedFile is a shared memory map of a file, accessed as little-endian
/// words at fixed offsets.
///
/// Bytes are read and written through `AtomicU8` so that a writer and
/// readers of the same file, each holding its own mapping, never race
/// on plain memory. Visibility between them is established only through
/// the version word at offset 0, see [`MappedFile::store_version`].
pub struct MappedFile {
    file: File,
    path: PathBuf,
    map: MmapRaw,
    writable: bool,
}

impl MappedFile {
    /// Opens a file for read and write, growing it to at least `min_len` bytes.
    pub fn open_rw(path: &Path, min_len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        allocate_disk_space(&file, min_len.max(8) as u64)?;
        let len = file.metadata()?.len() as usize;
        let map = MmapOptions::new().len(len).map_raw(&file)?;
        Ok(MappedFile {
            file,
            path: path.to_path_buf(),
            map,
            writable: true,
        })
    }

    pub fn open_ro(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < 8 {
            return Err(Error::critical(
                libc::EINVAL,
                format!("file is too small to map[path={}]", path.display()),
            ));
        }
        let map = MmapOptions::new().len(len).map_raw_read_only(&file)?;
        Ok(MappedFile {
            file,
            path: path.to_path_buf(),
            map,
            writable: false,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    fn bytes(&self) -> &[AtomicU8] {
        // AtomicU8 has the same layout as u8 and the mapping lives as long as self.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr() as *const AtomicU8, self.map.len()) }
    }

    #[inline]
    fn check(&self, offset: usize, size: usize) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.map.len() => Ok(()),
            _ => Err(Error::critical(
                libc::EINVAL,
                format!(
                    "access out of mapped region[path={}, offset={}, size={}, len={}]",
                    self.path.display(),
                    offset,
                    size,
                    self.map.len()
                ),
            )),
        }
    }

    #[inline]
    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::critical(
                libc::EBADF,
                format!("file is mapped read-only[path={}]", self.path.display()),
            ))
        }
    }

    #[inline]
    fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        self.check(offset, N)?;
        let mut arr = [0u8; N];
        for (dst, src) in arr.iter_mut().zip(&self.bytes()[offset..offset + N]) {
            *dst = src.load(Ordering::Relaxed);
        }
        Ok(arr)
    }

    #[inline]
    pub fn get_i32(&self, offset: usize) -> Result<i32> {
        self.read_array::<4>(offset).map(i32::from_le_bytes)
    }

    #[inline]
    pub fn get_i64(&self, offset: usize) -> Result<i64> {
        self.read_array::<8>(offset).map(i64::from_le_bytes)
    }

    pub fn get_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.check(offset, len)?;
        Ok(self.bytes()[offset..offset + len]
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect())
    }

    #[inline]
    pub fn put_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.check(offset, data.len())?;
        for (dst, src) in self.bytes()[offset..offset + data.len()].iter().zip(data) {
            dst.store(*src, Ordering::Relaxed);
        }
        Ok(())
    }

    #[inline]
    pub fn put_i32(&self, offset: usize, value: i32) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    #[inline]
    pub fn put_i64(&self, offset: usize, value: i64) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    #[inline]
    fn version_word(&self) -> &AtomicU64 {
        // The mapping is page aligned and at least 8 bytes long.
        unsafe { &*(self.map.as_ptr() as *const AtomicU64) }
    }

    /// Loads the version word at offset 0 with acquire ordering.
    #[inline]
    pub fn load_version(&self) -> u64 {
        u64::from_le(self.version_word().load(Ordering::Acquire))
    }

    /// Stores the version word at offset 0 with release ordering.
    /// All writes performed before are visible to a reader that
    /// observes the new version.
    #[inline]
    pub fn store_version(&self, version: u64) -> Result<()> {
        self.check_writable()?;
        self.version_word()
            .store(version.to_le(), Ordering::Release);
        Ok(())
    }

    /// Grows the file and remaps it. Exclusive borrow guarantees no
    /// slice of the old mapping is alive.
    pub fn extend(&mut self, new_len: usize) -> Result<()> {
        self.check_writable()?;
        if new_len <= self.map.len() {
            return Ok(());
        }
        allocate_disk_space(&self.file, new_len as u64)?;
        self.remap_to_file_size()
    }

    /// Remaps the whole file, used by readers when the writer has grown it.
    pub fn remap_to_file_size(&mut self) -> Result<()> {
        let len = self.file.metadata()?.len() as usize;
        if len == self.map.len() {
            return Ok(());
        }
        let mut opts = MmapOptions::new();
        opts.len(len);
        self.map = if self.writable {
            opts.map_raw(&self.file)?
        } else {
            opts.map_raw_read_only(&self.file)?
        };
        Ok(())
    }

    #[inline]
    pub fn sync(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

/// Little-endian helpers over plain byte buffers. Callers check bounds.
#[inline]
pub(crate) fn get_i32(b: &[u8], offset: usize) -> i32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&b[offset..offset + 4]);
    i32::from_le_bytes(arr)
}

#[inline]
pub(crate) fn get_i64(b: &[u8], offset: usize) -> i64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&b[offset..offset + 8]);
    i64::from_le_bytes(arr)
}

#[inline]
pub(crate) fn put_i32(b: &mut [u8], offset: usize, v: i32) {
    b[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
pub(crate) fn put_i64(b: &mut [u8], offset: usize, v: i64) {
    b[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}
