//! Memory-mapped register windows
//!
//! The controller only ever sees a [`RegisterIo`]: a 32-bit register bus with
//! sub-word writes. [`DevMemPlatform`] provides real windows by mapping
//! physical ranges out of `/dev/mem` (or any other mappable file).

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use tracing::{debug, info};

use crate::error::{OtgError, Result};

const PAGE_SIZE: u64 = 4096;

/// 32-bit register bus
///
/// Reads are only ever performed at 32-bit width. Narrow writes default to a
/// read-modify-write of the containing word; buses that support native
/// narrow stores override them.
pub trait RegisterIo: Send + Sync {
    fn read32(&self, offset: usize) -> u32;

    fn write32(&self, offset: usize, value: u32);

    fn write16(&self, offset: usize, value: u16) {
        merge16(self, offset, value);
    }

    fn write8(&self, offset: usize, value: u8) {
        let aligned = offset & !3;
        let shift = ((offset & 3) * 8) as u32;
        let word = self.read32(aligned);
        let word = (word & !(0xff << shift)) | ((value as u32) << shift);
        self.write32(aligned, word);
    }
}

/// Shift of a halfword inside its word; offset 3 is treated as offset 2
#[inline]
pub(crate) fn sub_word_shift16(offset: usize) -> u32 {
    match offset & 3 {
        0 => 0,
        1 => 8,
        _ => 16,
    }
}

/// Read-modify-write of the halfword `sub_word_shift16` places at `offset`
fn merge16<R: RegisterIo + ?Sized>(io: &R, offset: usize, value: u16) {
    let aligned = offset & !3;
    let shift = sub_word_shift16(offset);
    let word = io.read32(aligned);
    let word = (word & !(0xffff << shift)) | ((value as u32) << shift);
    io.write32(aligned, word);
}

/// A window of registers inside another window
///
/// Used for the DMA sub-regions, which all live inside one mapping.
pub struct SubWindow {
    parent: Arc<dyn RegisterIo>,
    base: usize,
}

impl SubWindow {
    pub fn new(parent: Arc<dyn RegisterIo>, base: usize) -> Self {
        Self { parent, base }
    }
}

impl RegisterIo for SubWindow {
    fn read32(&self, offset: usize) -> u32 {
        self.parent.read32(self.base + offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.parent.write32(self.base + offset, value)
    }

    fn write16(&self, offset: usize, value: u16) {
        self.parent.write16(self.base + offset, value)
    }

    fn write8(&self, offset: usize, value: u8) {
        self.parent.write8(self.base + offset, value)
    }
}

/// Physical register range requested by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpec {
    pub name: &'static str,
    pub base: u64,
    pub len: usize,
}

/// Board-support services needed while attaching a controller
pub trait Platform {
    /// Map a register window
    fn map_region(&self, region: RegionSpec) -> Result<Arc<dyn RegisterIo>>;

    /// Register for an interrupt line
    fn request_irq(&self, line: u32, name: &str) -> Result<()>;
}

/// A mapped register window
pub struct MmioRegion {
    ptr: NonNull<u8>,
    map_len: usize,
    /// Offset of the requested base inside the page-aligned mapping
    page_offset: usize,
    len: usize,
}

// SAFETY: the mapping is device memory accessed only through volatile
// operations; it is never reallocated and lives until drop.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Map `region` out of `file`
    pub fn map(file: &File, region: RegionSpec) -> Result<Self> {
        if region.len == 0 {
            return Err(OtgError::Init(format!(
                "Region {} has zero length",
                region.name
            )));
        }

        let aligned_base = region.base & !(PAGE_SIZE - 1);
        let page_offset = (region.base - aligned_base) as usize;
        let map_len = (page_offset + region.len).next_multiple_of(PAGE_SIZE as usize);
        let length = NonZeroUsize::new(map_len)
            .ok_or_else(|| OtgError::Init(format!("Region {} has zero length", region.name)))?;
        let offset = i64::try_from(aligned_base).map_err(|_| {
            OtgError::Init(format!(
                "Region {} base 0x{:x} out of range",
                region.name, region.base
            ))
        })?;

        // SAFETY: a fresh shared mapping of a device file; no Rust object aliases it.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file.as_fd(),
                offset as _,
            )
        }
        .map_err(|e| {
            OtgError::Init(format!(
                "Failed to map {} at 0x{:x} (+0x{:x}): {}",
                region.name, region.base, region.len, e
            ))
        })?;

        debug!(
            "Mapped {} 0x{:x}+0x{:x} at {:p}",
            region.name, region.base, region.len, ptr
        );

        Ok(Self {
            ptr: ptr.cast(),
            map_len,
            page_offset,
            len: region.len,
        })
    }

    /// Mapped length of the requested window
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn reg_ptr(&self, offset: usize, width: usize) -> *mut u8 {
        debug_assert!(offset + width <= self.len, "register offset out of window");
        // SAFETY: caller contract keeps offsets inside the window
        unsafe { self.ptr.as_ptr().add(self.page_offset + offset) }
    }
}

impl RegisterIo for MmioRegion {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: aligned, inside the mapping
        unsafe { std::ptr::read_volatile(self.reg_ptr(offset & !3, 4) as *const u32) }
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        unsafe { std::ptr::write_volatile(self.reg_ptr(offset & !3, 4) as *mut u32, value) }
    }

    /// The interconnect accepts narrow stores; only narrow loads are broken
    #[inline]
    fn write16(&self, offset: usize, value: u16) {
        let lane = (offset & !3) + (sub_word_shift16(offset) / 8) as usize;
        if lane & 1 != 0 {
            // straddles the middle of the word, no aligned halfword store
            merge16(self, offset, value);
            return;
        }
        unsafe { std::ptr::write_volatile(self.reg_ptr(lane, 2) as *mut u16, value) }
    }

    #[inline]
    fn write8(&self, offset: usize, value: u8) {
        unsafe { std::ptr::write_volatile(self.reg_ptr(offset, 1), value) }
    }
}

impl Drop for MmioRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/map_len come from the successful mmap in `map`
        if let Err(e) = unsafe { munmap(self.ptr.cast(), self.map_len) } {
            tracing::warn!("Failed to unmap register window: {}", e);
        }
    }
}

/// Default memory device
pub const DEV_MEM_PATH: &str = "/dev/mem";

/// Platform backed by a mappable memory device
pub struct DevMemPlatform {
    path: PathBuf,
    file: File,
}

impl DevMemPlatform {
    /// Open `/dev/mem`
    pub fn new() -> Result<Self> {
        Self::open(DEV_MEM_PATH)
    }

    /// Open an arbitrary mappable file (a UIO map, or a plain file for testing)
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_SYNC.bits())
            .open(&path)
            .map_err(|e| OtgError::Init(format!("Failed to open {}: {}", path.display(), e)))?;
        info!("Register windows will be mapped from {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Platform for DevMemPlatform {
    fn map_region(&self, region: RegionSpec) -> Result<Arc<dyn RegisterIo>> {
        Ok(Arc::new(MmioRegion::map(&self.file, region)?))
    }

    /// Interrupts reach userspace through UIO, see [`crate::uio`]; there is
    /// nothing to claim here beyond recording the line.
    fn request_irq(&self, line: u32, name: &str) -> Result<()> {
        info!("Interrupt line {} reserved for {}", line, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_plain_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file().set_len(2 * PAGE_SIZE).unwrap();

        let platform = DevMemPlatform::open(tmp.path()).unwrap();
        let region = RegionSpec {
            name: "test",
            base: PAGE_SIZE + 0x100,
            len: 0x100,
        };
        let io = platform.map_region(region).unwrap();

        io.write32(0x10, 0xdead_beef);
        assert_eq!(io.read32(0x10), 0xdead_beef);

        io.write8(0x11, 0x55);
        assert_eq!(io.read32(0x10), 0xdead_55ef);

        io.write16(0x12, 0x1234);
        assert_eq!(io.read32(0x10), 0x1234_55ef);
    }

    #[test]
    fn test_halfword_lanes_match_reads() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file().set_len(PAGE_SIZE).unwrap();
        let platform = DevMemPlatform::open(tmp.path()).unwrap();
        let mapped = platform
            .map_region(RegionSpec {
                name: "lanes",
                base: 0,
                len: 0x100,
            })
            .unwrap();
        let fake: Arc<dyn RegisterIo> = Arc::new(crate::testing::FakeRegs::new());

        for io in [mapped, fake] {
            io.write16(0x21, 0xabcd);
            assert_eq!(io.read32(0x20), 0x00ab_cd00);
            assert_eq!((io.read32(0x20) >> sub_word_shift16(0x21)) as u16, 0xabcd);

            io.write16(0x27, 0x1234);
            assert_eq!(io.read32(0x24), 0x1234_0000);
            assert_eq!((io.read32(0x24) >> sub_word_shift16(0x27)) as u16, 0x1234);
        }
    }

    #[test]
    fn test_map_zero_length_fails() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file().set_len(PAGE_SIZE).unwrap();

        let platform = DevMemPlatform::open(tmp.path()).unwrap();
        let result = platform.map_region(RegionSpec {
            name: "empty",
            base: 0,
            len: 0,
        });
        assert!(matches!(result, Err(OtgError::Init(_))));
    }

    #[test]
    fn test_open_missing_device() {
        let result = DevMemPlatform::open("/nonexistent/otg-glue-mem");
        assert!(matches!(result, Err(OtgError::Init(_))));
    }

    #[test]
    fn test_sub_window_offsets() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file().set_len(PAGE_SIZE).unwrap();
        let platform = DevMemPlatform::open(tmp.path()).unwrap();
        let io = platform
            .map_region(RegionSpec {
                name: "dma",
                base: 0,
                len: 0x400,
            })
            .unwrap();

        let sub = SubWindow::new(io.clone(), 0x200);
        sub.write32(0x4, 7);
        assert_eq!(io.read32(0x204), 7);
    }
}
