//! # Backing Memory for Rings and the Umem
//!
//! ## Purpose
//!
//! This module provides the page-aligned memory regions everything else is
//! built on: the ring backing stores (counter header plus slot array) and the
//! umem packet area donated by the caller. Both must live at page-aligned
//! addresses so they can be handed out again as user-space views at the
//! well-known page offsets.
//!
//! ## How it works
//!
//! `OwnedMmap` encapsulates a raw `libc::mmap` allocation and releases it with
//! `munmap` on drop. Ring stores use plain anonymous mappings (zero-filled by
//! construction). `UmemArea` adds the packet-memory concerns on top: it can be
//! backed by 2 MiB huge pages when the system has them free, and it is pinned
//! with `mlock` for the lifetime of a registration so frames never fault on
//! the receive path.
//!
//! ## Main components
//!
//! - `OwnedMmap`: A safe owner of a memory-mapped region.
//! - `UmemArea`: A page-aligned, pinnable packet-memory region.
//! - `get_hugepage_info()`: Parses `/proc/meminfo` for huge-page availability.

use crate::error::XskError;
use std::fs::File;
use std::io::{BufRead as _, BufReader};
use std::{io, ptr};

/// Returns the system page size in bytes.
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// A safe wrapper for a memory-mapped region.
///
/// This struct owns the memory-mapped pointer and ensures that `munmap` is
/// called when it goes out of scope.
pub struct OwnedMmap(
    /// A raw pointer to the beginning of the memory-mapped area.
    pub *mut libc::c_void,
    /// The total size of the memory-mapped area in bytes.
    pub usize,
);

unsafe impl Send for OwnedMmap {}
unsafe impl Sync for OwnedMmap {}

impl OwnedMmap {
    /// Constructs a new `OwnedMmap` from a raw pointer and size.
    ///
    /// This is a low-level constructor. Prefer `anon` or `mmap` for new
    /// allocations.
    pub fn new(ptr: *mut libc::c_void, size: usize) -> Self {
        OwnedMmap(ptr, size)
    }

    /// Creates an anonymous, zero-filled, page-aligned mapping of at least
    /// `size` bytes (rounded up to the page size).
    pub fn anon(size: usize) -> Result<Self, io::Error> {
        Self::mmap_flags(size, 0, page_size())
    }

    /// Creates a new memory-mapped region, optionally backed by huge pages.
    ///
    /// # How it works
    ///
    /// If `huge_page` is `None`, it checks `/proc/meminfo` for free 2 MiB huge
    /// pages and uses them when available. The requested size is aligned up to
    /// the page size in effect (standard or huge) before mapping.
    pub fn mmap(size: usize, huge_page: Option<bool>) -> Result<Self, io::Error> {
        // if not specified use huge pages, check if they are available
        let huge_tlb = if let Some(yes) = huge_page {
            yes
        } else {
            let info = get_hugepage_info()?;
            if let (Some(x), Some(2048)) = (info.free, info.size_kb) {
                x > 0
            } else {
                false
            }
        };
        if huge_tlb {
            Self::mmap_flags(
                size,
                libc::MAP_HUGETLB | libc::MAP_HUGE_2MB,
                2 * 1024 * 1024,
            )
        } else {
            Self::mmap_flags(size, 0, page_size())
        }
    }

    fn mmap_flags(size: usize, extra_flags: libc::c_int, align: usize) -> Result<Self, io::Error> {
        let aligned_size = (size + align - 1) & !(align - 1);
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                aligned_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | extra_flags,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(OwnedMmap(ptr, aligned_size))
    }

    /// Returns the raw pointer to the memory-mapped region.
    pub fn as_void_ptr(&self) -> *mut libc::c_void {
        self.0
    }

    /// Returns the raw pointer to the memory-mapped region as a byte pointer.
    pub fn as_u8_ptr(&self) -> *mut u8 {
        self.0 as *mut u8
    }

    /// Returns the size of the memory-mapped region in bytes.
    pub fn len(&self) -> usize {
        self.1
    }

    /// Returns `true` if the memory-mapped region has a size of zero.
    pub fn is_empty(&self) -> bool {
        self.1 == 0
    }
}

impl Drop for OwnedMmap {
    fn drop(&mut self) {
        unsafe {
            if self.0 != libc::MAP_FAILED && !self.0.is_null() {
                let res = libc::munmap(self.0, self.1);
                if res < 0 {
                    log::error!("Failed to unmap memory: {}", io::Error::last_os_error());
                }
            }
        }
    }
}

/// A page-aligned packet-memory region a caller donates at umem registration.
///
/// The region is allocated unpinned; registration pins it with `mlock` so the
/// copy on the receive path can never fault. The pin is dropped together with
/// the area.
pub struct UmemArea {
    mem: OwnedMmap,
    pinned: bool,
}

impl UmemArea {
    /// Allocates a packet area of at least `len` bytes.
    ///
    /// # Arguments
    /// * `len` - Requested size in bytes; rounded up to the page size.
    /// * `huge_page` - `Some(true)` forces huge pages, `Some(false)` forbids
    ///   them, `None` probes `/proc/meminfo`.
    pub fn alloc(len: usize, huge_page: Option<bool>) -> Result<Self, io::Error> {
        Ok(UmemArea {
            mem: OwnedMmap::mmap(len, huge_page)?,
            pinned: false,
        })
    }

    /// Returns the base pointer of the area.
    pub fn base(&self) -> *mut u8 {
        self.mem.as_u8_ptr()
    }

    /// Returns the base address of the area as the wire-format `u64`.
    pub fn addr(&self) -> u64 {
        self.mem.as_u8_ptr() as u64
    }

    /// Returns the size of the area in bytes.
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    /// Returns `true` if the area has a size of zero.
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Pins the area's pages in memory for the lifetime of a registration.
    pub(crate) fn pin(&mut self) -> Result<(), XskError> {
        if self.pinned {
            return Ok(());
        }
        if unsafe { libc::mlock(self.mem.as_void_ptr(), self.mem.len()) } < 0 {
            return Err(XskError::NoMem);
        }
        self.pinned = true;
        Ok(())
    }
}

impl Drop for UmemArea {
    fn drop(&mut self) {
        if self.pinned {
            unsafe {
                if libc::munlock(self.mem.as_void_ptr(), self.mem.len()) < 0 {
                    log::error!(
                        "Failed to unpin umem pages: {}",
                        io::Error::last_os_error()
                    );
                }
            }
        }
    }
}

/// Contains information about the system's huge page configuration.
#[derive(Debug, Default)]
pub struct HugePageInfo {
    /// The size of a huge page in kilobytes.
    pub size_kb: Option<u64>,
    /// The total number of huge pages configured in the system.
    pub total: Option<u64>,
    /// The number of free (available) huge pages.
    pub free: Option<u64>,
}

/// Parses `/proc/meminfo` to get information about huge pages.
pub fn get_hugepage_info() -> io::Result<HugePageInfo> {
    let file = File::open("/proc/meminfo")?;
    let reader = BufReader::new(file);
    let mut info = HugePageInfo::default();
    for line in reader.lines() {
        let line = line?;
        let parts: Vec<&str> = line.split(':').collect();

        if parts.len() == 2 {
            let key = parts[0].trim();
            let value_str = parts[1].trim().trim_end_matches(" kB");
            match key {
                "Hugepagesize" => info.size_kb = Some(value_str.parse().map_err(io::Error::other)?),
                "HugePages_Total" => {
                    info.total = Some(value_str.parse().map_err(io::Error::other)?)
                }
                "HugePages_Free" => info.free = Some(value_str.parse().map_err(io::Error::other)?),
                _ => {} // Ignore other lines
            }
        }
    }
    Ok(info)
}
