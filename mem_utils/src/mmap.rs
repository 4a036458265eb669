use core::ffi::c_void;
use core::mem::size_of;
use core::num::NonZeroUsize;
use core::ops::{Deref, DerefMut};
use core::ptr;
use core::ptr::NonNull;
use core::slice::{from_raw_parts, from_raw_parts_mut};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use nix::errno::Errno;
use nix::sys::mman;

/// Backing for a mapped region. The two anonymous variants differ only in
/// whether the kernel serves the mapping from the huge page pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStrategy {
    /// Private anonymous mapping backed by MAP_HUGETLB.
    AnonymousHuge,
    /// Private anonymous mapping with the default page size.
    Anonymous,
    /// Shared window of /dev/mem starting at this physical address.
    /// Requires privileges and a platform where the window exists.
    Physical { base: u64 },
}

/// Owned mmap-backed array of `T`. `T: Copy` so teardown is a plain munmap.
pub struct MMappedMemory<T> {
    pointer: NonNull<T>,
    size: usize,
}

impl<T: Copy> MMappedMemory<T> {
    /// Map `size` elements according to `strategy`.
    ///
    /// Anonymous mappings are written once with `initializer` so every page
    /// is faulted in and backed by a physical frame before any timed access.
    /// Device-backed windows keep whatever the hardware holds.
    pub fn try_new(
        size: usize,
        strategy: MappingStrategy,
        initializer: impl Fn(usize) -> T,
    ) -> Result<MMappedMemory<T>, Errno> {
        assert_ne!(size_of::<T>(), 0);
        let length = size * size_of::<T>();
        let map_len = NonZeroUsize::new(length).ok_or(Errno::EINVAL)?;
        let prot = mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE;
        let raw = match strategy {
            MappingStrategy::AnonymousHuge | MappingStrategy::Anonymous => {
                let flags = mman::MapFlags::MAP_PRIVATE
                    | mman::MapFlags::MAP_ANONYMOUS
                    | if strategy == MappingStrategy::AnonymousHuge {
                        mman::MapFlags::MAP_HUGETLB
                    } else {
                        mman::MapFlags::MAP_ANONYMOUS
                    };
                unsafe { mman::mmap(None, map_len, prot, flags, -1, 0)? }
            }
            MappingStrategy::Physical { base } => {
                let dev = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .custom_flags(libc::O_SYNC)
                    .open("/dev/mem")
                    .map_err(|e| Errno::from_i32(e.raw_os_error().unwrap_or(libc::EACCES)))?;
                // The mapping outlives the descriptor.
                unsafe {
                    mman::mmap(
                        None,
                        map_len,
                        prot,
                        mman::MapFlags::MAP_SHARED,
                        dev.as_raw_fd(),
                        base as libc::off_t,
                    )?
                }
            }
        };
        let pointer = NonNull::new(raw as *mut T).ok_or(Errno::EINVAL)?;
        let s = MMappedMemory { pointer, size };
        if let MappingStrategy::AnonymousHuge | MappingStrategy::Anonymous = strategy {
            for i in 0..s.size {
                unsafe { ptr::write(s.pointer.as_ptr().add(i), initializer(i)) };
            }
        }
        Ok(s)
    }

    pub fn slice(&self) -> &[T] {
        unsafe { from_raw_parts(self.pointer.as_ptr(), self.size) }
    }

    pub fn slice_mut(&mut self) -> &mut [T] {
        unsafe { from_raw_parts_mut(self.pointer.as_ptr(), self.size) }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl<T> Drop for MMappedMemory<T> {
    fn drop(&mut self) {
        unsafe {
            mman::munmap(self.pointer.as_ptr() as *mut c_void, self.size * size_of::<T>()).unwrap();
        }
    }
}

impl<T: Copy> Deref for MMappedMemory<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.slice()
    }
}

impl<T: Copy> DerefMut for MMappedMemory<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slice_mut()
    }
}

impl<T: Copy> AsRef<[T]> for MMappedMemory<T> {
    fn as_ref(&self) -> &[T] {
        self.slice()
    }
}

impl<T: Copy> AsMut<[T]> for MMappedMemory<T> {
    fn as_mut(&mut self) -> &mut [T] {
        self.slice_mut()
    }
}
