use std::{ptr::NonNull, sync::OnceLock};

/// Virtual memory page size of the computer. This is usually 4096, but we
/// can't know it at compile time.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Zero-sized handle to the platform's virtual memory syscalls.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The address space on top of it has nothing to do with the
/// concrete APIs offered by each kernel.
///
/// Memory is handled in two steps: a range of addresses is first reserved
/// without any backing, then committed piecewise as the heap grows. This keeps
/// the base address stable, so heap offsets never move.
pub(crate) trait PlatformMemory {
    /// Reserves `len` bytes of address space that cannot be accessed yet.
    /// Returns `None` if the underlying syscall fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `len` bytes starting at `addr` readable, writable and zeroed.
    /// `addr` must lie inside a reservation and be page aligned.
    unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns the whole reservation of size `len` starting from `addr` back
    /// to the kernel.
    unsafe fn release(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size once.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(Kernel::page_size)
}

/// Wrapper to use [`Kernel::reserve`]
#[inline]
pub(crate) unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
    unsafe { Kernel::reserve(len) }
}

/// Wrapper to use [`Kernel::commit`]
#[inline]
pub(crate) unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
    unsafe { Kernel::commit(addr, len) }
}

/// Wrapper to use [`Kernel::release`]
#[inline]
pub(crate) unsafe fn release(addr: NonNull<u8>, len: usize) {
    unsafe { Kernel::release(addr, len) }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, mprotect, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // No access until committed.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            unsafe { mprotect(addr.as_ptr().cast::<c_void>(), len as size_t, PROT) == 0 }
        }

        unsafe fn release(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use crate::kernel::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr =
                    Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            unsafe {
                let base = addr.as_ptr().cast::<c_void>().cast_const();
                !Memory::VirtualAlloc(Some(base), len, Memory::MEM_COMMIT, protection).is_null()
            }
        }

        unsafe fn release(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    #[test]
    fn os_page_divides_heap_page() {
        let os_page = page_size();
        assert!(os_page.is_power_of_two());
        assert_eq!(PAGE_SIZE % os_page, 0);
    }

    #[test]
    fn reserve_commit_release() {
        unsafe {
            let base = reserve(4 * PAGE_SIZE).expect("reserve failed");
            assert!(commit(base, PAGE_SIZE));

            let bytes = std::slice::from_raw_parts_mut(base.as_ptr(), PAGE_SIZE);
            assert!(bytes.iter().all(|b| *b == 0));
            bytes[PAGE_SIZE - 1] = 0xAB;
            assert_eq!(bytes[PAGE_SIZE - 1], 0xAB);

            release(base, 4 * PAGE_SIZE);
        }
    }
}
