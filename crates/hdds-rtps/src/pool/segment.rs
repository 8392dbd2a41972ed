// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory segment backing the datasharing arena.
//!
//! The writer creates the segment, readers on the same host open it by name.
//! The mapping is released on drop; unlinking the name is the creator's job
//! (see [`ShmSegment::unlink`]).

use std::ffi::CString;
use std::io;
use std::ptr;

use super::PoolError;

/// Mapped POSIX shared memory object.
pub struct ShmSegment {
    ptr: *mut u8,
    size: usize,
    name: String,
    owner: bool,
}

// SAFETY: the mapping stays valid for the lifetime of the value and every
// concurrently accessed field inside it is an atomic.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

fn io_err(op: &str, name: &str, err: io::Error) -> PoolError {
    PoolError::Segment(format!("{} {}: {}", op, name, err))
}

impl ShmSegment {
    /// Create (or replace) the named segment and zero it.
    pub fn create(name: &str, size: usize) -> Result<Self, PoolError> {
        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_open reports
        // failure through a negative fd which is checked below.
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(io_err("shm_open", name, io::Error::last_os_error()));
        }

        let len = libc::off_t::try_from(size)
            .map_err(|_| PoolError::Segment(format!("segment size {} too large", size)))?;
        // SAFETY: fd is a valid descriptor returned by shm_open above.
        if unsafe { libc::ftruncate(fd, len) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid and not used after this point.
            unsafe { libc::close(fd) };
            return Err(io_err("ftruncate", name, err));
        }

        let ptr = Self::map(fd, size, name)?;
        // SAFETY: ptr maps exactly `size` writable bytes that nobody else can
        // observe yet (the segment was just created exclusively).
        unsafe { ptr::write_bytes(ptr, 0, size) };

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
            owner: true,
        })
    }

    /// Map an existing segment.
    pub fn open(name: &str, size: usize) -> Result<Self, PoolError> {
        let c_name = Self::c_name(name)?;
        // SAFETY: c_name is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(io_err("shm_open", name, io::Error::last_os_error()));
        }
        let ptr = Self::map(fd, size, name)?;
        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
            owner: false,
        })
    }

    /// mmap `fd` and close it (the mapping keeps the object alive).
    fn map(fd: libc::c_int, size: usize, name: &str) -> Result<*mut u8, PoolError> {
        // SAFETY: null hint lets the kernel pick the address; fd is a valid
        // shm descriptor; MAP_FAILED is checked below.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        let err = io::Error::last_os_error();
        // SAFETY: fd is valid; closing it does not invalidate the mapping.
        unsafe { libc::close(fd) };
        if raw == libc::MAP_FAILED {
            return Err(io_err("mmap", name, err));
        }
        Ok(raw.cast::<u8>())
    }

    fn c_name(name: &str) -> Result<CString, PoolError> {
        if !name.starts_with('/') || name[1..].contains('/') || name.len() > 255 {
            return Err(PoolError::Segment(format!("invalid segment name {}", name)));
        }
        CString::new(name).map_err(|_| PoolError::Segment(format!("invalid segment name {}", name)))
    }

    /// Remove the name; existing mappings stay valid.
    pub fn unlink(name: &str) -> Result<(), PoolError> {
        let c_name = Self::c_name(name)?;
        // SAFETY: c_name is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(io_err("shm_unlink", name, err));
            }
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for the mapping that created the segment.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from a successful mmap and are unmapped once.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_names() {
        assert!(ShmSegment::create("no_slash", 64).is_err());
        assert!(ShmSegment::create("/a/b", 64).is_err());
    }

    #[test]
    fn test_create_open_share_bytes() {
        let name = format!("/hdds_rtps_seg_test_{}", std::process::id());
        let writer = ShmSegment::create(&name, 4096).expect("create should succeed");
        // SAFETY: both mappings cover 4096 bytes; offset 100 is in range.
        unsafe { *writer.as_ptr().add(100) = 0x5A };

        let reader = ShmSegment::open(&name, 4096).expect("open should succeed");
        // SAFETY: see above.
        let seen = unsafe { *reader.as_ptr().add(100) };
        assert_eq!(seen, 0x5A);
        assert!(writer.is_owner() && !reader.is_owner());

        ShmSegment::unlink(&name).expect("unlink should succeed");
        ShmSegment::unlink(&name).expect("second unlink is a no-op");
    }
}
