//! Host memory for relocated bodies: a writable mapping while records patch it, read+execute
//! once relocation is done.

use crate::target::CodeBuffer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionError(String);

impl std::fmt::Display for RegionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code region: {}", self.0)
    }
}

impl std::error::Error for RegionError {}

/// An owned page mapping holding one copied-in body.
#[derive(Debug)]
pub struct CodeRegion {
    ptr: *mut u8,
    len: usize,
    executable: bool,
}

impl CodeRegion {
    /// Maps a read+write region and copies `code` into it.
    pub fn with_code(code: &[u8]) -> Result<Self, RegionError> {
        if code.is_empty() {
            return Err(RegionError("empty body".to_string()));
        }
        let ptr = alloc_region(code.len())?;
        // SAFETY: `ptr` maps at least `code.len()` writable bytes that nothing else aliases.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }
        Ok(Self {
            ptr,
            len: code.len(),
            executable: false,
        })
    }

    pub fn address(&self) -> usize {
        self.ptr as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the mapping stays readable for the region's lifetime.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Patchable view whose addresses are the region's real addresses.
    pub fn code_buffer(&mut self) -> Result<CodeBuffer<'_>, RegionError> {
        if self.executable {
            return Err(RegionError("region is already executable".to_string()));
        }
        let base = self.address();
        // SAFETY: the mapping is writable until `finalize`, and `&mut self` keeps it unaliased.
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) };
        Ok(CodeBuffer::new(bytes, base))
    }

    /// Flips the region to read+execute and flushes the instruction cache.
    pub fn finalize(&mut self) -> Result<(), RegionError> {
        if self.executable {
            return Ok(());
        }
        finalize_region(self.ptr, self.len)?;
        flush_instruction_cache(self.bytes());
        self.executable = true;
        Ok(())
    }
}

impl Drop for CodeRegion {
    fn drop(&mut self) {
        if let Err(err) = free_region(self.ptr, self.len) {
            tracing::warn!("{err}");
        }
    }
}

/// Makes freshly patched instructions visible to instruction fetch on hosts with split caches.
pub(crate) fn flush_instruction_cache(code: &[u8]) {
    if code.is_empty() {
        return;
    }
    #[cfg(all(
        target_os = "linux",
        any(target_arch = "aarch64", target_arch = "powerpc")
    ))]
    // SAFETY: the range is a live borrowed slice.
    unsafe {
        let begin = code.as_ptr() as *mut libc::c_char;
        __clear_cache(begin, begin.add(code.len()));
    }

    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    // SAFETY: the range is a live borrowed slice.
    unsafe {
        sys_icache_invalidate(code.as_ptr() as *mut libc::c_void, code.len());
    }

    #[cfg(target_os = "windows")]
    {
        use windows_sys::Win32::System::{
            Diagnostics::Debug::FlushInstructionCache, Threading::GetCurrentProcess,
        };
        // SAFETY: the range is a live borrowed slice of this process.
        let ok = unsafe {
            FlushInstructionCache(GetCurrentProcess(), code.as_ptr() as *const _, code.len())
        };
        if ok == 0 {
            tracing::warn!(
                "FlushInstructionCache failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "aarch64", target_arch = "powerpc")
))]
unsafe extern "C" {
    fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
unsafe extern "C" {
    fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
}

#[cfg(unix)]
fn alloc_region(len: usize) -> Result<*mut u8, RegionError> {
    // SAFETY: anonymous private mapping, no file descriptor involved.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(RegionError(format!(
            "mmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr as *mut u8)
}

#[cfg(unix)]
fn finalize_region(ptr: *mut u8, len: usize) -> Result<(), RegionError> {
    // SAFETY: `ptr`/`len` describe a mapping created by `alloc_region`.
    let rc = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
    if rc != 0 {
        return Err(RegionError(format!(
            "mprotect(PROT_READ|PROT_EXEC) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn free_region(ptr: *mut u8, len: usize) -> Result<(), RegionError> {
    if ptr.is_null() {
        return Ok(());
    }
    // SAFETY: `ptr`/`len` describe a mapping created by `alloc_region`.
    let rc = unsafe { libc::munmap(ptr as *mut _, len) };
    if rc != 0 {
        return Err(RegionError(format!(
            "munmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn alloc_region(len: usize) -> Result<*mut u8, RegionError> {
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE, VirtualAlloc,
    };

    // SAFETY: fresh reservation, no existing memory is touched.
    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null_mut(),
            len,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        ) as *mut u8
    };
    if ptr.is_null() {
        return Err(RegionError(format!(
            "VirtualAlloc failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(ptr)
}

#[cfg(target_os = "windows")]
fn finalize_region(ptr: *mut u8, len: usize) -> Result<(), RegionError> {
    use windows_sys::Win32::System::Memory::{PAGE_EXECUTE_READ, VirtualProtect};

    let mut old_protect = 0u32;
    // SAFETY: `ptr`/`len` describe a mapping created by `alloc_region`.
    let ok = unsafe { VirtualProtect(ptr as *mut _, len, PAGE_EXECUTE_READ, &mut old_protect) };
    if ok == 0 {
        return Err(RegionError(format!(
            "VirtualProtect(PAGE_EXECUTE_READ) failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn free_region(ptr: *mut u8, _len: usize) -> Result<(), RegionError> {
    use windows_sys::Win32::System::Memory::{MEM_RELEASE, VirtualFree};

    if ptr.is_null() {
        return Ok(());
    }
    // SAFETY: `ptr` is the base of a `VirtualAlloc` reservation.
    let ok = unsafe { VirtualFree(ptr as *mut _, 0, MEM_RELEASE) };
    if ok == 0 {
        return Err(RegionError(format!(
            "VirtualFree failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(any(unix, target_os = "windows")))]
fn alloc_region(_len: usize) -> Result<*mut u8, RegionError> {
    Err(RegionError(
        "executable memory is not implemented for this platform".to_string(),
    ))
}

#[cfg(not(any(unix, target_os = "windows")))]
fn finalize_region(_ptr: *mut u8, _len: usize) -> Result<(), RegionError> {
    Ok(())
}

#[cfg(not(any(unix, target_os = "windows")))]
fn free_region(_ptr: *mut u8, _len: usize) -> Result<(), RegionError> {
    Ok(())
}

#[cfg(all(test, any(unix, target_os = "windows")))]
mod tests {
    use super::*;

    #[test]
    fn region_is_patchable_until_finalized() {
        let mut region = CodeRegion::with_code(&[0x90; 32]).expect("map region");
        let base = region.address();
        {
            let mut code = region.code_buffer().expect("writable");
            assert_eq!(code.base(), base);
            code.write(base + 4, &[0xc3]).expect("patch");
        }
        assert_eq!(region.bytes()[4], 0xc3);
        region.finalize().expect("finalize");
        assert!(region.is_executable());
        assert!(region.code_buffer().is_err());
    }

    #[test]
    fn empty_bodies_are_rejected() {
        assert!(CodeRegion::with_code(&[]).is_err());
    }
}
