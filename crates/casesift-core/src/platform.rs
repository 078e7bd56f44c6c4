/// Platform-specific disk space queries.
///
/// The resource monitor samples free space on the volume backing case
/// data; everything else in the core is platform-neutral.

#[cfg(windows)]
mod imp {
    use std::path::Path;
    use windows::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    /// Free bytes available to the calling user on the volume containing
    /// `path`, or `None` if the query fails.
    pub fn free_disk_space(path: &Path) -> Option<u64> {
        let wide: Vec<u16> = path
            .as_os_str()
            .to_string_lossy()
            .encode_utf16()
            .chain(std::iter::once(0u16))
            .collect();

        let mut free_caller: u64 = 0;
        let mut total: u64 = 0;
        let mut free_total: u64 = 0;
        let ok = unsafe {
            GetDiskFreeSpaceExW(
                windows::core::PCWSTR(wide.as_ptr()),
                Some(&mut free_caller as *mut u64),
                Some(&mut total as *mut u64),
                Some(&mut free_total as *mut u64),
            )
            .is_ok()
        };

        ok.then_some(free_caller)
    }
}

#[cfg(unix)]
mod imp {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    /// Free bytes available to the calling user on the volume containing
    /// `path`, or `None` if the query fails.
    pub fn free_disk_space(path: &Path) -> Option<u64> {
        let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
        // SAFETY: `stat` is a plain-old-data out-parameter fully written
        // by statvfs on success.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return None;
        }
        Some(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

pub use imp::free_disk_space;
