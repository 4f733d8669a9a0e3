//! Disk usage queries for the storage filesystem.
//!
//! The quota tracker caps reservations at whichever is smaller: the
//! configured byte budget or the space actually left on the disk holding the
//! storage directory.
//!
//! Unix only (`statvfs`); other platforms get an `Unsupported` error.

use std::path::Path;

/// Free and total bytes on the filesystem containing a path.
#[derive(Debug, Clone, Copy)]
pub struct DiskUsage {
    /// Bytes available to unprivileged writers
    pub free_bytes: u64,
    /// Total size of the filesystem
    pub total_bytes: u64,
}

/// Query disk usage for the filesystem containing `path`.
///
/// # Errors
///
/// Returns `std::io::Error` if the syscall fails or the platform is
/// unsupported.
#[cfg(target_family = "unix")]
pub fn query(path: &Path) -> std::io::Result<DiskUsage> {
    use std::os::unix::ffi::OsStrExt;

    let path_cstr = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: statvfs is a C struct of primitive integers with no invariants;
    // zero-initialization is valid.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: path_cstr is a valid null-terminated C string and stat is a
    // valid mutable reference for the statvfs() syscall to fill in.
    let result = unsafe { libc::statvfs(path_cstr.as_ptr(), &mut stat) };

    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(DiskUsage {
        free_bytes: stat.f_bavail as u64 * stat.f_frsize as u64,
        total_bytes: stat.f_blocks as u64 * stat.f_frsize as u64,
    })
}

#[cfg(not(target_family = "unix"))]
pub fn query(_path: &Path) -> std::io::Result<DiskUsage> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "disk usage queries are only supported on Unix",
    ))
}
