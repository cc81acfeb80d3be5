//! UTS namespace isolation.
//!
//! Allows a process to have its own hostname and domain name.

use nsbox_common::error::{NsboxError, Result};

/// Longest hostname the kernel accepts (`HOST_NAME_MAX`).
pub const HOSTNAME_MAX: usize = 64;

/// Checks that `hostname` can be passed to `sethostname(2)`.
///
/// # Errors
///
/// Returns [`NsboxError::Config`] if the name is empty, longer than
/// [`HOSTNAME_MAX`] bytes, or contains a NUL byte.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() || hostname.len() > HOSTNAME_MAX || hostname.contains('\0') {
        return Err(NsboxError::Config {
            message: format!("invalid hostname {hostname:?}"),
        });
    }
    Ok(())
}

/// Sets the hostname of the calling process's UTS namespace.
///
/// Fork-safe: the name is passed to the kernel without allocation.
///
/// # Errors
///
/// Returns the OS error if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> std::io::Result<()> {
    nix::unistd::sethostname(hostname).map_err(std::io::Error::from)
}
