//! TCP keepalive tuning, platform-specific below the `SO_KEEPALIVE` flag
//! itself.
//!
//! Enabling keepalive is portable; tuning idle/interval/probe-count is not.
//! Linux exposes three independent knobs. Darwin-family systems expose a
//! single `TCP_KEEPALIVE` option (and `libc` does not name it on that
//! platform, so it is addressed by its raw value). Everything else gets
//! `SO_KEEPALIVE` only, with the kernel's own defaults for timing.

use std::io;
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;

use log::debug;

use crate::config::KeepaliveConfig;

#[allow(unsafe_code)]
fn set_so_keepalive(stream: &TcpStream, enabled: bool) -> io::Result<()> {
    let value: libc::c_int = i32::from(enabled);
    let ret = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            std::ptr::addr_of!(value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[allow(unsafe_code)]
fn setsockopt_tcp(stream: &TcpStream, option: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::IPPROTO_TCP,
            option,
            std::ptr::addr_of!(value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Applies `config` to `stream`. Platforms this crate has no specific
/// tuning for fall back to `SO_KEEPALIVE` with the system's own defaults.
pub(crate) fn configure(stream: &TcpStream, config: &KeepaliveConfig) -> io::Result<()> {
    set_so_keepalive(stream, config.enabled)?;
    if !config.enabled {
        return Ok(());
    }
    platform::tune(stream, config)
}

#[cfg(target_os = "linux")]
mod platform {
    use super::{setsockopt_tcp, KeepaliveConfig};
    use std::io;
    use std::net::TcpStream;

    pub(super) fn tune(stream: &TcpStream, config: &KeepaliveConfig) -> io::Result<()> {
        setsockopt_tcp(stream, libc::TCP_KEEPIDLE, config.idle_secs as libc::c_int)?;
        setsockopt_tcp(stream, libc::TCP_KEEPINTVL, config.interval_secs as libc::c_int)?;
        setsockopt_tcp(stream, libc::TCP_KEEPCNT, config.count as libc::c_int)?;
        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::{setsockopt_tcp, KeepaliveConfig};
    use std::io;
    use std::net::TcpStream;

    /// Darwin's `netinet/tcp.h` defines `TCP_KEEPALIVE` as `0x10`; `libc`
    /// does not re-export a name for it under this target, so it is
    /// addressed by its raw value.
    const TCP_KEEPALIVE: libc::c_int = 0x10;

    pub(super) fn tune(stream: &TcpStream, config: &KeepaliveConfig) -> io::Result<()> {
        setsockopt_tcp(stream, TCP_KEEPALIVE, config.idle_secs as libc::c_int)
    }
}

#[cfg(any(target_os = "freebsd", target_os = "dragonfly", target_os = "openbsd", target_os = "netbsd"))]
mod platform {
    use super::{setsockopt_tcp, KeepaliveConfig};
    use std::io;
    use std::net::TcpStream;

    pub(super) fn tune(stream: &TcpStream, config: &KeepaliveConfig) -> io::Result<()> {
        setsockopt_tcp(stream, libc::TCP_KEEPALIVE, config.idle_secs as libc::c_int)
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
mod platform {
    use super::KeepaliveConfig;
    use log::debug;
    use std::io;
    use std::net::TcpStream;

    pub(super) fn tune(_stream: &TcpStream, _config: &KeepaliveConfig) -> io::Result<()> {
        debug!("keepalive tuning unsupported on this platform, using SO_KEEPALIVE defaults");
        Ok(())
    }
}
