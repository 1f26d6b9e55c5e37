use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use anyhow::Context;
use tracing::info;

use crate::config::ServerConfig;

/// Pending-connection queue length handed to `listen(2)`.
pub const BACKLOG: libc::c_int = 1024;

/// How long `close` blocks to flush unsent data when lingering is enabled.
const LINGER_SECS: libc::c_int = 1;

/// Create the listening socket on `0.0.0.0:<port>`.
///
/// The socket is non-blocking, always has `SO_REUSEADDR` set, and has
/// `SO_LINGER` set to a one second graceful close when `linger` is enabled.
pub fn bind(cfg: &ServerConfig) -> anyhow::Result<TcpListener> {
    anyhow::ensure!(
        cfg.port >= 1024,
        "port {} out of range, expected 1024-65535",
        cfg.port
    );
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, cfg.port);

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error()).context("failed to create listen socket");
    }
    // owns the fd from here on, closing it on every error path
    let listener = unsafe { TcpListener::from_raw_fd(fd) };

    let linger = libc::linger {
        l_onoff: libc::c_int::from(cfg.linger),
        l_linger: if cfg.linger { LINGER_SECS } else { 0 },
    };
    set_option(fd, libc::SO_LINGER, &linger).context("failed to set SO_LINGER")?;
    set_option(fd, libc::SO_REUSEADDR, &(1 as libc::c_int))
        .context("failed to set SO_REUSEADDR")?;

    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: cfg.port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    };
    let res = unsafe {
        libc::bind(
            listener.as_raw_fd(),
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin) as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error()).with_context(|| format!("failed to bind {}", addr));
    }

    if unsafe { libc::listen(listener.as_raw_fd(), BACKLOG) } < 0 {
        return Err(io::Error::last_os_error()).with_context(|| format!("failed to listen on {}", addr));
    }

    listener
        .set_nonblocking(true)
        .context("failed to make listener non-blocking")?;

    info!("Listening on {}", addr);
    Ok(listener)
}

fn set_option<T>(fd: RawFd, name: libc::c_int, value: &T) -> io::Result<()> {
    let res = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
