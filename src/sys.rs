//! Thin libc wrappers for the socket operations `std` does not expose.
//!
//! `std::net` covers connect/accept/read, but the listener needs an exact
//! backlog and its options set before `bind`, sends must never raise
//! `SIGPIPE` inside the host process, and the poller needs `FIONREAD` to
//! look at the socket without consuming from it.

use std::io::{self, Write};
use std::mem;
use std::net::{SocketAddrV4, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Create a non-blocking listening socket bound to `addr`.
///
/// `SO_REUSEADDR` and `SO_KEEPALIVE` are applied before `bind` so a
/// restarted host can rebind while the previous socket sits in TIME_WAIT.
pub(crate) fn bind_listener(addr: SocketAddrV4, backlog: i32) -> io::Result<TcpListener> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let ty = libc::SOCK_STREAM | libc::SOCK_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let ty = libc::SOCK_STREAM;

    // SAFETY: plain socket(2) call; the result is checked before use.
    let raw = unsafe { libc::socket(libc::AF_INET, ty, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_flag(fd.as_raw_fd(), libc::SO_REUSEADDR)?;
    set_flag(fd.as_raw_fd(), libc::SO_KEEPALIVE)?;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    set_flag(fd.as_raw_fd(), libc::SO_NOSIGPIPE)?;

    let sin = sockaddr_in(addr);
    // SAFETY: `sin` is a fully initialised sockaddr_in and the length matches it.
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            std::ptr::addr_of!(sin).cast::<libc::sockaddr>(),
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: listen(2) on a bound socket we own.
    if unsafe { libc::listen(fd.as_raw_fd(), backlog) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let listener = TcpListener::from(fd);
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Enable `SO_KEEPALIVE` (and `SO_NOSIGPIPE` where it exists) on a connected socket.
pub(crate) fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    set_flag(stream.as_raw_fd(), libc::SO_KEEPALIVE)?;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    set_flag(stream.as_raw_fd(), libc::SO_NOSIGPIPE)?;
    Ok(())
}

/// Number of bytes that can be read from `stream` without blocking.
pub(crate) fn bytes_available(stream: &TcpStream) -> io::Result<usize> {
    let mut available: libc::c_int = 0;
    // SAFETY: FIONREAD writes a single c_int into `available`.
    let ret = unsafe { libc::ioctl(stream.as_raw_fd(), libc::FIONREAD, &mut available) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(usize::try_from(available).unwrap_or(0))
}

/// `io::Write` over a borrowed stream that never raises `SIGPIPE`.
///
/// A dead peer surfaces as `EPIPE` instead of a signal that would take the
/// whole host process down.
#[derive(Debug)]
pub(crate) struct SignalFreeWriter<'a>(pub(crate) &'a TcpStream);

impl Write for SignalFreeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        let flags = libc::MSG_NOSIGNAL;
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let flags = 0;

        // SAFETY: `buf` is valid for `buf.len()` bytes for the duration of the call.
        let sent = unsafe {
            libc::send(
                self.0.as_raw_fd(),
                buf.as_ptr().cast::<libc::c_void>(),
                buf.len(),
                flags,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn set_flag(fd: RawFd, option: libc::c_int) -> io::Result<()> {
    let value: libc::c_int = 1;
    // SAFETY: the option value is a c_int living across the call.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            std::ptr::addr_of!(value).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is plain old data; all-zero is a valid value.
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
    }
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    sin
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    fn ephemeral() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[test]
    fn test_bind_listener_is_nonblocking() {
        let listener = bind_listener(ephemeral(), 2).expect("bind");
        let err = listener.accept().expect_err("no peer yet");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_bind_listener_reports_port_in_use() {
        let first = bind_listener(ephemeral(), 2).expect("bind");
        let port = first.local_addr().unwrap().port();
        let second = bind_listener(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), 2);
        assert!(second.is_err(), "second bind on a live listener must fail");
    }

    #[test]
    fn test_bytes_available_tracks_unread_data() {
        let listener = bind_listener(ephemeral(), 2).expect("bind");
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let (server, _) = loop {
            match listener.accept() {
                Ok(pair) => break pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        };

        assert_eq!(bytes_available(&client).unwrap(), 0);
        SignalFreeWriter(&server).write_all(b"hello").unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while bytes_available(&client).unwrap() < 5 {
            assert!(Instant::now() < deadline, "bytes never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(bytes_available(&client).unwrap(), 0);
    }
}
