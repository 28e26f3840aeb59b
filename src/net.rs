// src/net.rs
use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, UdpSocket};

/// Receive socket joined to a multicast group. Nonblocking; the caller's
/// poll loop treats WouldBlock as "nothing yet".
pub fn mcast_recv_socket(
    group: Ipv4Addr,
    port: u16,
    iface: Ipv4Addr,
    recv_buffer_bytes: u32,
) -> anyhow::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;

    sock.set_reuse_address(true).ok();
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    sock.set_reuse_port(true).ok();

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    sock.bind(&bind_addr.into()).context("bind")?;

    if recv_buffer_bytes > 0 {
        let _ = sock.set_recv_buffer_size(recv_buffer_bytes as usize);
    }

    sock.join_multicast_v4(&group, &iface)
        .context("join_multicast_v4")?;

    let s: UdpSocket = sock.into();
    s.set_nonblocking(true).context("set_nonblocking")?;
    Ok(s)
}

/// Send socket for publishing to a multicast group on `iface`. Loopback is
/// left on so same-host participants receive the stream.
pub fn mcast_send_socket(iface: Ipv4Addr) -> anyhow::Result<UdpSocket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket")?;
    sock.bind(&SocketAddr::V4(SocketAddrV4::new(iface, 0)).into())
        .context("bind")?;
    sock.set_multicast_if_v4(&iface).ok();
    sock.set_multicast_loop_v4(true).ok();
    sock.set_multicast_ttl_v4(1).ok();
    let s: UdpSocket = sock.into();
    Ok(s)
}

/// Nonblocking TCP listener for the order gateway.
pub fn tcp_listener(bind: &str) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = bind.parse().with_context(|| format!("parse bind addr {bind}"))?;
    let sock = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).context("socket")?;
    sock.set_reuse_address(true).ok();
    sock.bind(&addr.into()).with_context(|| format!("bind {bind}"))?;
    sock.listen(128).context("listen")?;
    let l: TcpListener = sock.into();
    l.set_nonblocking(true).context("set_nonblocking")?;
    Ok(l)
}

/// Linux SO_BUSY_POLL hint; no-op elsewhere.
#[allow(unused_variables)]
pub fn set_busy_poll(sock: &UdpSocket, busy_poll_us: Option<u32>) {
    #[cfg(target_os = "linux")]
    if let Some(us) = busy_poll_us {
        unsafe {
            use std::os::fd::AsRawFd;
            let fd = sock.as_raw_fd();
            let val: libc::c_int = us as libc::c_int;
            let _ = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_BUSY_POLL,
                &val as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_binds_ephemeral() {
        let l = tcp_listener("127.0.0.1:0").unwrap();
        assert_ne!(l.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn send_socket_builds_on_loopback() {
        mcast_send_socket(Ipv4Addr::LOCALHOST).unwrap();
    }
}
