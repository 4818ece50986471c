use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};

/// Header naming the sender's address for trusted-subnet checks. gRPC
/// metadata uses the lowercase form.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// gRPC metadata key for [`REAL_IP_HEADER`].
pub const REAL_IP_METADATA: &str = "x-real-ip";

/// Best-effort local address used to reach `endpoint`.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
/// Accepts `host:port` or a URL such as `http://host:port/path`.
pub fn outbound_ip(endpoint: &str) -> Option<IpAddr> {
    let target = resolve(endpoint)?;
    let bind: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn resolve(endpoint: &str) -> Option<SocketAddr> {
    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", endpoint),
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return None;
    }
    let has_port = authority
        .rsplit_once(':')
        .map(|(_, port)| port.parse::<u16>().is_ok() && !authority.ends_with(']'))
        .unwrap_or(false);
    let with_port = if has_port {
        authority.to_string()
    } else {
        let port = if scheme == "https" { 443 } else { 80 };
        format!("{authority}:{port}")
    };
    with_port.to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_endpoint_resolves_to_loopback_source() {
        let ip = outbound_ip("http://127.0.0.1:8080/updates/").unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn bare_host_port_is_accepted() {
        assert_eq!(
            resolve("127.0.0.1:9090"),
            Some(SocketAddr::from(([127, 0, 0, 1], 9090)))
        );
        assert_eq!(
            resolve("http://127.0.0.1"),
            Some(SocketAddr::from(([127, 0, 0, 1], 80)))
        );
    }

    #[test]
    fn empty_endpoint_yields_nothing() {
        assert_eq!(outbound_ip(""), None);
    }
}
