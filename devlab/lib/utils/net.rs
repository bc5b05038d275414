use std::{
    net::{IpAddr, Ipv4Addr, UdpSocket},
    time::Duration,
};

use tokio::net::TcpStream;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Broadcast addresses probed to discover which interface carries the default route.
/// Connecting a UDP socket never sends a packet, so the targets do not have to be reachable.
const BROADCAST_NETS: &[Ipv4Addr] = &[
    Ipv4Addr::new(10, 255, 255, 255),
    Ipv4Addr::new(172, 31, 255, 255),
    Ipv4Addr::new(192, 168, 255, 255),
    Ipv4Addr::new(172, 30, 255, 1),
];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the IP address of whichever interface has a default route.
///
/// Falls back to the loopback address when no interface answers for any of the probed
/// networks.
pub fn get_primary_ip() -> IpAddr {
    for bnet in BROADCAST_NETS {
        let Ok(skt) = UdpSocket::bind(("0.0.0.0", 0)) else {
            continue;
        };

        if skt.connect((*bnet, 1)).is_ok() {
            if let Ok(addr) = skt.local_addr() {
                return addr.ip();
            }
        }
    }

    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Performs a basic TCP connect to `host` on `port`, bounded by `timeout`.
pub async fn port_check(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_primary_ip_returns_an_address() {
        // Worst case this is the loopback fallback, it must never panic.
        let ip = get_primary_ip();
        assert!(!ip.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_port_check_closed_port() {
        // Port 1 on loopback is essentially never listening.
        assert!(!port_check("127.0.0.1", 1, Duration::from_millis(200)).await);
    }
}
