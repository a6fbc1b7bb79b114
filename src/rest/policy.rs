use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use chrono::{Local, NaiveDateTime};

/// Layout of the signed `timestamp` parameter.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How the signed `request_ip` is chosen when a call carries no
/// [`RequestIdentity`](crate::rest::RequestIdentity).
#[non_exhaustive]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum RequestIpPolicy {
    /// Use a non-loopback address of this host, or nothing if none is found.
    #[default]
    Detect,
    Fixed(String),
    Omit,
}

impl RequestIpPolicy {
    /// Resolves the address; `detect` is only consulted for [`RequestIpPolicy::Detect`].
    pub(crate) fn resolve<F: FnOnce() -> String>(&self, detect: F) -> String {
        match self {
            RequestIpPolicy::Detect => detect(),
            RequestIpPolicy::Fixed(ip) => ip.clone(),
            RequestIpPolicy::Omit => String::new(),
        }
    }
}

/// Best-effort outbound interface address.
///
/// Connecting a UDP socket only selects a route, nothing is sent.
pub(crate) fn detect_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

pub(crate) fn resolve_timestamp(override_timestamp: Option<NaiveDateTime>) -> String {
    override_timestamp
        .unwrap_or_else(|| Local::now().naive_local())
        .format(TIMESTAMP_FORMAT)
        .to_string()
}
