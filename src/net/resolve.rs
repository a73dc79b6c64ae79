//! Blocking name resolution.
//!
//! Thin wrapper over the system resolver via `ToSocketAddrs`. Numeric
//! services are parsed directly; named services go through the
//! `"host:service"` form the platform resolver accepts.

use crate::error::StreamError;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolve `host` and `service` to socket addresses, in resolver order.
///
/// `service` may be a decimal port or a service name known to the platform.
/// An empty result set is reported as a resolution error.
pub fn resolve_host(host: &str, service: &str) -> Result<Vec<SocketAddr>, StreamError> {
    let addrs: Vec<SocketAddr> = if let Ok(port) = service.parse::<u16>() {
        (host, port)
            .to_socket_addrs()
            .map_err(StreamError::resolve)?
            .collect()
    } else {
        format!("{host}:{service}")
            .to_socket_addrs()
            .map_err(StreamError::resolve)?
            .collect()
    };
    if addrs.is_empty() {
        return Err(StreamError::resolve(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses for {host}:{service}"),
        )));
    }
    Ok(addrs)
}

/// Resolve `host` with a numeric port.
pub fn resolve_port(host: &str, port: u16) -> Result<Vec<SocketAddr>, StreamError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(StreamError::resolve)?
        .collect();
    if addrs.is_empty() {
        return Err(StreamError::resolve(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses for {host}:{port}"),
        )));
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamErrorKind;

    #[test]
    fn resolves_loopback_literal() {
        let addrs = resolve_port("127.0.0.1", 80).unwrap();
        assert!(addrs.iter().all(|a| a.port() == 80));
        assert!(addrs.iter().any(|a| a.ip().is_loopback()));
    }

    #[test]
    fn numeric_service_string() {
        let addrs = resolve_host("127.0.0.1", "8080").unwrap();
        assert_eq!(addrs[0].port(), 8080);
    }

    #[test]
    fn named_service_resolves_when_supported() {
        match resolve_host("127.0.0.1", "http") {
            Ok(addrs) => assert!(addrs.iter().all(|a| a.port() == 80)),
            // Some resolvers have no service database; nothing more to check.
            Err(err) => assert_eq!(err.kind(), StreamErrorKind::Resolve),
        }
    }

    #[test]
    fn garbage_host_is_resolve_error() {
        let err = resolve_port("definitely-not-a-host.invalid.", 80).unwrap_err();
        assert_eq!(err.kind(), StreamErrorKind::Resolve);
    }
}
