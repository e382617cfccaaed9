//! `host:port` splitting for decision criteria.
//!
//! Follows the usual socket-address text form: IPv6 hosts must be bracketed
//! (`[::1]:443`), the host may be empty (`:8080`), and the port must be a
//! decimal number in the `u16` range.

use thiserror::Error;

/// Errors produced while splitting an endpoint string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrError {
    #[error("address {0}: missing port in address")]
    MissingPort(String),

    #[error("address {0}: missing ']' in address")]
    MissingBracket(String),

    #[error("address {0}: too many colons in address")]
    TooManyColons(String),

    #[error("address {addr}: unexpected '{ch}' in address")]
    UnexpectedBracket { addr: String, ch: char },

    #[error("address {addr}: invalid port {port:?}")]
    InvalidPort { addr: String, port: String },
}

/// Split `addr` into host and numeric port.
pub fn split_host_port(addr: &str) -> Result<(String, u16), AddrError> {
    let (host, port) = split_raw(addr)?;
    let port = port.parse::<u16>().map_err(|_| AddrError::InvalidPort {
        addr: addr.to_string(),
        port: port.to_string(),
    })?;
    Ok((host.to_string(), port))
}

fn split_raw(addr: &str) -> Result<(&str, &str), AddrError> {
    let last_colon = addr
        .rfind(':')
        .ok_or_else(|| AddrError::MissingPort(addr.to_string()))?;

    let (host, host_start, host_end) = if addr.starts_with('[') {
        let close = addr
            .find(']')
            .ok_or_else(|| AddrError::MissingBracket(addr.to_string()))?;
        if close + 1 == addr.len() {
            return Err(AddrError::MissingPort(addr.to_string()));
        }
        if close + 1 != last_colon {
            if addr.as_bytes()[close + 1] == b':' {
                return Err(AddrError::TooManyColons(addr.to_string()));
            }
            return Err(AddrError::MissingPort(addr.to_string()));
        }
        (&addr[1..close], 1, close + 1)
    } else {
        let host = &addr[..last_colon];
        if host.contains(':') {
            return Err(AddrError::TooManyColons(addr.to_string()));
        }
        (host, 0, 0)
    };

    if addr[host_start..].contains('[') {
        return Err(AddrError::UnexpectedBracket { addr: addr.to_string(), ch: '[' });
    }
    if addr[host_end..].contains(']') {
        return Err(AddrError::UnexpectedBracket { addr: addr.to_string(), ch: ']' });
    }

    Ok((host, &addr[last_colon + 1..]))
}
