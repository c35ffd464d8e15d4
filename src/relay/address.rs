//! Destination address header
//!
//! The first decrypted bytes on a connection carry the destination:
//!
//! ```text
//! +------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |
//! +------+----------+----------+
//! |  1   | Variable |    2     |
//! +------+----------+----------+
//! ```
//!
//! `ATYP = 1` is an IPv4 address (4 bytes); `ATYP = 3` is a domain name (a
//! length byte followed by that many name bytes). The port is big-endian.
//! Any other ATYP is a protocol error.

use super::RelayError;
use std::fmt;
use std::net::Ipv4Addr;

const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;

/// Relay destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address and port
    Ipv4(Ipv4Addr, u16),
    /// Domain name and port
    Domain(String, u16),
}

impl Address {
    /// Parse the request header from the front of `buf`
    ///
    /// The parser is incremental: `Ok(None)` means the header is not
    /// complete yet and the caller should read more bytes. On success it
    /// returns the destination plus the number of header bytes consumed;
    /// anything after that offset is payload for the upstream.
    pub fn parse(buf: &[u8]) -> Result<Option<(Address, usize)>, RelayError> {
        let Some(&atyp) = buf.first() else {
            return Ok(None);
        };

        match atyp {
            ATYP_IPV4 => {
                if buf.len() < 7 {
                    return Ok(None);
                }
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Ok(Some((Address::Ipv4(ip, port), 7)))
            }
            ATYP_DOMAIN => {
                let Some(&len) = buf.get(1) else {
                    return Ok(None);
                };
                let len = len as usize;
                if len == 0 {
                    return Err(RelayError::BadHandshake);
                }
                let header_len = 2 + len + 2;
                if buf.len() < header_len {
                    return Ok(None);
                }
                let name = std::str::from_utf8(&buf[2..2 + len])
                    .map_err(|_| RelayError::BadHandshake)?;
                let port = u16::from_be_bytes([buf[2 + len], buf[3 + len]]);
                Ok(Some((Address::Domain(name.to_string(), port), header_len)))
            }
            other => Err(RelayError::UnsupportedAddressType(other)),
        }
    }

    /// Destination port
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) => *port,
            Address::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{ip}:{port}"),
            Address::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}
