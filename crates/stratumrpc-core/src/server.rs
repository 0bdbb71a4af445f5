//! Server selection: host name plus the ports it offers per protocol.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SessionError;

/// Transport protocol letter as used in Electrum server lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// `t`: plain TCP.
    Tcp,
    /// `s`: TCP wrapped in TLS.
    Ssl,
}

impl Protocol {
    pub fn letter(self) -> char {
        match self {
            Self::Tcp => 't',
            Self::Ssl => 's',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            't' => Some(Self::Tcp),
            's' => Some(Self::Ssl),
            _ => None,
        }
    }

    /// Port used when the server list names the protocol without a number.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Tcp => 50001,
            Self::Ssl => 50002,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Options for the transport handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityOptions {
    /// Route the connection through a local Tor SOCKS proxy.
    pub use_tor: bool,
    /// Accept any certificate on `s` connections.
    pub disable_cert_verify: bool,
}

/// A server we may connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub nickname: String,
    pub hostname: String,
    ports: BTreeMap<Protocol, u16>,
}

impl ServerInfo {
    /// Build from a ports description such as `"t"`, `"t50001"` or `"t50001 s50002"`.
    pub fn new(
        nickname: impl Into<String>,
        hostname: impl Into<String>,
        ports: &str,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            nickname: nickname.into(),
            hostname: hostname.into(),
            ports: parse_ports(ports)?,
        })
    }

    /// Set (or override) the port for `protocol`.
    pub fn with_port(mut self, protocol: Protocol, port: u16) -> Self {
        self.ports.insert(protocol, port);
        self
    }

    pub fn port(&self, protocol: Protocol) -> Option<u16> {
        self.ports.get(&protocol).copied()
    }

    pub fn protocols(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.ports.keys().copied()
    }

    /// `(host, port)` for `protocol`, or a [`SessionError::Connection`] if not offered.
    pub fn endpoint(&self, protocol: Protocol) -> Result<(&str, u16), SessionError> {
        let port = self.port(protocol).ok_or_else(|| {
            SessionError::Connection(format!(
                "{} does not offer protocol '{protocol}'",
                self.hostname
            ))
        })?;
        Ok((self.hostname.as_str(), port))
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hostname)?;
        if self.nickname != self.hostname {
            write!(f, " ({})", self.nickname)?;
        }
        let ports: Vec<String> = self.ports.iter().map(|(p, n)| format!("{p}{n}")).collect();
        write!(f, " [{}]", ports.join(" "))
    }
}

fn parse_ports(ports: &str) -> Result<BTreeMap<Protocol, u16>, SessionError> {
    let mut parsed = BTreeMap::new();
    for token in ports.split(|c: char| c == ',' || c.is_whitespace()) {
        let mut chars = token.chars();
        let Some(letter) = chars.next() else {
            continue;
        };
        let protocol = Protocol::from_letter(letter).ok_or_else(|| {
            SessionError::Connection(format!("unknown protocol letter in {token:?}"))
        })?;
        let rest = chars.as_str();
        let port = if rest.is_empty() {
            protocol.default_port()
        } else {
            u16::from_str(rest)
                .map_err(|e| SessionError::Connection(format!("bad port in {token:?}: {e}")))?
        };
        parsed.insert(protocol, port);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_with_explicit_port() {
        let svr = ServerInfo::new("e1", "electrum.example.org", "t50011").unwrap();
        assert_eq!(svr.endpoint(Protocol::Tcp).unwrap(), ("electrum.example.org", 50011));
        assert!(svr.port(Protocol::Ssl).is_none());
    }

    #[test]
    fn bare_letters_use_default_ports() {
        let svr = ServerInfo::new("h", "h", "t s").unwrap();
        assert_eq!(svr.port(Protocol::Tcp), Some(50001));
        assert_eq!(svr.port(Protocol::Ssl), Some(50002));
        assert_eq!(svr.protocols().count(), 2);
    }

    #[test]
    fn override_port() {
        let svr = ServerInfo::new("h", "h", "t").unwrap().with_port(Protocol::Tcp, 60001);
        assert_eq!(svr.port(Protocol::Tcp), Some(60001));
    }

    #[test]
    fn missing_protocol_is_connection_error() {
        let svr = ServerInfo::new("h", "h", "s").unwrap();
        let err = svr.endpoint(Protocol::Tcp).unwrap_err();
        assert!(matches!(err, SessionError::Connection(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(ServerInfo::new("h", "h", "x50001").is_err());
        assert!(ServerInfo::new("h", "h", "t99999").is_err());
    }

    #[test]
    fn display() {
        let svr = ServerInfo::new("h", "h", "t50001").unwrap();
        assert_eq!(svr.to_string(), "h [t50001]");
    }
}
