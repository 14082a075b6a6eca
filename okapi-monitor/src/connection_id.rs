//! Connection identities reported by the capture layer.

use std::{fmt, net::SocketAddr};

/// The identity of one observed TCP connection.
///
/// The capture layer names each connection with a `"local=>remote"` string,
/// where both halves are socket addresses. Capture backends occasionally
/// report traffic they cannot attribute to a connection; such identities
/// degrade to [`ConnectionId::Unknown`] instead of failing, and all
/// unattributable traffic shares that one identity (and therefore one
/// monitor).
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ConnectionId {
    /// A fully attributed connection.
    Known {
        /// The local, client-side endpoint.
        local: SocketAddr,
        /// The remote, server-side endpoint.
        remote: SocketAddr,
    },
    /// A connection the capture layer could not attribute.
    Unknown,
}

impl ConnectionId {
    /// Parses a capture-layer identity string.
    ///
    /// Never fails: anything other than `"local=>remote"` with two valid
    /// socket addresses is [`ConnectionId::Unknown`].
    pub fn parse(identity: &str) -> Self {
        let Some((local, remote)) = identity.split_once("=>") else {
            return ConnectionId::Unknown;
        };

        match (local.parse(), remote.parse()) {
            (Ok(local), Ok(remote)) => ConnectionId::Known { local, remote },
            _ => ConnectionId::Unknown,
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionId::Known { local, remote } => write!(f, "{local}=>{remote}"),
            ConnectionId::Unknown => f.write_str("unknown"),
        }
    }
}
