use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Logical node locator. Equal across process restarts of the same host:port;
/// reincarnations are told apart by [`crate::unique_address::UniqueAddress`].
#[derive(Debug, Clone, Eq, PartialEq, Hash, Encode, Decode, Serialize, Deserialize)]
pub struct Address {
    pub protocol: String,
    pub system: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Address {
    pub fn new(
        protocol: impl Into<String>,
        system: impl Into<String>,
        host: Option<String>,
        port: Option<u16>,
    ) -> Self {
        let protocol = protocol.into();
        let system = system.into();
        Self {
            protocol,
            system,
            host,
            port,
        }
    }

    /// Sort key used by the member orderings: host first, then port.
    /// Protocol and system never vary within one cluster, so they are not
    /// part of the key.
    pub fn ordering(a: &Address, b: &Address) -> Ordering {
        let a_host = a.host.as_deref().unwrap_or("");
        let b_host = b.host.as_deref().unwrap_or("");
        a_host
            .cmp(b_host)
            .then_with(|| a.port.unwrap_or(0).cmp(&b.port.unwrap_or(0)))
    }

    pub fn host_port(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or(""),
            self.port.unwrap_or(0)
        )
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match (&self.host, &self.port) {
            (Some(host), Some(port)) => {
                write!(f, "{}://{}@{}:{}", self.protocol, self.system, host, port)
            }
            (Some(host), None) => {
                write!(f, "{}://{}@{}", self.protocol, self.system, host)
            }
            _ => {
                write!(f, "{}://{}", self.protocol, self.system)
            }
        }
    }
}
