//! Agent addressing
//!
//! Every environment listens on a network endpoint (`host:port`) and every
//! agent inside it is a numbered sub-path of that endpoint:
//!
//! ```text
//! tcp://127.0.0.1:5555/0   <- the environment's manager
//! tcp://127.0.0.1:5555/1   <- first ordinary agent
//! ```
//!
//! Path segment `0` is reserved for the manager and is never returned by
//! ordinary agent enumerations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// URL scheme used for all agent addresses
pub const ADDRESS_SCHEME: &str = "tcp://";

/// Path segment reserved for an environment's manager
pub const MANAGER_ID: u32 = 0;

/// Error returned when an address string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid agent address '{0}'")]
pub struct AddressParseError(pub String);

/// Network-routable identifier of an agent (or manager)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentAddress {
    endpoint: String,
    id: u32,
}

impl AgentAddress {
    /// Create an address for agent `id` living at `endpoint` (`host:port`)
    pub fn new(endpoint: impl Into<String>, id: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            id,
        }
    }

    /// Address of the manager hosted at `endpoint`
    pub fn manager(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, MANAGER_ID)
    }

    /// The `host:port` of the owning environment
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Last path segment, unique within the owning environment
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether this address names an environment manager
    pub fn is_manager(&self) -> bool {
        self.id == MANAGER_ID
    }

    /// Address of the manager of the environment this agent lives in
    pub fn manager_of(&self) -> Self {
        Self::manager(self.endpoint.clone())
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", ADDRESS_SCHEME, self.endpoint, self.id)
    }
}

impl FromStr for AgentAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(ADDRESS_SCHEME).unwrap_or(s);
        let (endpoint, id) = rest
            .rsplit_once('/')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        if endpoint.is_empty() || !endpoint.contains(':') {
            return Err(AddressParseError(s.to_string()));
        }
        let id = id
            .parse::<u32>()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self::new(endpoint, id))
    }
}

impl TryFrom<String> for AgentAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AgentAddress> for String {
    fn from(addr: AgentAddress) -> Self {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: AgentAddress = "tcp://localhost:5555/3".parse().unwrap();
        assert_eq!(addr.endpoint(), "localhost:5555");
        assert_eq!(addr.id(), 3);
        assert_eq!(addr.to_string(), "tcp://localhost:5555/3");
    }

    #[test]
    fn test_scheme_is_optional_on_parse() {
        let addr: AgentAddress = "127.0.0.1:9000/0".parse().unwrap();
        assert!(addr.is_manager());
        assert_eq!(addr, AgentAddress::manager("127.0.0.1:9000"));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("tcp://localhost:5555".parse::<AgentAddress>().is_err());
        assert!("tcp://localhost:5555/x".parse::<AgentAddress>().is_err());
        assert!("tcp:///1".parse::<AgentAddress>().is_err());
    }

    #[test]
    fn test_manager_of() {
        let agent = AgentAddress::new("h:1", 7);
        assert!(!agent.is_manager());
        assert_eq!(agent.manager_of(), AgentAddress::new("h:1", 0));
    }

    #[test]
    fn test_serde_as_string() {
        let addr = AgentAddress::new("h:1", 2);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"tcp://h:1/2\"");
        let back: AgentAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
