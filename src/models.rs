// Domain models: the IP pool entity published downstream.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;

/// An address parsed best-effort from resource text.
///
/// Text that is not a valid IP keeps the pool constructible but is carried as
/// an invalid address, which serializes to `""`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolAddr(Option<IpAddr>);

impl PoolAddr {
    /// Parse an address, yielding an invalid address on malformed text.
    pub fn parse(s: &str) -> Self {
        Self(s.trim().parse().ok())
    }

    /// Sentinel used when an optional field is absent.
    pub fn invalid() -> Self {
        Self(None)
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }
}

impl From<IpAddr> for PoolAddr {
    fn from(ip: IpAddr) -> Self {
        Self(Some(ip))
    }
}

impl fmt::Display for PoolAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ip) => write!(f, "{ip}"),
            None => Ok(()),
        }
    }
}

impl Serialize for PoolAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PoolAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// One address range as sent to the publish endpoint (`{Name, Start, End}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpPool {
    pub name: String,
    pub start: PoolAddr,
    pub end: PoolAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_addr_parses_v4_and_v6() {
        assert_eq!(PoolAddr::parse("10.0.0.1").to_string(), "10.0.0.1");
        assert_eq!(PoolAddr::parse("fd00::1").to_string(), "fd00::1");
    }

    #[test]
    fn pool_addr_invalid_text_is_not_an_error() {
        let addr = PoolAddr::parse("10.0.0.300");
        assert!(!addr.is_valid());
        assert_eq!(addr.to_string(), "");
    }

    #[test]
    fn ip_pool_serializes_with_pascal_case_and_string_addresses() {
        let pool = IpPool {
            name: "pool-a".into(),
            start: PoolAddr::parse("192.168.0.10"),
            end: PoolAddr::invalid(),
        };
        let json = serde_json::to_value(&pool).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "Name": "pool-a", "Start": "192.168.0.10", "End": "" })
        );
    }
}
