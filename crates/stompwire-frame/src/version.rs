use std::fmt;
use std::str::FromStr;

/// A STOMP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    /// Version string as used in `accept-version` and `version` headers.
    pub fn as_str(self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// WebSocket subprotocol name, e.g. `v12.stomp`.
    pub fn protocol_name(self) -> &'static str {
        match self {
            Version::V1_0 => "v10.stomp",
            Version::V1_1 => "v11.stomp",
            Version::V1_2 => "v12.stomp",
        }
    }

    /// Heart-beating is defined from 1.1 on.
    pub fn supports_heartbeat(self) -> bool {
        self >= Version::V1_1
    }

    /// Header value escaping is applied from 1.2 on.
    pub fn escapes_header_values(self) -> bool {
        self >= Version::V1_2
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised version string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown STOMP version: {0}")]
pub struct UnknownVersion(pub String);

impl FromStr for Version {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" => Ok(Version::V1_0),
            "1.1" => Ok(Version::V1_1),
            "1.2" => Ok(Version::V1_2),
            other => Err(UnknownVersion(other.to_string())),
        }
    }
}

/// Ordered list of versions offered to the broker, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "Vec<String>", into = "Vec<String>"))]
pub struct Versions(Vec<Version>);

impl Versions {
    pub fn new(versions: impl IntoIterator<Item = Version>) -> Self {
        Self(versions.into_iter().collect())
    }

    /// Comma-joined list for the `accept-version` header.
    pub fn supported_versions(&self) -> String {
        self.0
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// WebSocket subprotocol names in preference order.
    pub fn protocol_versions(&self) -> Vec<&'static str> {
        self.0.iter().map(|v| v.protocol_name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Version> + '_ {
        self.0.iter().copied()
    }
}

impl Default for Versions {
    fn default() -> Self {
        Self(vec![Version::V1_2, Version::V1_1, Version::V1_0])
    }
}

impl TryFrom<Vec<String>> for Versions {
    type Error = UnknownVersion;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        value
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()
            .map(Versions)
    }
}

impl From<Versions> for Vec<String> {
    fn from(value: Versions) -> Self {
        value.0.iter().map(|v| v.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_offers_all_versions_newest_first() {
        let versions = Versions::default();
        assert_eq!(versions.supported_versions(), "1.2,1.1,1.0");
        assert_eq!(
            versions.protocol_versions(),
            ["v12.stomp", "v11.stomp", "v10.stomp"]
        );
    }

    #[test]
    fn parse_and_capabilities() {
        assert_eq!("1.1".parse::<Version>().unwrap(), Version::V1_1);
        assert!("2.0".parse::<Version>().is_err());
        assert!(!Version::V1_0.supports_heartbeat());
        assert!(Version::V1_1.supports_heartbeat());
        assert!(!Version::V1_1.escapes_header_values());
        assert!(Version::V1_2.escapes_header_values());
    }

    #[test]
    fn versions_from_strings() {
        let versions = Versions::try_from(vec!["1.1".to_string(), "1.0".to_string()]).unwrap();
        assert_eq!(versions.supported_versions(), "1.1,1.0");
        assert!(Versions::try_from(vec!["1.3".to_string()]).is_err());
    }
}
