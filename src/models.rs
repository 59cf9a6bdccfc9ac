//! Connection routing records.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which Microsoft 365 workload a connection targets.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    SharePoint,
    OneDrive,
    Teams,
    Exchange,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharePoint => write!(f, "sharepoint"),
            Self::OneDrive => write!(f, "onedrive"),
            Self::Teams => write!(f, "teams"),
            Self::Exchange => write!(f, "exchange"),
        }
    }
}

impl FromStr for ConnectionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "sharepoint" => Ok(Self::SharePoint),
            "onedrive" => Ok(Self::OneDrive),
            "teams" | "msteams" => Ok(Self::Teams),
            "exchange" => Ok(Self::Exchange),
            _ => Err(format!("Unknown connection type: {s}")),
        }
    }
}

/// A resolved drive, site or mailbox location.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ConnectionDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub download_completed: bool,
}

impl ConnectionDescriptor {
    /// A descriptor can be used once it has been resolved to an id.
    pub fn is_usable(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_iff_id() {
        assert!(!ConnectionDescriptor::default().is_usable());
        let descriptor = ConnectionDescriptor {
            id: "b!abc".into(),
            ..Default::default()
        };
        assert!(descriptor.is_usable());
    }

    #[test]
    fn test_connection_type_parse() {
        assert_eq!("SharePoint".parse::<ConnectionType>().unwrap(), ConnectionType::SharePoint);
        assert_eq!("one-drive".parse::<ConnectionType>().unwrap(), ConnectionType::OneDrive);
        assert_eq!("MSTeams".parse::<ConnectionType>().unwrap(), ConnectionType::Teams);
        assert_eq!("exchange".parse::<ConnectionType>().unwrap(), ConnectionType::Exchange);
        assert!("dropbox".parse::<ConnectionType>().is_err());
    }

    #[test]
    fn test_descriptor_deserialize_partial() {
        let d: ConnectionDescriptor =
            serde_json::from_str(r#"{"id":"drive-1","name":"Documents"}"#).unwrap();
        assert_eq!(d.name, "Documents");
        assert!(!d.download_completed);
        assert!(d.is_usable());
    }
}
