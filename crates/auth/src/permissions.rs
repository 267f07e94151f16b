use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crewdesk_core::DomainError;

use crate::roles::Role;

/// Verb half of a permission key.
///
/// `read`, `write` and `admin` participate in the implication lattice; any
/// other verb (`approve`, `export`, ...) only matches exactly or through a
/// business-domain umbrella.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Write,
    Admin,
    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
            Self::Other(verb) => verb,
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "read" => Self::Read,
            "write" => Self::Write,
            "admin" => Self::Admin,
            other => Self::Other(other.to_string()),
        }
    }
}

/// `resource:action`, e.g. `expense_report:write`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionKey {
    resource: String,
    action: Action,
}

impl PermissionKey {
    pub fn new(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    /// Same resource, different verb.
    pub fn with_action(&self, action: Action) -> Self {
        Self::new(self.resource.clone(), action)
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action.as_str())
    }
}

impl FromStr for PermissionKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| DomainError::validation(format!("permission '{s}' is not resource:action")))?;
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        };
        if !valid(resource) || !valid(action) {
            return Err(DomainError::validation(format!(
                "permission '{s}' must be lowercase [a-z0-9_]+:[a-z0-9_]+"
            )));
        }
        Ok(Self::new(resource, Action::parse(action)))
    }
}

impl TryFrom<String> for PermissionKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PermissionKey> for String {
    fn from(value: PermissionKey) -> Self {
        value.to_string()
    }
}

/// Reach of a grant: everything, the holder's team, or only records they own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    All,
    Team,
    Owned,
}

impl Scope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Team => "team",
            Self::Owned => "owned",
        }
    }

    const fn breadth(self) -> u8 {
        match self {
            Self::All => 3,
            Self::Team => 2,
            Self::Owned => 1,
        }
    }

    /// The more restrictive of two scopes.
    pub fn narrowest(self, other: Scope) -> Scope {
        if other.breadth() < self.breadth() { other } else { self }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(Self::All),
            "team" => Ok(Self::Team),
            "owned" => Ok(Self::Owned),
            other => Err(DomainError::unknown("scope", other)),
        }
    }
}

/// One row of the role → permission table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub role: Role,
    pub key: PermissionKey,
    pub scope: Scope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let key: PermissionKey = "expense_report:write".parse().unwrap();
        assert_eq!(key.resource(), "expense_report");
        assert_eq!(key.action(), &Action::Write);
        assert_eq!(key.to_string(), "expense_report:write");

        let custom: PermissionKey = "leave:approve".parse().unwrap();
        assert_eq!(custom.action(), &Action::Other("approve".into()));
    }

    #[test]
    fn rejects_malformed_keys() {
        for bad in ["billing", ":read", "billing:", "Billing:read", "billing:read:extra", "a b:read"] {
            assert!(bad.parse::<PermissionKey>().is_err(), "{bad}");
        }
    }

    #[test]
    fn serde_is_the_string_form() {
        let key: PermissionKey = serde_json::from_str("\"billing:read\"").unwrap();
        assert_eq!(key, PermissionKey::new("billing", Action::Read));
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"billing:read\"");
        assert!(serde_json::from_str::<PermissionKey>("\"nope\"").is_err());
    }

    #[test]
    fn narrowest_scope_wins() {
        assert_eq!(Scope::All.narrowest(Scope::Team), Scope::Team);
        assert_eq!(Scope::Owned.narrowest(Scope::All), Scope::Owned);
        assert_eq!(Scope::Team.narrowest(Scope::Team), Scope::Team);
    }

    #[test]
    fn scope_parses_wire_names() {
        assert_eq!("owned".parse::<Scope>().unwrap(), Scope::Owned);
        assert!("everything".parse::<Scope>().is_err());
    }
}
