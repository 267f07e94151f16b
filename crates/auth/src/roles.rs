use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crewdesk_core::DomainError;

/// Organisational role, totally ordered by privilege.
///
/// Comparisons go through [`Role::satisfies_at_least`]; the ranking itself is
/// private so call sites cannot compare raw numbers or strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Manager,
    Engineer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::Admin, Role::Manager, Role::Engineer];

    const fn rank(self) -> u8 {
        match self {
            Self::SuperAdmin => 4,
            Self::Admin => 3,
            Self::Manager => 2,
            Self::Engineer => 1,
        }
    }

    /// `true` when `self` is at least as privileged as `required`.
    pub const fn satisfies_at_least(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    /// Administrative roles bypass permission grants entirely.
    pub const fn is_administrative(self) -> bool {
        self.satisfies_at_least(Role::Admin)
    }

    /// Persisted numeric code.
    pub const fn code(self) -> i16 {
        match self {
            Self::SuperAdmin => 1,
            Self::Admin => 2,
            Self::Manager => 3,
            Self::Engineer => 4,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .ok_or_else(|| DomainError::unknown("role code", code.to_string()))
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Engineer => "engineer",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts either the wire name or the numeric code.
impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i16>() {
            return Self::from_code(code);
        }
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::unknown("role", s))
    }
}
