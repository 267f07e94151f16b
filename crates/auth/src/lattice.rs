//! Declarative permission implication table.
//!
//! Resolution never inspects key strings; it walks these tables to produce an
//! ordered list of grants that would satisfy a requirement.

use serde::Serialize;

use crate::permissions::{Action, PermissionKey};

/// Verbs that take part in the `admin ⇒ write ⇒ read` chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    pub fn of(action: &Action) -> Option<Self> {
        match action {
            Action::Read => Some(Self::Read),
            Action::Write => Some(Self::Write),
            Action::Admin => Some(Self::Admin),
            Action::Other(_) => None,
        }
    }

    pub fn action(self) -> Action {
        match self {
            Self::Read => Action::Read,
            Self::Write => Action::Write,
            Self::Admin => Action::Admin,
        }
    }
}

/// A grant at any of `implied_by` (same resource) also satisfies `level`.
/// Listed in the order they are tried.
#[derive(Debug, Clone, Copy)]
pub struct ImplicationRule {
    pub level: AccessLevel,
    pub implied_by: &'static [AccessLevel],
}

/// A set of resources administered together under one umbrella grant.
#[derive(Debug, Clone, Copy)]
pub struct BusinessDomain {
    pub name: &'static str,
    /// Resource whose `admin` grant covers every member.
    pub umbrella: &'static str,
    pub members: &'static [&'static str],
}

pub const IMPLICATIONS: &[ImplicationRule] = &[
    ImplicationRule {
        level: AccessLevel::Read,
        implied_by: &[AccessLevel::Write, AccessLevel::Admin],
    },
    ImplicationRule {
        level: AccessLevel::Write,
        implied_by: &[AccessLevel::Admin],
    },
];

pub const BUSINESS_DOMAINS: &[BusinessDomain] = &[BusinessDomain {
    name: "accounting",
    umbrella: "accounting",
    members: &["accounting", "billing", "freee", "invoice", "expense_report"],
}];

/// How a candidate grant relates to the required key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrantPath {
    Exact,
    Implied { level: AccessLevel },
    DomainUmbrella { domain: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: PermissionKey,
    pub path: GrantPath,
}

#[derive(Debug, Clone, Copy)]
pub struct PermissionLattice {
    implications: &'static [ImplicationRule],
    domains: &'static [BusinessDomain],
}

impl Default for PermissionLattice {
    fn default() -> Self {
        Self::standard()
    }
}

impl PermissionLattice {
    pub const fn standard() -> Self {
        Self::new(IMPLICATIONS, BUSINESS_DOMAINS)
    }

    pub const fn new(
        implications: &'static [ImplicationRule],
        domains: &'static [BusinessDomain],
    ) -> Self {
        Self {
            implications,
            domains,
        }
    }

    pub fn domain_of(&self, resource: &str) -> Option<&'static BusinessDomain> {
        self
            .domains
            .iter()
            .find(|d| d.members.iter().any(|m| *m == resource))
    }

    /// Grants that satisfy `required`, exact match first, duplicates removed.
    pub fn candidates(&self, required: &PermissionKey) -> Vec<Candidate> {
        let mut out = vec![Candidate {
            key: required.clone(),
            path: GrantPath::Exact,
        }];

        if let Some(level) = AccessLevel::of(required.action()) {
            let stronger = self
                .implications
                .iter()
                .filter(|rule| rule.level == level)
                .flat_map(|rule| rule.implied_by.iter().copied());
            for implied in stronger {
                push_unique(
                    &mut out,
                    Candidate {
                        key: required.with_action(implied.action()),
                        path: GrantPath::Implied { level: implied },
                    },
                );
            }
        }

        if let Some(domain) = self.domain_of(required.resource()) {
            push_unique(
                &mut out,
                Candidate {
                    key: PermissionKey::new(domain.umbrella, Action::Admin),
                    path: GrantPath::DomainUmbrella {
                        domain: domain.name,
                    },
                },
            );
        }

        out
    }
}

fn push_unique(out: &mut Vec<Candidate>, candidate: Candidate) {
    if !out.iter().any(|c| c.key == candidate.key) {
        out.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(required: &str) -> Vec<String> {
        PermissionLattice::standard()
            .candidates(&required.parse().unwrap())
            .into_iter()
            .map(|c| c.key.to_string())
            .collect()
    }

    #[test]
    fn read_is_implied_by_write_then_admin() {
        assert_eq!(keys("leave:read"), vec!["leave:read", "leave:write", "leave:admin"]);
    }

    #[test]
    fn write_is_implied_by_admin_only() {
        assert_eq!(keys("leave:write"), vec!["leave:write", "leave:admin"]);
    }

    #[test]
    fn admin_is_only_exact_outside_domains() {
        assert_eq!(keys("leave:admin"), vec!["leave:admin"]);
    }

    #[test]
    fn domain_members_fall_back_to_the_umbrella() {
        assert_eq!(
            keys("billing:read"),
            vec!["billing:read", "billing:write", "billing:admin", "accounting:admin"]
        );
        assert_eq!(keys("freee:approve"), vec!["freee:approve", "accounting:admin"]);
    }

    #[test]
    fn umbrella_is_not_duplicated_for_its_own_resource() {
        assert_eq!(
            keys("accounting:read"),
            vec!["accounting:read", "accounting:write", "accounting:admin"]
        );
    }

    #[test]
    fn umbrella_path_names_the_domain() {
        let lattice = PermissionLattice::standard();
        let last = lattice
            .candidates(&"invoice:write".parse().unwrap())
            .pop()
            .unwrap();
        assert_eq!(last.path, GrantPath::DomainUmbrella { domain: "accounting" });
    }
}
