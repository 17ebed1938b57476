//! Typed caller roles.
//!
//! A [`Viewer`] is resolved once per session from the authenticated claims and
//! passed explicitly to the visibility rules.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Caller role. Ordered from least to most privileged for claim resolution.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    /// Unrecognized or missing role. Treated like a self-scoped viewer.
    #[default]
    Unknown,
    Student,
    #[strum(to_string = "standard", serialize = "self", serialize = "user")]
    Standard,
    Teacher,
    Admin,
    #[strum(to_string = "super_admin", serialize = "superadmin")]
    SuperAdmin,
}

impl Role {
    /// Parse a single claim value; anything unrecognized is [`Role::Unknown`].
    pub fn from_claim(value: &str) -> Self {
        Self::from_str(value.trim().replace('-', "_").as_str()).unwrap_or(Self::Unknown)
    }

    /// Highest-precedence role among the caller's claims. Used for
    /// privilege checks; broadcast visibility unions every claimed role.
    pub fn resolve<I, S>(claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        claims
            .into_iter()
            .map(|claim| Self::from_claim(claim.as_ref()))
            .max()
            .unwrap_or(Self::Unknown)
    }
}

/// An authenticated caller: identity plus resolved roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewer {
    pub identity: String,
    /// Highest-precedence role.
    pub role: Role,
    /// Every recognized role claim, sorted; never empty.
    #[serde(default)]
    roles: Vec<Role>,
}

impl Viewer {
    pub fn new(identity: impl Into<String>, role: Role) -> Self {
        Self {
            identity: identity.into(),
            role,
            roles: vec![role],
        }
    }

    /// Resolve a viewer from raw role claims.
    pub fn from_claims<I, S>(identity: impl Into<String>, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut roles: Vec<Role> = claims
            .into_iter()
            .map(|claim| Role::from_claim(claim.as_ref()))
            .filter(|role| *role != Role::Unknown)
            .collect();
        roles.sort();
        roles.dedup();

        let role = roles.last().copied().unwrap_or(Role::Unknown);
        if roles.is_empty() {
            roles.push(Role::Unknown);
        }
        Self {
            identity: identity.into(),
            role,
            roles,
        }
    }

    pub fn roles(&self) -> &[Role] {
        if self.roles.is_empty() {
            std::slice::from_ref(&self.role)
        } else {
            &self.roles
        }
    }
}
