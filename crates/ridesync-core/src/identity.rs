//! Principals, roles and capability checks.
//!
//! Role membership decides both which rides a principal can see and which
//! mutations it may issue. Roles change only out of band.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::db::StoreError;
use crate::model::{RideRequest, UnknownVariant, UserId};

/// Fixed set of application roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Rider,
    Driver,
    Employer,
    Employee,
    Admin,
}

impl Role {
    pub const ALL: [Self; 5] = [
        Self::Rider,
        Self::Driver,
        Self::Employer,
        Self::Employee,
        Self::Admin,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rider => "rider",
            Self::Driver => "driver",
            Self::Employer => "employer",
            Self::Employee => "employee",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "role",
                value: s.to_string(),
            })
    }
}

/// Ordered set of roles held by a principal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn contains_any(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.0.contains(r))
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Role::as_str).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Roles whose holders see every ride request.
const FLEET_ROLES: [Role; 3] = [Role::Driver, Role::Employer, Role::Admin];
/// Roles allowed to read the activity log.
const AUDIT_ROLES: [Role; 2] = [Role::Employer, Role::Admin];
/// Roles that create ride requests.
const REQUESTER_ROLES: [Role; 2] = [Role::Rider, Role::Employee];

/// The signed-in user and its roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub roles: RoleSet,
}

impl Principal {
    pub fn new(id: impl Into<UserId>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    pub fn sees_all_rides(&self) -> bool {
        self.roles.contains_any(&FLEET_ROLES)
    }

    pub fn can_view_activity(&self) -> bool {
        self.roles.contains_any(&AUDIT_ROLES)
    }

    pub fn can_accept_rides(&self) -> bool {
        self.has_role(Role::Driver)
    }

    pub fn can_request_rides(&self) -> bool {
        self.roles.contains_any(&REQUESTER_ROLES)
    }

    /// Visibility scope rule: fleet roles see everything, everyone else only
    /// the rides they requested.
    pub fn can_see_ride(&self, ride: &RideRequest) -> bool {
        self.sees_all_rides() || ride.rider_id == self.id
    }
}

/// Session source of the identity provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The user bound to the current session, if any.
    async fn current_session(&self) -> Result<Option<UserId>, StoreError>;

    /// Fires on every sign-in and sign-out.
    fn session_changes(&self) -> watch::Receiver<Option<UserId>>;
}

/// Role table lookup.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn roles_for(&self, user: &UserId) -> Result<RoleSet, StoreError>;
}
