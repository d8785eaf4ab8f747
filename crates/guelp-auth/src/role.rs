//! Role-based destination resolution.

use crate::model::UserIdentity;
use guelp_config::RoleMatchMode;
use serde::{Deserialize, Serialize};
use tracing::warn;

const ADMIN_PERMISSIONS: &[&str] = &["manage_users", "manage_roles", "manage_permissions"];
const TEACHER_PERMISSIONS: &[&str] = &["manage_qualifications", "view_teachers"];

/// Application area a signed-in user lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Student,
    Teacher,
    Admin,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Student => "student",
            Destination::Teacher => "teacher",
            Destination::Admin => "admin",
        }
    }

    /// Route root for this area, e.g. `/teacher`.
    pub fn path(&self) -> String {
        format!("/{}", self.as_str())
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Tier {
    destination: Destination,
    permissions: &'static [&'static str],
    role: &'static str,
}

const TIERS: [Tier; 2] = [
    Tier {
        destination: Destination::Admin,
        permissions: ADMIN_PERMISSIONS,
        role: "admin",
    },
    Tier {
        destination: Destination::Teacher,
        permissions: TEACHER_PERMISSIONS,
        role: "teacher",
    },
];

/// Maps roles and permissions to exactly one destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleResolver {
    mode: RoleMatchMode,
}

impl RoleResolver {
    pub fn new(mode: RoleMatchMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> RoleMatchMode {
        self.mode
    }

    /// `None` without an identity; otherwise admin, then teacher, then student.
    pub fn resolve(&self, identity: Option<&UserIdentity>) -> Option<Destination> {
        let identity = identity?;

        let roles = normalize(identity.roles.iter());
        let permissions = normalize(identity.permissions.iter());

        for tier in &TIERS {
            let exact = permissions.iter().any(|p| tier.permissions.contains(&p.as_str()))
                || roles.iter().any(|r| r == tier.role);
            if exact {
                return Some(tier.destination);
            }

            if self.mode == RoleMatchMode::SubstringCompatible {
                if let Some(matched) = substring_match(tier, &roles, &permissions) {
                    warn!(
                        user_id = %identity.id,
                        matched = %matched,
                        destination = %tier.destination,
                        "destination chosen by substring match"
                    );
                    return Some(tier.destination);
                }
            }
        }

        Some(Destination::Student)
    }
}

fn normalize<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    values
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn substring_match<'a>(
    tier: &Tier,
    roles: &'a [String],
    permissions: &'a [String],
) -> Option<&'a str> {
    permissions
        .iter()
        .find(|p| tier.permissions.iter().any(|needle| p.contains(needle)))
        .or_else(|| roles.iter().find(|r| r.contains(tier.role)))
        .map(String::as_str)
}
