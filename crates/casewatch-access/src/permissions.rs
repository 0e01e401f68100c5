use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use casewatch_core::{read_json_file, write_json_atomic};
use casewatch_records::CaseType;
use serde::{Deserialize, Serialize};

const PERMISSION_POLICY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct PermissionPolicyFile {
    schema_version: u32,
    #[serde(default)]
    ban_roles: Vec<String>,
    #[serde(default)]
    suspect_roles: Vec<String>,
    #[serde(default)]
    admin_users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Which roles and users may file which case types.
///
/// Every ban role is also a suspect role once the policy is built.
pub struct PermissionPolicy {
    ban_roles: BTreeSet<String>,
    suspect_roles: BTreeSet<String>,
    admin_users: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// The chat user asking for something, with the role ids they hold.
pub struct Actor {
    pub user_id: String,
    pub role_ids: Vec<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role_ids: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role_ids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    pub can_file_suspect: bool,
    pub can_file_ban: bool,
    pub is_admin: bool,
}

impl CapabilitySet {
    pub fn allows(&self, case_type: CaseType) -> bool {
        match case_type {
            CaseType::Suspect => self.can_file_suspect,
            CaseType::Banned => self.can_file_ban,
        }
    }

    pub fn can_file_any(&self) -> bool {
        self.can_file_suspect || self.can_file_ban
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow { reason_code: String },
    Deny { reason_code: String },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    pub fn reason_code(&self) -> &str {
        match self {
            Self::Allow { reason_code } | Self::Deny { reason_code } => reason_code,
        }
    }
}

impl PermissionPolicy {
    pub fn new<I, J, K>(ban_roles: I, suspect_roles: J, admin_users: K) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
        K: IntoIterator<Item = String>,
    {
        let mut policy = Self {
            ban_roles: normalize_ids(ban_roles),
            suspect_roles: normalize_ids(suspect_roles),
            admin_users: normalize_ids(admin_users),
        };
        policy.widen_suspect_roles();
        policy
    }

    /// Loads the policy file; a missing file yields a policy that grants nothing to non-admins.
    pub fn load(path: &Path) -> Result<Self> {
        let Some(file) = read_json_file::<PermissionPolicyFile>(path)? else {
            tracing::warn!(
                path = %path.display(),
                "permission policy file not found; only an empty policy is active"
            );
            return Ok(Self::default());
        };
        if file.schema_version != PERMISSION_POLICY_SCHEMA_VERSION {
            bail!(
                "unsupported permission policy schema: expected {}, found {}",
                PERMISSION_POLICY_SCHEMA_VERSION,
                file.schema_version
            );
        }
        Ok(Self::new(file.ban_roles, file.suspect_roles, file.admin_users))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = PermissionPolicyFile {
            schema_version: PERMISSION_POLICY_SCHEMA_VERSION,
            ban_roles: self.ban_roles.iter().cloned().collect(),
            suspect_roles: self.suspect_roles.iter().cloned().collect(),
            admin_users: self.admin_users.iter().cloned().collect(),
        };
        write_json_atomic(path, &file)
    }

    fn widen_suspect_roles(&mut self) {
        for role in &self.ban_roles {
            if self.suspect_roles.insert(role.clone()) {
                tracing::warn!(
                    role_id = %role,
                    "ban role was missing from suspect roles; granting suspect filing too"
                );
            }
        }
    }

    pub fn ban_roles(&self) -> impl Iterator<Item = &str> {
        self.ban_roles.iter().map(String::as_str)
    }

    pub fn suspect_roles(&self) -> impl Iterator<Item = &str> {
        self.suspect_roles.iter().map(String::as_str)
    }

    pub fn admin_users(&self) -> impl Iterator<Item = &str> {
        self.admin_users.iter().map(String::as_str)
    }

    /// Admin users hold every capability regardless of roles.
    pub fn resolve(&self, actor: &Actor) -> CapabilitySet {
        if self.is_admin(&actor.user_id) {
            return CapabilitySet {
                can_file_suspect: true,
                can_file_ban: true,
                is_admin: true,
            };
        }
        let holds_any = |roles: &BTreeSet<String>| {
            actor
                .role_ids
                .iter()
                .any(|role| roles.contains(role.trim()))
        };
        CapabilitySet {
            can_file_suspect: holds_any(&self.suspect_roles),
            can_file_ban: holds_any(&self.ban_roles),
            is_admin: false,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_users.contains(user_id.trim())
    }

    pub fn authorize_case_type(&self, actor: &Actor, case_type: CaseType) -> AccessDecision {
        const ALLOW_ADMIN: &str = "allow_admin";
        const ALLOW_ROLE: &str = "allow_role";
        const DENY_ACTOR_ID_MISSING: &str = "deny_actor_id_missing";
        const DENY_MISSING_ROLE: &str = "deny_missing_role";

        if actor.user_id.trim().is_empty() {
            return AccessDecision::Deny {
                reason_code: DENY_ACTOR_ID_MISSING.to_string(),
            };
        }
        let capabilities = self.resolve(actor);
        if capabilities.is_admin {
            return AccessDecision::Allow {
                reason_code: ALLOW_ADMIN.to_string(),
            };
        }
        if capabilities.allows(case_type) {
            return AccessDecision::Allow {
                reason_code: ALLOW_ROLE.to_string(),
            };
        }
        AccessDecision::Deny {
            reason_code: DENY_MISSING_ROLE.to_string(),
        }
    }
}

fn normalize_ids<I>(ids: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Default location of the policy file under the bot state directory.
pub fn permission_policy_path_for_state_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("permissions.json")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn sample_policy() -> PermissionPolicy {
        PermissionPolicy::new(ids(&["mod-lead"]), ids(&["mod"]), ids(&["owner"]))
    }

    #[test]
    fn unit_ban_roles_are_widened_into_suspect_roles() {
        let policy = sample_policy();
        let suspect_roles = policy.suspect_roles().collect::<Vec<_>>();
        assert_eq!(suspect_roles, vec!["mod", "mod-lead"]);
    }

    #[test]
    fn functional_resolve_grants_by_role_and_admin_override() {
        let policy = sample_policy();

        let lead = policy.resolve(&Actor::new("u1", ids(&["mod-lead"])));
        assert!(lead.can_file_ban && lead.can_file_suspect && !lead.is_admin);

        let moderator = policy.resolve(&Actor::new("u2", ids(&["mod", "member"])));
        assert!(moderator.can_file_suspect);
        assert!(!moderator.can_file_ban);
        assert!(moderator.allows(CaseType::Suspect));
        assert!(!moderator.allows(CaseType::Banned));

        let outsider = policy.resolve(&Actor::new("u3", ids(&["member"])));
        assert!(!outsider.can_file_any());

        let owner = policy.resolve(&Actor::new("owner", Vec::new()));
        assert_eq!(
            owner,
            CapabilitySet {
                can_file_suspect: true,
                can_file_ban: true,
                is_admin: true,
            }
        );
    }

    #[test]
    fn functional_authorize_case_type_reports_reason_codes() {
        let policy = sample_policy();
        let moderator = Actor::new("u2", ids(&["mod"]));
        assert_eq!(
            policy
                .authorize_case_type(&moderator, CaseType::Banned)
                .reason_code(),
            "deny_missing_role"
        );
        assert!(policy
            .authorize_case_type(&moderator, CaseType::Suspect)
            .is_allowed());
        assert_eq!(
            policy
                .authorize_case_type(&Actor::new("owner", Vec::new()), CaseType::Banned)
                .reason_code(),
            "allow_admin"
        );
        assert_eq!(
            policy
                .authorize_case_type(&Actor::new(" ", ids(&["mod"])), CaseType::Suspect)
                .reason_code(),
            "deny_actor_id_missing"
        );
    }

    #[test]
    fn functional_load_round_trips_and_tolerates_missing_file() {
        let temp = tempdir().expect("tempdir");
        let path = permission_policy_path_for_state_dir(temp.path());
        let missing = PermissionPolicy::load(&path).expect("missing file");
        assert_eq!(missing, PermissionPolicy::default());

        sample_policy().save(&path).expect("save");
        let loaded = PermissionPolicy::load(&path).expect("load");
        assert_eq!(loaded, sample_policy());
        assert!(loaded.is_admin("owner"));
    }

    #[test]
    fn regression_load_trims_ids_and_rejects_unknown_schema() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("permissions.json");
        std::fs::write(
            &path,
            r#"{"schema_version":1,"ban_roles":[" 42 ",""],"admin_users":["7"]}"#,
        )
        .expect("write");
        let policy = PermissionPolicy::load(&path).expect("load");
        assert_eq!(policy.ban_roles().collect::<Vec<_>>(), vec!["42"]);
        assert_eq!(policy.suspect_roles().collect::<Vec<_>>(), vec!["42"]);

        std::fs::write(&path, r#"{"schema_version":2}"#).expect("write");
        let error = PermissionPolicy::load(&path).expect_err("schema mismatch");
        assert!(error
            .to_string()
            .contains("unsupported permission policy schema"));
    }
}
