//! Static group-to-role mapping repository.
//!
//! The synchronizer only reads from it. The YAML form is a map of group to
//! role list:
//!
//! ```yaml
//! engineering: [role:developer]
//! oncall:
//!   - role:operator
//!   - role:reader
//! ```
use crate::errors::MappingError;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

#[async_trait]
pub trait RoleMappingRepository: Send + Sync {
    /// Roles mapped to `group`; empty when the group has no mapping.
    async fn roles_for_group(&self, group: &str) -> Result<Vec<String>, MappingError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticRoleMappings {
    roles: HashMap<String, BTreeSet<String>>,
}

impl StaticRoleMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping<I, S>(mut self, group: &str, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .entry(group.to_string())
            .or_default()
            .extend(
                roles
                    .into_iter()
                    .map(Into::into)
                    .filter(|role: &String| !role.is_empty()),
            );
        self
    }

    pub fn from_yaml(contents: &str) -> Result<Self, MappingError> {
        let raw: HashMap<String, Vec<String>> = serde_yaml::from_str(contents)?;
        let roles = raw
            .into_iter()
            .map(|(group, roles)| {
                let roles = roles.into_iter().filter(|role| !role.is_empty()).collect();
                (group, roles)
            })
            .collect();
        Ok(Self { roles })
    }

    pub fn from_path(path: &Path) -> Result<Self, MappingError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[async_trait]
impl RoleMappingRepository for StaticRoleMappings {
    async fn roles_for_group(&self, group: &str) -> Result<Vec<String>, MappingError> {
        Ok(self
            .roles
            .get(group)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default())
    }
}
