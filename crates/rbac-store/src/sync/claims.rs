//! Identity claims consumed by the grouping synchronizer.
//!
//! # Purpose
//! Turns an already-validated claim set into a stable principal ID and the
//! group list the synchronizer treats as ground truth for one request.
//! Token validation itself belongs to the caller.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Claim names used to find the subject and groups in a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMappings {
    pub subject_claim: String,
    pub groups_claim: Option<String>,
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            subject_claim: "sub".to_string(),
            groups_claim: Some("groups".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub principal_id: String,
    pub issuer: String,
    pub subject: String,
    pub groups: Vec<String>,
}

/// Stable principal ID for an issuer/subject pair.
pub fn principal_id(issuer: &str, subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(issuer.as_bytes());
    hasher.update(b"|");
    hasher.update(subject.as_bytes());
    hex::encode(hasher.finalize())
}

impl IdentityClaims {
    pub fn new(issuer: &str, subject: &str, groups: Vec<String>) -> Self {
        Self {
            principal_id: principal_id(issuer, subject),
            issuer: issuer.to_string(),
            subject: subject.to_string(),
            groups,
        }
    }

    /// Claims for a caller that already has its own principal identifier.
    pub fn for_principal(principal_id: impl Into<String>, groups: Vec<String>) -> Self {
        let principal_id = principal_id.into();
        Self {
            issuer: String::new(),
            subject: principal_id.clone(),
            principal_id,
            groups,
        }
    }

    /// Read subject and groups from a decoded claim set.
    ///
    /// Returns `None` when the subject claim is missing or not a string.
    pub fn from_json(issuer: &str, claims: &Value, mappings: &ClaimMappings) -> Option<Self> {
        let subject = claims.get(&mappings.subject_claim)?.as_str()?;
        let groups = extract_groups_claim(claims, mappings.groups_claim.as_deref());
        Some(Self::new(issuer, subject, groups))
    }

    /// Claimed groups without blanks or repeats, in claim order.
    pub fn distinct_groups(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.groups
            .iter()
            .map(|group| group.as_str())
            .filter(|group| !group.is_empty() && seen.insert(*group))
            .collect()
    }
}

fn extract_groups_claim(claims: &Value, name: Option<&str>) -> Vec<String> {
    // Groups may be encoded as either a string or array of strings.
    let Some(name) = name else {
        return Vec::new();
    };
    let Some(value) = claims.get(name) else {
        return Vec::new();
    };
    if let Some(values) = value.as_array() {
        return values
            .iter()
            .filter_map(|item| item.as_str().map(|val| val.to_string()))
            .collect();
    }
    if let Some(value) = value.as_str() {
        return vec![value.to_string()];
    }
    Vec::new()
}
