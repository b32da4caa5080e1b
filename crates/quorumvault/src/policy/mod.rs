//! policy engine
//!
//! a policy binds an identity pattern and a path pattern to a set of
//! permitted actions. evaluation is a union over every matching policy and
//! denies when nothing matches.
//!
//! the policy set is held as an immutable snapshot behind a lock. writers
//! build a new set and swap it in; readers clone the `Arc` and evaluate
//! against that snapshot, so a request never sees a half-applied update and
//! an update never changes a decision already taken.

pub mod pattern;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

pub use pattern::Pattern;

use crate::{Error, Result};

/// operation a caller wants to perform on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    List,
    /// implies every other action
    Super,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Read, Action::Write, Action::List, Action::Super];

    fn bit(self) -> u8 {
        match self {
            Action::Read => 0b0001,
            Action::Write => 0b0010,
            Action::List => 0b0100,
            Action::Super => 0b1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::List => "list",
            Action::Super => "super",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "list" => Ok(Action::List),
            "super" => Ok(Action::Super),
            other => Err(Error::InvalidParameters(format!("unknown action {:?}", other))),
        }
    }
}

/// non-empty set of actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u8);

impl Permissions {
    pub fn new(actions: &[Action]) -> Result<Self> {
        let bits = actions.iter().fold(0u8, |acc, a| acc | a.bit());
        if bits == 0 {
            return Err(Error::InvalidParameters("permissions must not be empty".into()));
        }
        Ok(Self(bits))
    }

    /// whether `action` is granted, `super` granting everything
    pub fn grants(&self, action: Action) -> bool {
        self.0 & Action::Super.bit() != 0 || self.0 & action.bit() != 0
    }

    pub fn actions(&self) -> Vec<Action> {
        Action::ALL
            .iter()
            .copied()
            .filter(|a| self.0 & a.bit() != 0)
            .collect()
    }
}

/// declarative policy document, as applied by operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    #[serde(alias = "identity")]
    pub identity_pattern: String,
    #[serde(alias = "path")]
    pub path_pattern: String,
    pub permissions: Vec<Action>,
}

impl PolicyDocument {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// load a document, picking the format from the file extension
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_json(&contents),
        }
    }
}

/// compiled policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyDocument", into = "PolicyDocument")]
pub struct Policy {
    name: String,
    identity_pattern: Pattern,
    path_pattern: Pattern,
    permissions: Permissions,
}

impl Policy {
    pub fn new(
        name: impl Into<String>,
        identity_pattern: &str,
        path_pattern: &str,
        actions: &[Action],
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidParameters("policy name must not be empty".into()));
        }
        Ok(Self {
            name,
            identity_pattern: Pattern::compile(identity_pattern)?,
            path_pattern: Pattern::compile(path_pattern)?,
            permissions: Permissions::new(actions)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity_pattern(&self) -> &Pattern {
        &self.identity_pattern
    }

    pub fn path_pattern(&self) -> &Pattern {
        &self.path_pattern
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn matches(&self, identity: &str, path: &str) -> bool {
        self.identity_pattern.matches(identity) && self.path_pattern.matches(path)
    }

    pub fn grants(&self, identity: &str, path: &str, action: Action) -> bool {
        self.permissions.grants(action) && self.matches(identity, path)
    }
}

impl TryFrom<PolicyDocument> for Policy {
    type Error = Error;

    fn try_from(doc: PolicyDocument) -> Result<Self> {
        Policy::new(doc.name, &doc.identity_pattern, &doc.path_pattern, &doc.permissions)
    }
}

impl From<Policy> for PolicyDocument {
    fn from(p: Policy) -> Self {
        PolicyDocument {
            permissions: p.permissions.actions(),
            identity_pattern: p.identity_pattern.into(),
            path_pattern: p.path_pattern.into(),
            name: p.name,
        }
    }
}

/// outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allow: bool,
    /// first granting policy, by name
    pub matched_policy: Option<String>,
}

impl AccessDecision {
    pub fn deny() -> Self {
        Self {
            allow: false,
            matched_policy: None,
        }
    }
}

/// immutable set of policies keyed by name
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: BTreeMap<String, Policy>,
}

impl PolicySet {
    pub fn evaluate(&self, identity: &str, path: &str, action: Action) -> AccessDecision {
        self.policies
            .values()
            .find(|p| p.grants(identity, path, action))
            .map(|p| AccessDecision {
                allow: true,
                matched_policy: Some(p.name.clone()),
            })
            .unwrap_or_else(AccessDecision::deny)
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }
}

/// concurrent policy engine
#[derive(Default)]
pub struct PolicyEngine {
    current: RwLock<Arc<PolicySet>>,
    /// serializes writers so check-then-swap is atomic
    write: Mutex<()>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policies(policies: impl IntoIterator<Item = Policy>) -> Result<Self> {
        let engine = Self::new();
        for p in policies {
            engine.upsert(p, false)?;
        }
        Ok(engine)
    }

    /// current snapshot; stays valid after later updates
    pub fn snapshot(&self) -> Arc<PolicySet> {
        self.current.read().clone()
    }

    pub fn evaluate(&self, identity: &str, path: &str, action: Action) -> AccessDecision {
        self.snapshot().evaluate(identity, path, action)
    }

    pub fn upsert(&self, policy: Policy, replace: bool) -> Result<()> {
        self.upsert_with(policy, replace, |_| Ok(()))
    }

    /// insert or replace, running `persist` before the new set becomes
    /// visible; a failing `persist` leaves the set unchanged
    pub fn upsert_with<F>(&self, policy: Policy, replace: bool, persist: F) -> Result<()>
    where
        F: FnOnce(&Policy) -> Result<()>,
    {
        let _guard = self.write.lock();
        let current = self.snapshot();

        if !replace && current.policies.contains_key(&policy.name) {
            return Err(Error::DuplicateName(policy.name));
        }
        persist(&policy)?;

        let mut next = (*current).clone();
        next.policies.insert(policy.name.clone(), policy);
        *self.current.write() = Arc::new(next);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<Policy> {
        self.remove_with(name, |_| Ok(()))
    }

    pub fn remove_with<F>(&self, name: &str, persist: F) -> Result<Policy>
    where
        F: FnOnce(&str) -> Result<()>,
    {
        let _guard = self.write.lock();
        let current = self.snapshot();

        if !current.policies.contains_key(name) {
            return Err(Error::NotFound(format!("policy {}", name)));
        }
        persist(name)?;

        let mut next = (*current).clone();
        let removed = next.policies.remove(name);
        *self.current.write() = Arc::new(next);
        removed.ok_or_else(|| Error::NotFound(format!("policy {}", name)))
    }

    pub fn list(&self) -> Vec<Policy> {
        self.snapshot().iter().cloned().collect()
    }
}
