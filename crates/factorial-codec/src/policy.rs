//! Serialization policies: which members of a type get serialized.
//!
//! A policy is an identity string, a flag allowing non-conventional types
//! and a member predicate. Three built-ins cover the common cases:
//!
//! - [`everything`] -- every field and property, ignoring opt-outs. Used by
//!   deep copy.
//! - [`conventional`] -- public fields plus anything marked
//!   `#[codec(serialize)]`, minus anything marked `#[codec(skip)]`. The
//!   default for new contexts.
//! - [`strict`] -- only members marked `#[codec(serialize)]`; rejects
//!   non-conventional types.
//!
//! Policy identities are persisted in blob headers; a [`PolicyRegistry`]
//! maps them back to instances and rejects duplicate ids at registration.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::error::CodecError;
use crate::member::{MemberInfo, MemberKind};

/// Decides which members of a type are serialized.
pub trait SerializationPolicy: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;
    fn allows_non_conventional_types(&self) -> bool;
    fn should_serialize_member(&self, member: &MemberInfo) -> bool;
}

/// Shared handle to a policy. Caches key on the instance, not the id.
pub type PolicyRef = Arc<dyn SerializationPolicy>;

pub const EVERYTHING_ID: &str = "factorial.everything";
pub const CONVENTIONAL_ID: &str = "factorial.conventional";
pub const STRICT_ID: &str = "factorial.strict";

type MemberPredicate = dyn Fn(&MemberInfo) -> bool + Send + Sync;

/// A policy assembled from an id, a flag and a closure.
pub struct CustomSerializationPolicy {
    id: String,
    allow_non_conventional: bool,
    predicate: Box<MemberPredicate>,
}

impl CustomSerializationPolicy {
    /// Fails with `InvalidArgument` if `id` is empty.
    pub fn new<F>(
        id: impl Into<String>,
        allow_non_conventional: bool,
        predicate: F,
    ) -> Result<Self, CodecError>
    where
        F: Fn(&MemberInfo) -> bool + Send + Sync + 'static,
    {
        Self::builder()
            .id(id)
            .allow_non_conventional(allow_non_conventional)
            .predicate(predicate)
            .build()
    }

    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Wrap into the shared handle used by contexts.
    pub fn into_ref(self) -> PolicyRef {
        Arc::new(self)
    }
}

impl std::fmt::Debug for CustomSerializationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomSerializationPolicy")
            .field("id", &self.id)
            .field("allow_non_conventional", &self.allow_non_conventional)
            .finish_non_exhaustive()
    }
}

impl SerializationPolicy for CustomSerializationPolicy {
    fn id(&self) -> &str {
        &self.id
    }

    fn allows_non_conventional_types(&self) -> bool {
        self.allow_non_conventional
    }

    fn should_serialize_member(&self, member: &MemberInfo) -> bool {
        (self.predicate)(member)
    }
}

/// Builder for [`CustomSerializationPolicy`]. Both the id and the predicate
/// are required.
#[derive(Default)]
pub struct PolicyBuilder {
    id: Option<String>,
    allow_non_conventional: bool,
    predicate: Option<Box<MemberPredicate>>,
}

impl PolicyBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn allow_non_conventional(mut self, allow: bool) -> Self {
        self.allow_non_conventional = allow;
        self
    }

    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MemberInfo) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn build(self) -> Result<CustomSerializationPolicy, CodecError> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CodecError::InvalidArgument("policy id must not be empty".into()))?;
        let predicate = self.predicate.ok_or_else(|| {
            CodecError::InvalidArgument(format!("policy '{id}' has no member predicate"))
        })?;
        Ok(CustomSerializationPolicy {
            id,
            allow_non_conventional: self.allow_non_conventional,
            predicate,
        })
    }
}

// ---------------------------------------------------------------------------
// Built-in policies
// ---------------------------------------------------------------------------

fn builtin(
    cell: &'static OnceLock<PolicyRef>,
    id: &'static str,
    allow_non_conventional: bool,
    predicate: fn(&MemberInfo) -> bool,
) -> PolicyRef {
    Arc::clone(cell.get_or_init(|| {
        Arc::new(CustomSerializationPolicy {
            id: id.to_owned(),
            allow_non_conventional,
            predicate: Box::new(predicate),
        })
    }))
}

/// Every field and property regardless of markers.
pub fn everything() -> PolicyRef {
    static POLICY: OnceLock<PolicyRef> = OnceLock::new();
    builtin(&POLICY, EVERYTHING_ID, true, MemberInfo::holds_value)
}

/// Public fields and opted-in members, minus opted-out ones.
pub fn conventional() -> PolicyRef {
    static POLICY: OnceLock<PolicyRef> = OnceLock::new();
    builtin(&POLICY, CONVENTIONAL_ID, true, |m| {
        m.holds_value()
            && !m.skip
            && (m.serialize || (m.kind == MemberKind::Field && m.is_public()))
    })
}

/// Only opted-in members; non-conventional types are rejected.
pub fn strict() -> PolicyRef {
    static POLICY: OnceLock<PolicyRef> = OnceLock::new();
    builtin(&POLICY, STRICT_ID, false, |m| {
        m.holds_value() && m.serialize && !m.skip
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Lookup from persisted policy id to policy instance.
#[derive(Debug, Default, Clone)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, PolicyRef>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the three built-in policies.
    pub fn with_builtins() -> Self {
        let mut policies = BTreeMap::new();
        for policy in [everything(), conventional(), strict()] {
            policies.insert(policy.id().to_owned(), policy);
        }
        Self { policies }
    }

    /// Register `policy` under its id. Ids must be unique.
    pub fn register(&mut self, policy: PolicyRef) -> Result<(), CodecError> {
        let id = policy.id().to_owned();
        if self.policies.contains_key(&id) {
            return Err(CodecError::DuplicatePolicy(id));
        }
        self.policies.insert(id, policy);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<PolicyRef> {
        self.policies.get(id).cloned()
    }

    /// Like [`get`](Self::get) but fails with `UnknownPolicy`.
    pub fn resolve(&self, id: &str) -> Result<PolicyRef, CodecError> {
        self.get(id)
            .ok_or_else(|| CodecError::UnknownPolicy(id.to_owned()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
