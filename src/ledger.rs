//! Local identifier ledger for one atomic request.

use std::collections::HashMap;
use std::fmt;

use crate::error::LedgerError;
use crate::registry::Registry;

/// A server-assigned identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedIdentity {
    pub resource_type: String,
    pub id: String,
}

impl ResolvedIdentity {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResolvedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub identity: ResolvedIdentity,
    pub declared_at: usize,
}

/// Maps client-chosen `lid`s to the identities assigned when their creating
/// operation ran. Entries are write-once.
#[derive(Debug, Default)]
pub struct LocalIdLedger {
    entries: HashMap<String, LedgerEntry>,
}

impl LocalIdLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that operation `index` may declare `lid`.
    pub fn ensure_declarable(&self, lid: &str, index: usize) -> Result<(), LedgerError> {
        if self.entries.contains_key(lid) {
            return Err(LedgerError::DuplicateLocalId {
                lid: lid.to_string(),
                index,
            });
        }
        Ok(())
    }

    /// Record the identity assigned to `lid` by operation `index`.
    pub fn declare(
        &mut self,
        lid: &str,
        identity: ResolvedIdentity,
        index: usize,
    ) -> Result<(), LedgerError> {
        self.ensure_declarable(lid, index)?;
        tracing::debug!(lid, %identity, index, "declared local id");
        self.entries.insert(
            lid.to_string(),
            LedgerEntry {
                identity,
                declared_at: index,
            },
        );
        Ok(())
    }

    /// Identity of `lid` as seen by operation `index`.
    ///
    /// Only lids declared by a strictly earlier operation resolve.
    pub fn resolve(&self, lid: &str, index: usize) -> Result<&ResolvedIdentity, LedgerError> {
        match self.entries.get(lid) {
            Some(entry) if entry.declared_at < index => Ok(&entry.identity),
            _ => Err(LedgerError::UnassignedLocalId {
                lid: lid.to_string(),
                index,
            }),
        }
    }

    /// Like [`LocalIdLedger::resolve`], also requiring the declared type to be
    /// assignable to `expected_type`.
    pub fn resolve_as(
        &self,
        registry: &Registry,
        lid: &str,
        index: usize,
        expected_type: &str,
    ) -> Result<&ResolvedIdentity, LedgerError> {
        let identity = self.resolve(lid, index)?;
        if registry.is_assignable(&identity.resource_type, expected_type) {
            Ok(identity)
        } else {
            Err(LedgerError::LocalIdTypeMismatch {
                lid: lid.to_string(),
                declared: identity.resource_type.clone(),
                used: expected_type.to_string(),
                index,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
