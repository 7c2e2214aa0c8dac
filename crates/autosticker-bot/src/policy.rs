//! Recipient allow-list.
//!
//! Only chats listed here ever receive a sticker. The list is built once at
//! startup from configuration and never mutated afterwards.

use std::collections::HashSet;

use serde::Deserialize;

use autosticker_shared::error::IdentityError;
use autosticker_shared::types::{RecipientIdentity, RecipientKind};

/// One configured entry, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AllowEntry {
    pub identity: String,
    pub kind: RecipientKind,
}

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: HashSet<RecipientIdentity>,
}

impl AllowList {
    /// Validate every entry: well-formed identity, and a server that matches
    /// the declared kind. A single bad entry rejects the whole list.
    pub fn from_entries(entries: &[AllowEntry]) -> Result<Self, IdentityError> {
        let mut set = HashSet::with_capacity(entries.len());

        for entry in entries {
            let identity = RecipientIdentity::parse(entry.identity.trim())?;
            if identity.server() != entry.kind.server() {
                return Err(IdentityError::KindMismatch {
                    identity: identity.to_string(),
                    expected: entry.kind.to_string(),
                });
            }
            set.insert(identity);
        }

        Ok(Self { entries: set })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecipientIdentity> {
        self.entries.iter()
    }
}

/// Exact-match membership. Anything not listed is denied, including when
/// the list is empty.
pub fn is_allowed(identity: &RecipientIdentity, allow_list: &AllowList) -> bool {
    allow_list.entries.contains(identity)
}
