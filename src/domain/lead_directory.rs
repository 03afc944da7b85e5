use crate::domain::models::{ActiveLead, LeadDirectoryEntry};
use crate::domain::phone_number::{matches_with, normalize, MatchPolicy};

/// Immutable snapshot of the user's assigned leads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadDirectory {
    entries: Vec<LeadDirectoryEntry>,
}

impl LeadDirectory {
    pub fn new(entries: Vec<LeadDirectoryEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find_match(&self, phone: &str, policy: &MatchPolicy) -> Option<ActiveLead> {
        if normalize(phone).is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| {
                entry
                    .phone
                    .as_deref()
                    .is_some_and(|candidate| matches_with(phone, candidate, policy))
            })
            .map(LeadDirectoryEntry::to_active_lead)
    }
}
