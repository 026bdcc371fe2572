//! Caregiver directory

use crate::domain::caregiver::Caregiver;
use crate::infra::config::Config;
use parking_lot::RwLock;

pub trait CaregiverDirectory: Send + Sync {
    /// Contacts the rider can pick from when starting a journey
    fn list_selectable(&self) -> Vec<Caregiver>;
}

/// In-memory directory seeded from the `[[caregivers]]` config entries
#[derive(Debug, Default)]
pub struct StaticCaregiverDirectory {
    contacts: RwLock<Vec<Caregiver>>,
}

impl StaticCaregiverDirectory {
    pub fn new(contacts: Vec<Caregiver>) -> Self {
        Self { contacts: RwLock::new(contacts) }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.caregivers().to_vec())
    }

    /// Add or replace a contact (matched by id)
    pub fn upsert(&self, caregiver: Caregiver) {
        let mut contacts = self.contacts.write();
        match contacts.iter_mut().find(|c| c.id == caregiver.id) {
            Some(existing) => *existing = caregiver,
            None => contacts.push(caregiver),
        }
    }
}

impl CaregiverDirectory for StaticCaregiverDirectory {
    fn list_selectable(&self) -> Vec<Caregiver> {
        self.contacts.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::caregiver::{CaregiverId, CaregiverSelection};

    #[test]
    fn test_list_and_upsert() {
        let directory =
            StaticCaregiverDirectory::new(vec![Caregiver::new(1000, "Mom", "+911111111111", "mother")]);

        directory.upsert(Caregiver::new(1001, "Dad", "+912222222222", "father"));
        directory.upsert(Caregiver::new(1000, "Mom", "+913333333333", "mother"));

        let contacts = directory.list_selectable();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].phone, "+913333333333");
    }

    #[test]
    fn test_selection_snapshot_ignores_later_edits() {
        let directory =
            StaticCaregiverDirectory::new(vec![Caregiver::new(1000, "Mom", "+911111111111", "mother")]);
        let selection =
            CaregiverSelection::snapshot(&directory.list_selectable(), &[CaregiverId(1000)], None);

        directory.upsert(Caregiver::new(1000, "Mom", "+910000000000", "mother"));

        assert_eq!(selection.contacts()[0].phone, "+911111111111");
    }
}
