//! Caregivers and the per-journey selection snapshot

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::warn;

/// Newtype wrapper for caregiver IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CaregiverId(pub u32);

impl CaregiverId {
    /// Reserved for the free-form number typed in for a single journey
    pub const AD_HOC: CaregiverId = CaregiverId(0);
}

impl std::fmt::Display for CaregiverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contact who can be notified about the rider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caregiver {
    pub id: CaregiverId,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub relation: String,
}

impl Caregiver {
    pub fn new(id: u32, name: &str, phone: &str, relation: &str) -> Self {
        Self {
            id: CaregiverId(id),
            name: name.to_string(),
            phone: phone.to_string(),
            relation: relation.to_string(),
        }
    }

    fn ad_hoc(phone: &str) -> Self {
        Self {
            id: CaregiverId::AD_HOC,
            name: "Custom contact".to_string(),
            phone: phone.to_string(),
            relation: "custom".to_string(),
        }
    }
}

/// Caregivers chosen for one journey.
///
/// Copied out of the directory when the journey starts; edits made to the
/// directory afterwards do not reach an in-progress journey.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaregiverSelection {
    contacts: SmallVec<[Caregiver; 4]>,
    ad_hoc_phone: Option<String>,
}

impl CaregiverSelection {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot the selected ids out of the caregivers currently available.
    ///
    /// Unknown ids are dropped and duplicates collapse to one entry. A blank
    /// ad-hoc number counts as none.
    pub fn snapshot(
        available: &[Caregiver],
        selected: &[CaregiverId],
        ad_hoc_phone: Option<&str>,
    ) -> Self {
        let mut seen = FxHashSet::default();
        let mut contacts = SmallVec::new();

        for id in selected {
            if !seen.insert(*id) {
                continue;
            }
            match available.iter().find(|c| c.id == *id) {
                Some(caregiver) => contacts.push(caregiver.clone()),
                None => warn!(caregiver_id = %id, "caregiver_not_in_directory"),
            }
        }

        let ad_hoc_phone =
            ad_hoc_phone.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string);

        Self { contacts, ad_hoc_phone }
    }

    pub fn contacts(&self) -> &[Caregiver] {
        &self.contacts
    }

    pub fn ad_hoc_phone(&self) -> Option<&str> {
        self.ad_hoc_phone.as_deref()
    }

    /// Everyone who gets a message on escalation, ad-hoc number last
    pub fn recipients(&self) -> Vec<Caregiver> {
        let mut out: Vec<Caregiver> = self.contacts.iter().cloned().collect();
        if let Some(phone) = &self.ad_hoc_phone {
            out.push(Caregiver::ad_hoc(phone));
        }
        out
    }

    /// Number of recipients, counting the ad-hoc number
    pub fn len(&self) -> usize {
        self.contacts.len() + usize::from(self.ad_hoc_phone.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Vec<Caregiver> {
        vec![
            Caregiver::new(1000, "Mom", "+911111111111", "mother"),
            Caregiver::new(1001, "Dad", "+912222222222", "father"),
            Caregiver::new(1002, "Asha", "+913333333333", "sister"),
        ]
    }

    #[test]
    fn test_snapshot_selected_only() {
        let selection =
            CaregiverSelection::snapshot(&directory(), &[CaregiverId(1000), CaregiverId(1002)], None);

        assert_eq!(selection.len(), 2);
        let names: Vec<&str> = selection.contacts().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Mom", "Asha"]);
    }

    #[test]
    fn test_unknown_and_duplicate_ids() {
        let selection = CaregiverSelection::snapshot(
            &directory(),
            &[CaregiverId(1001), CaregiverId(42), CaregiverId(1001)],
            None,
        );

        assert_eq!(selection.len(), 1);
        assert_eq!(selection.contacts()[0].id, CaregiverId(1001));
    }

    #[test]
    fn test_ad_hoc_phone_counts_as_recipient() {
        let selection =
            CaregiverSelection::snapshot(&directory(), &[CaregiverId(1000)], Some(" +919999999999 "));

        assert_eq!(selection.len(), 2);
        assert_eq!(selection.ad_hoc_phone(), Some("+919999999999"));

        let recipients = selection.recipients();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[1].id, CaregiverId::AD_HOC);
        assert_eq!(recipients[1].phone, "+919999999999");
    }

    #[test]
    fn test_blank_ad_hoc_phone_ignored() {
        let selection = CaregiverSelection::snapshot(&directory(), &[], Some("   "));
        assert!(selection.is_empty());
        assert_eq!(selection.ad_hoc_phone(), None);
    }

    #[test]
    fn test_snapshot_unaffected_by_directory_edits() {
        let mut available = directory();
        let selection = CaregiverSelection::snapshot(&available, &[CaregiverId(1000)], None);

        available[0].phone = "+910000000000".to_string();
        available.remove(0);

        assert_eq!(selection.contacts()[0].phone, "+911111111111");
        assert_eq!(selection.len(), 1);
    }
}
