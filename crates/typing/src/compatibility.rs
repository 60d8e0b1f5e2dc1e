//! ABO/Rh transfusion compatibility rules.
//!
//! Stateless rule tables over the eight blood types. Callers reject
//! malformed input upstream; everything here is total.

use std::collections::BTreeSet;

use crate::blood_type::{BloodGroup, BloodType, ComponentType, RhFactor};

/// How strictly to match platelet donors.
///
/// ABO matching is preferred for platelets but Rh is non-critical, and in an
/// emergency any ABO group may be accepted. The fallback is gated behind an
/// explicit policy so routine searches stay ABO-matched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlateletPolicy {
    AboMatched,
    EmergencyFallback,
}

fn abo_donates(donor: BloodGroup, recipient: BloodGroup) -> bool {
    use BloodGroup::*;
    // O donates to all; AB receives from all.
    matches!(
        (donor, recipient),
        (O, _) | (A, A) | (A, Ab) | (B, B) | (B, Ab) | (Ab, Ab)
    )
}

fn rh_donates(donor: RhFactor, recipient: RhFactor) -> bool {
    // Rh- donors serve both factors; Rh+ donors only Rh+ recipients.
    donor == RhFactor::Negative || recipient == RhFactor::Positive
}

/// Can `donor` give whole blood (or red cells) to `recipient`?
pub fn whole_blood_donates(donor: BloodType, recipient: BloodType) -> bool {
    abo_donates(donor.group, recipient.group) && rh_donates(donor.rh, recipient.rh)
}

/// Can `donor` give plasma to `recipient`?
///
/// Plasma ABO compatibility is the transpose of the whole-blood ABO rule,
/// making AB the universal plasma donor and O the universal plasma
/// recipient. Rh is non-critical for plasma, as it is for platelets.
pub fn plasma_donates(donor: BloodType, recipient: BloodType) -> bool {
    abo_donates(recipient.group, donor.group)
}

/// Donor types whose whole blood (or red cells) `recipient` can receive.
pub fn compatible_donors_for_whole_blood(recipient: BloodType) -> BTreeSet<BloodType> {
    BloodType::ALL
        .into_iter()
        .filter(|donor| whole_blood_donates(*donor, recipient))
        .collect()
}

/// Donor types whose plasma `recipient` can receive.
pub fn compatible_donors_for_plasma(recipient: BloodType) -> BTreeSet<BloodType> {
    BloodType::ALL
        .into_iter()
        .filter(|donor| plasma_donates(*donor, recipient))
        .collect()
}

/// Donor types whose platelets `recipient` can receive under `policy`.
pub fn compatible_donors_for_platelets(
    recipient: BloodType,
    policy: PlateletPolicy,
) -> BTreeSet<BloodType> {
    match policy {
        PlateletPolicy::AboMatched => BloodType::ALL
            .into_iter()
            .filter(|donor| donor.group == recipient.group)
            .collect(),
        PlateletPolicy::EmergencyFallback => BloodType::ALL.into_iter().collect(),
    }
}

/// Donor types eligible for `recipient` and the given component.
///
/// Red cells follow the whole-blood table; `platelet_policy` only matters
/// for platelet searches.
pub fn compatible_donors(
    recipient: BloodType,
    component: ComponentType,
    platelet_policy: PlateletPolicy,
) -> BTreeSet<BloodType> {
    match component {
        ComponentType::WholeBlood | ComponentType::RedCells => {
            compatible_donors_for_whole_blood(recipient)
        }
        ComponentType::Plasma => compatible_donors_for_plasma(recipient),
        ComponentType::Platelets => compatible_donors_for_platelets(recipient, platelet_policy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bt(s: &str) -> BloodType {
        s.parse().unwrap()
    }

    #[test]
    fn o_negative_donates_whole_blood_to_everyone() {
        for recipient in BloodType::ALL {
            assert!(
                whole_blood_donates(bt("O-"), recipient),
                "O- should serve {recipient}"
            );
        }
    }

    #[test]
    fn ab_positive_receives_whole_blood_from_everyone() {
        let donors = compatible_donors_for_whole_blood(bt("AB+"));
        assert_eq!(donors.len(), 8);
    }

    #[test]
    fn rh_positive_donor_never_serves_rh_negative_recipient() {
        for donor in BloodType::ALL {
            for recipient in BloodType::ALL {
                if donor.rh == RhFactor::Positive && recipient.rh == RhFactor::Negative {
                    assert!(!whole_blood_donates(donor, recipient));
                }
            }
        }
    }

    #[test]
    fn a_positive_whole_blood_donor_set() {
        let donors = compatible_donors_for_whole_blood(bt("A+"));
        let expected: BTreeSet<BloodType> =
            [bt("A+"), bt("A-"), bt("O+"), bt("O-")].into_iter().collect();
        assert_eq!(donors, expected);
    }

    #[test]
    fn a_positive_plasma_donor_set() {
        let donors = compatible_donors_for_plasma(bt("A+"));
        let expected: BTreeSet<BloodType> =
            [bt("A+"), bt("A-"), bt("AB+"), bt("AB-")].into_iter().collect();
        assert_eq!(donors, expected);
    }

    #[test]
    fn ab_is_universal_plasma_donor() {
        for recipient in BloodType::ALL {
            let donors = compatible_donors_for_plasma(recipient);
            assert!(
                donors.contains(&bt("AB-")),
                "AB- plasma should serve {recipient}"
            );
        }
    }

    #[test]
    fn o_is_universal_plasma_recipient() {
        let donors = compatible_donors_for_plasma(bt("O+"));
        assert_eq!(donors.len(), 8);
    }

    #[test]
    fn abo_matched_platelets_ignore_rh() {
        let donors = compatible_donors_for_platelets(bt("B-"), PlateletPolicy::AboMatched);
        let expected: BTreeSet<BloodType> = [bt("B+"), bt("B-")].into_iter().collect();
        assert_eq!(donors, expected);
    }

    #[test]
    fn emergency_fallback_accepts_any_abo_group() {
        for recipient in BloodType::ALL {
            let donors =
                compatible_donors_for_platelets(recipient, PlateletPolicy::EmergencyFallback);
            assert_eq!(donors.len(), 8);
        }
    }

    #[test]
    fn red_cells_follow_the_whole_blood_table() {
        for recipient in BloodType::ALL {
            assert_eq!(
                compatible_donors(recipient, ComponentType::RedCells, PlateletPolicy::AboMatched),
                compatible_donors_for_whole_blood(recipient),
            );
        }
    }

    fn arb_blood_type() -> impl Strategy<Value = BloodType> {
        (0usize..BloodType::ALL.len()).prop_map(|i| BloodType::ALL[i])
    }

    fn arb_rh() -> impl Strategy<Value = RhFactor> {
        prop_oneof![Just(RhFactor::Positive), Just(RhFactor::Negative)]
    }

    proptest! {
        /// Property: plasma compatibility never depends on either side's Rh.
        #[test]
        fn plasma_compatibility_ignores_rh(
            donor in arb_blood_type(),
            recipient in arb_blood_type(),
            donor_rh in arb_rh(),
            recipient_rh in arb_rh(),
        ) {
            prop_assert_eq!(
                plasma_donates(donor, recipient),
                plasma_donates(
                    BloodType::new(donor.group, donor_rh),
                    BloodType::new(recipient.group, recipient_rh),
                )
            );
        }

        /// Property: on Rh-matched pairs (where the whole-blood Rh rule is
        /// vacuous) plasma is exactly the transpose of whole blood.
        #[test]
        fn plasma_abo_is_the_whole_blood_transpose(
            donor in arb_blood_type(),
            recipient in arb_blood_type(),
        ) {
            let d = BloodType::new(donor.group, RhFactor::Positive);
            let r = BloodType::new(recipient.group, RhFactor::Positive);
            prop_assert_eq!(plasma_donates(d, r), whole_blood_donates(r, d));
        }

        /// Property: every recipient can receive their own type, for every
        /// component.
        #[test]
        fn own_type_is_always_compatible(recipient in arb_blood_type()) {
            prop_assert!(whole_blood_donates(recipient, recipient));
            prop_assert!(plasma_donates(recipient, recipient));
            prop_assert!(
                compatible_donors_for_platelets(recipient, PlateletPolicy::AboMatched)
                    .contains(&recipient)
            );
        }
    }
}
