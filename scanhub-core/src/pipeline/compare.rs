//! Content comparison of defect sets.
//!
//! The comparison key is explicit — checker id, ordered event list, and the
//! key-event index — so the previously-waived match works without the
//! external diff tool. Identity is order-independent across the set but
//! order-sensitive within one defect's event trail.

use std::collections::HashMap;

use scanhub_model::Defect;

/// Identity of one defect for set comparison.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DefectIdentity {
    pub checker: String,
    pub key_event: usize,
    /// (file, line, event, message) per event, in trail order.
    pub events: Vec<(String, i64, String, String)>,
}

impl DefectIdentity {
    pub fn of(defect: &Defect) -> Self {
        Self {
            checker: defect.checker.clone(),
            key_event: defect.key_event,
            events: defect
                .events
                .iter()
                .map(|evt| {
                    (
                        evt.file_name.clone(),
                        evt.line,
                        evt.event.clone(),
                        evt.message.clone(),
                    )
                })
                .collect(),
        }
    }
}

/// Multiset difference in both directions:
/// `(only in a, only in b)`.
pub fn compare_defect_sets<'a>(
    a: &'a [Defect],
    b: &'a [Defect],
) -> (Vec<&'a Defect>, Vec<&'a Defect>) {
    let mut b_counts: HashMap<DefectIdentity, usize> = HashMap::new();
    for defect in b {
        *b_counts.entry(DefectIdentity::of(defect)).or_default() += 1;
    }

    let mut only_a = Vec::new();
    for defect in a {
        let identity = DefectIdentity::of(defect);
        match b_counts.get_mut(&identity) {
            Some(count) if *count > 0 => *count -= 1,
            _ => only_a.push(defect),
        }
    }

    let mut a_counts: HashMap<DefectIdentity, usize> = HashMap::new();
    for defect in a {
        *a_counts.entry(DefectIdentity::of(defect)).or_default() += 1;
    }
    let mut only_b = Vec::new();
    for defect in b {
        let identity = DefectIdentity::of(defect);
        match a_counts.get_mut(&identity) {
            Some(count) if *count > 0 => *count -= 1,
            _ => only_b.push(defect),
        }
    }

    (only_a, only_b)
}

/// Two groups match when their defect sets are identical in both
/// directions. Defect counts short-circuit the comparison.
pub fn groups_content_match(a: &[Defect], b: &[Defect]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let (only_a, only_b) = compare_defect_sets(a, b);
    only_a.is_empty() && only_b.is_empty()
}

#[cfg(test)]
mod tests {
    use scanhub_model::{DefectId, DefectKind, GroupId, ReportEvent};

    use super::*;

    fn event(file: &str, line: i64, kind: &str, msg: &str) -> ReportEvent {
        ReportEvent {
            file_name: file.into(),
            line,
            column: None,
            event: kind.into(),
            message: msg.into(),
            verbosity_level: None,
        }
    }

    fn defect(checker: &str, events: Vec<ReportEvent>) -> Defect {
        Defect {
            id: DefectId::new(),
            group: GroupId::new(),
            checker: checker.into(),
            order: None,
            annotation: None,
            cwe: None,
            key_event: 0,
            function: None,
            defect_identifier: None,
            state: DefectKind::New,
            events,
        }
    }

    #[test]
    fn identical_sets_match_regardless_of_order() {
        let a = vec![
            defect("NULL_DEREF", vec![event("a.c", 10, "deref", "null")]),
            defect("LEAK", vec![event("b.c", 20, "alloc", "leak")]),
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        assert!(groups_content_match(&a, &b));
    }

    #[test]
    fn event_order_is_part_of_the_identity() {
        let forward = defect(
            "USE_AFTER_FREE",
            vec![
                event("a.c", 1, "free", "freed"),
                event("a.c", 2, "use", "used"),
            ],
        );
        let reversed = defect(
            "USE_AFTER_FREE",
            vec![
                event("a.c", 2, "use", "used"),
                event("a.c", 1, "free", "freed"),
            ],
        );
        assert!(!groups_content_match(
            std::slice::from_ref(&forward),
            std::slice::from_ref(&reversed)
        ));
    }

    #[test]
    fn differences_surface_in_both_directions() {
        let shared = defect("LEAK", vec![event("x.c", 5, "alloc", "m")]);
        let a = vec![
            shared.clone(),
            defect("NULL_DEREF", vec![event("y.c", 9, "deref", "n")]),
        ];
        let b = vec![
            shared,
            defect("OVERRUN", vec![event("z.c", 3, "index", "o")]),
        ];
        let (only_a, only_b) = compare_defect_sets(&a, &b);
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].checker, "NULL_DEREF");
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].checker, "OVERRUN");
    }
}
