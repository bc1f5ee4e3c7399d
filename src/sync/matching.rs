use crate::mapping::ProjectMapping;
use crate::model::issue::TrackerIssue;
use crate::model::work_item::WorkItem;

/// Description pushed to the tracker when a local epic has none; the
/// tracker rejects empty description payloads.
pub const EMPTY_DESCRIPTION_PLACEHOLDER: &str = "(no description)";

/// Whether a label looks like a portfolio item number ("S-01023"). Used to
/// strip stale number labels while preserving ordinary labels.
pub fn is_item_number(label: &str) -> bool {
    let Some((prefix, digits)) = label.split_once('-') else {
        return false;
    };
    !prefix.is_empty()
        && !digits.is_empty()
        && prefix.chars().all(|c| c.is_ascii_uppercase())
        && digits.chars().all(|c| c.is_ascii_digit())
}

/// Resolve the tracker issue a local item refers to, checking both link
/// directions: the local reference and the tracker-side number label.
/// Either side may have failed to persist on a prior partial run.
pub fn find_issue<'a>(item: &WorkItem, issues: &'a [TrackerIssue]) -> Option<&'a TrackerIssue> {
    if item.is_linked() {
        if let Some(issue) = issues.iter().find(|i| i.key == item.reference()) {
            return Some(issue);
        }
    }
    issues
        .iter()
        .find(|i| i.labels.iter().any(|l| l == &item.number))
}

/// Resolve the local item a tracker issue refers to, checking both link
/// directions.
pub fn find_local<'a>(issue: &TrackerIssue, items: &'a [WorkItem]) -> Option<&'a WorkItem> {
    find_local_index(issue, items).map(|pos| &items[pos])
}

/// Position variant of [`find_local`] for callers that mutate the batch.
pub fn find_local_index(issue: &TrackerIssue, items: &[WorkItem]) -> Option<usize> {
    items
        .iter()
        .position(|item| item.reference() == issue.key)
        .or_else(|| {
            items
                .iter()
                .position(|item| issue.labels.iter().any(|l| l == &item.number))
        })
}

/// The description an epic push presents to the tracker.
pub fn effective_description(item: &WorkItem) -> &str {
    if item.description.trim().is_empty() {
        EMPTY_DESCRIPTION_PLACEHOLDER
    } else {
        &item.description
    }
}

/// Field equality for a story or defect against its linked issue. True
/// means the update phase has nothing to write. Total over absent
/// optionals: missing values compare as empty strings, and an untranslatable
/// status or priority never forces a write on its own.
pub fn fields_match_child(
    local: &WorkItem,
    issue: &TrackerIssue,
    mapping: &ProjectMapping,
) -> bool {
    if local.reference() != issue.key {
        return false;
    }
    if local.name != issue.summary || local.description != issue.description {
        return false;
    }
    if let Some(status) = mapping.local_status(&issue.status) {
        if local.status.as_deref().unwrap_or("") != status {
            return false;
        }
    }
    if let Some(priority) = issue
        .priority
        .as_deref()
        .and_then(|p| mapping.local_priority(p))
    {
        if local.priority.as_deref().unwrap_or("") != priority {
            return false;
        }
    }
    let parent = local.parent_reference.as_deref().unwrap_or("");
    let link = issue.parent_link.as_deref().unwrap_or("");
    parent == link
}

/// Field equality for an epic against its linked issue, in the push
/// direction: the local side is authoritative.
pub fn fields_match_epic(
    local: &WorkItem,
    issue: &TrackerIssue,
    mapping: &ProjectMapping,
) -> bool {
    if local.reference() != issue.key {
        return false;
    }
    if local.name != issue.summary {
        return false;
    }
    if effective_description(local) != issue.description {
        return false;
    }
    if let Some(priority) = mapping.tracker_priority(local.priority.as_deref().unwrap_or("")) {
        if issue.priority.as_deref().unwrap_or("") != priority {
            return false;
        }
    }
    // The push merges the number into the label set; a missing label is a
    // pending write.
    issue.labels.iter().any(|l| l == &local.number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::work_item::AssetState;
    use std::collections::HashMap;

    fn mapping() -> ProjectMapping {
        ProjectMapping {
            local_project: "Scope:1024".into(),
            tracker_project: "FER".into(),
            epic_category: None,
            enabled: true,
            status_map: HashMap::from([("In Progress".to_string(), "In Progress".to_string())]),
            priority_map: HashMap::from([("High".to_string(), "High".to_string())]),
            done_words: vec!["Done".into()],
            default_tracker_priority: Some("Medium".into()),
        }
    }

    fn story(number: &str, reference: &str) -> WorkItem {
        WorkItem {
            local_id: "Story:1".into(),
            number: number.into(),
            name: "Checkout flow".into(),
            description: "Rework the checkout".into(),
            scope_id: "Scope:1024".into(),
            scope_name: "Storefront".into(),
            reference: if reference.is_empty() {
                None
            } else {
                Some(reference.into())
            },
            priority: Some("High".into()),
            status: Some("In Progress".into()),
            asset_state: AssetState::Active,
            parent_reference: Some("FER-1".into()),
            owner_ids: vec![],
        }
    }

    fn issue(key: &str, labels: &[&str]) -> TrackerIssue {
        TrackerIssue {
            key: key.into(),
            summary: "Checkout flow".into(),
            description: "Rework the checkout".into(),
            priority: Some("High".into()),
            status: "In Progress".into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            parent_link: Some("FER-1".into()),
            ..TrackerIssue::default()
        }
    }

    #[test]
    fn item_numbers_are_recognized() {
        assert!(is_item_number("S-01023"));
        assert!(is_item_number("E-1"));
        assert!(!is_item_number("backend"));
        assert!(!is_item_number("v2-rollout"));
        assert!(!is_item_number("S-"));
        assert!(!is_item_number("-42"));
    }

    #[test]
    fn link_resolves_by_reference() {
        let item = story("S-1", "FER-7");
        let issues = vec![issue("FER-7", &[])];
        assert!(find_issue(&item, &issues).is_some());
    }

    #[test]
    fn link_resolves_by_label_when_reference_missing() {
        let item = story("S-1", "");
        let issues = vec![issue("FER-7", &["S-1"])];
        assert_eq!(find_issue(&item, &issues).unwrap().key, "FER-7");
    }

    #[test]
    fn unmatched_item_resolves_to_none() {
        let item = story("S-1", "");
        let issues = vec![issue("FER-7", &["S-2"])];
        assert!(find_issue(&item, &issues).is_none());
    }

    #[test]
    fn local_lookup_checks_both_directions() {
        let items = vec![story("S-1", ""), story("S-2", "FER-9")];
        assert_eq!(
            find_local(&issue("FER-9", &[]), &items).unwrap().number,
            "S-2"
        );
        assert_eq!(
            find_local(&issue("FER-7", &["S-1"]), &items).unwrap().number,
            "S-1"
        );
    }

    #[test]
    fn equal_pair_matches() {
        let m = mapping();
        assert!(fields_match_child(&story("S-1", "FER-7"), &issue("FER-7", &["S-1"]), &m));
    }

    #[test]
    fn summary_difference_breaks_match() {
        let m = mapping();
        let mut i = issue("FER-7", &["S-1"]);
        i.summary = "Checkout flow v2".into();
        assert!(!fields_match_child(&story("S-1", "FER-7"), &i, &m));
    }

    #[test]
    fn missing_reference_breaks_match() {
        let m = mapping();
        assert!(!fields_match_child(&story("S-1", ""), &issue("FER-7", &["S-1"]), &m));
    }

    #[test]
    fn untranslatable_status_does_not_force_a_write() {
        let m = mapping();
        let mut i = issue("FER-7", &["S-1"]);
        i.status = "Blocked".into();
        assert!(fields_match_child(&story("S-1", "FER-7"), &i, &m));
    }

    #[test]
    fn absent_optionals_compare_as_empty() {
        let m = mapping();
        let mut item = story("S-1", "FER-7");
        item.parent_reference = None;
        let mut i = issue("FER-7", &["S-1"]);
        i.parent_link = None;
        assert!(fields_match_child(&item, &i, &m));
    }

    #[test]
    fn epic_match_requires_number_label() {
        let m = mapping();
        let mut epic = story("E-1", "FER-7");
        epic.parent_reference = None;
        let mut i = issue("FER-7", &["E-1"]);
        i.parent_link = None;
        assert!(fields_match_epic(&epic, &i, &m));
        i.labels.clear();
        assert!(!fields_match_epic(&epic, &i, &m));
    }

    #[test]
    fn empty_epic_description_compares_against_placeholder() {
        let m = mapping();
        let mut epic = story("E-1", "FER-7");
        epic.description = String::new();
        let mut i = issue("FER-7", &["E-1"]);
        i.description = EMPTY_DESCRIPTION_PLACEHOLDER.into();
        assert!(fields_match_epic(&epic, &i, &m));
    }
}
