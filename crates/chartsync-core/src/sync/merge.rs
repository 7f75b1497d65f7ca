//! Default per-type merge functions
//!
//! All functions are pure: they take both sides of a conflict plus the
//! instant of the merge and return the merged representation. Results carry
//! the remote metadata envelope (`id`, `meta`) so the server accepts them as
//! an update of its current version.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Coding, Resource};

/// Tag system marking resources produced by a merge.
pub const AUDIT_TAG_SYSTEM: &str = "urn:chartsync:sync-audit";
pub const MERGED_TAG_CODE: &str = "merged";

const PERSON_TYPES: [&str; 4] = ["Patient", "Person", "Practitioner", "RelatedPerson"];
const PERSON_LIST_FIELDS: [&str; 3] = ["name", "telecom", "address"];

const MEASUREMENT_TYPES: [&str; 1] = ["Observation"];
const MEASUREMENT_META_FIELDS: [&str; 2] = ["identifier", "performer"];
const EFFECTIVE_FIELDS: [&str; 2] = ["effectiveDateTime", "effectiveInstant"];

const ORDER_TYPES: [&str; 4] = [
    "MedicationRequest",
    "ServiceRequest",
    "DeviceRequest",
    "NutritionOrder",
];
const ORDER_LIST_FIELDS: [&str; 2] = ["dosageInstruction", "note"];

/// Rank of an order status; higher wins a merge.
pub fn status_rank(status: &str) -> u8 {
    match status {
        "active" => 5,
        "completed" => 4,
        "on-hold" => 3,
        "cancelled" => 2,
        "draft" => 1,
        _ => 0,
    }
}

/// Concatenate two JSON lists, dropping structural duplicates.
///
/// A non-list value counts as a one-element list. `None` when both are absent.
pub fn union_dedup(first: Option<&Value>, second: Option<&Value>) -> Option<Value> {
    if first.is_none() && second.is_none() {
        return None;
    }

    let mut merged: Vec<Value> = Vec::new();
    for value in [first, second].into_iter().flatten() {
        let items = match value {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        };
        for item in items {
            if !merged.contains(&item) {
                merged.push(item);
            }
        }
    }
    Some(Value::Array(merged))
}

/// Strictly later `meta.lastUpdated`; a missing timestamp counts as oldest.
fn is_strictly_newer(candidate: &Resource, other: &Resource) -> bool {
    match (candidate.last_modified(), other.last_modified()) {
        (Some(candidate_at), Some(other_at)) => candidate_at > other_at,
        (Some(_), None) => true,
        _ => false,
    }
}

/// The later side by timestamp; ties go to remote.
fn later<'a>(local: &'a Resource, remote: &'a Resource) -> &'a Resource {
    if is_strictly_newer(local, remote) {
        local
    } else {
        remote
    }
}

fn parse_instant(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let text = value?.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Clinically effective time of a measurement.
pub fn effective_time(resource: &Resource) -> Option<DateTime<Utc>> {
    EFFECTIVE_FIELDS
        .iter()
        .find_map(|field| parse_instant(resource.field(field)))
        .or_else(|| {
            parse_instant(
                resource
                    .field("effectivePeriod")
                    .and_then(|period| period.get("start")),
            )
        })
        .or_else(|| parse_instant(resource.field("issued")))
        .or_else(|| resource.last_modified())
}

fn with_remote_envelope(mut merged: Resource, remote: &Resource) -> Resource {
    merged.resource_type.clone_from(&remote.resource_type);
    merged.id.clone_from(&remote.id);
    merged.meta = remote.meta.clone();
    merged
}

fn set_or_remove(resource: &mut Resource, field: &str, value: Option<Value>) {
    match value {
        Some(value) => resource.set_field(field, value),
        None => {
            resource.remove_field(field);
        }
    }
}

/// Mark a resource as produced by a merge, replacing any earlier marker.
pub fn tag_merged(resource: &mut Resource, at: DateTime<Utc>) {
    resource.meta.tag.retain(|tag| {
        !(tag.code == MERGED_TAG_CODE && tag.system.as_deref() == Some(AUDIT_TAG_SYSTEM))
    });
    resource.meta.tag.push(Coding {
        system: Some(AUDIT_TAG_SYSTEM.to_string()),
        code: MERGED_TAG_CODE.to_string(),
        display: Some(format!(
            "Merged during offline sync on {}",
            at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        )),
    });
}

/// Person/contact records: names, telecom and addresses are unioned; every
/// other field comes from the later side.
pub fn merge_person(local: &Resource, remote: &Resource, at: DateTime<Utc>) -> Resource {
    let mut merged = with_remote_envelope(later(local, remote).clone(), remote);
    for field in PERSON_LIST_FIELDS {
        set_or_remove(
            &mut merged,
            field,
            union_dedup(remote.field(field), local.field(field)),
        );
    }
    tag_merged(&mut merged, at);
    merged
}

/// Point-in-time measurements: the later effective time supplies the value,
/// identifiers and performers of both sides are kept.
pub fn merge_measurement(local: &Resource, remote: &Resource, at: DateTime<Utc>) -> Resource {
    let local_wins = match (effective_time(local), effective_time(remote)) {
        (Some(local_at), Some(remote_at)) => local_at > remote_at,
        (Some(_), None) => true,
        _ => false,
    };
    let (winner, other) = if local_wins {
        (local, remote)
    } else {
        (remote, local)
    };

    let mut merged = with_remote_envelope(winner.clone(), remote);
    for field in MEASUREMENT_META_FIELDS {
        set_or_remove(
            &mut merged,
            field,
            union_dedup(other.field(field), winner.field(field)),
        );
    }
    tag_merged(&mut merged, at);
    merged
}

/// Orders and requests: the higher-ranked status wins status and reason;
/// instructions and notes are unioned.
pub fn merge_order(local: &Resource, remote: &Resource, at: DateTime<Utc>) -> Resource {
    let rank = |resource: &Resource| {
        resource
            .field("status")
            .and_then(Value::as_str)
            .map_or(0, status_rank)
    };
    let status_side = if rank(local) > rank(remote) {
        local
    } else {
        remote
    };

    let mut merged = with_remote_envelope(later(local, remote).clone(), remote);
    set_or_remove(&mut merged, "status", status_side.field("status").cloned());
    set_or_remove(
        &mut merged,
        "statusReason",
        status_side.field("statusReason").cloned(),
    );
    for field in ORDER_LIST_FIELDS {
        set_or_remove(
            &mut merged,
            field,
            union_dedup(remote.field(field), local.field(field)),
        );
    }
    tag_merged(&mut merged, at);
    merged
}

/// Any other type: a strictly newer local copy is overlaid onto the remote
/// envelope; otherwise the remote copy is returned untouched.
pub fn merge_generic(local: &Resource, remote: &Resource, at: DateTime<Utc>) -> Resource {
    if !is_strictly_newer(local, remote) {
        return remote.clone();
    }
    let mut merged = with_remote_envelope(remote.clone(), remote);
    for (field, value) in &local.fields {
        merged.set_field(field.clone(), value.clone());
    }
    tag_merged(&mut merged, at);
    merged
}

/// Dispatch to the default merge for the resource's type.
pub fn merge_by_type(local: &Resource, remote: &Resource, at: DateTime<Utc>) -> Resource {
    let resource_type = remote.resource_type.as_str();
    if PERSON_TYPES.contains(&resource_type) {
        merge_person(local, remote, at)
    } else if MEASUREMENT_TYPES.contains(&resource_type) {
        merge_measurement(local, remote, at)
    } else if ORDER_TYPES.contains(&resource_type)
        && local.field("status").is_some()
        && remote.field("status").is_some()
    {
        merge_order(local, remote, at)
    } else {
        merge_generic(local, remote, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn union_keeps_first_occurrence_order() {
        let merged = union_dedup(Some(&json!([1, {"a": 1}])), Some(&json!([{"a": 1}, 2])));
        assert_eq!(merged, Some(json!([1, {"a": 1}, 2])));
        assert_eq!(union_dedup(None, Some(&json!("x"))), Some(json!(["x"])));
        assert_eq!(union_dedup(None, None), None);
    }

    #[test]
    fn status_rank_order() {
        let ranks: Vec<u8> = ["active", "completed", "on-hold", "cancelled", "draft", "unknown"]
            .into_iter()
            .map(status_rank)
            .collect();
        assert_eq!(ranks, vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn merge_person_unions_lists_and_takes_later_scalars() {
        let local = Resource::new("Patient", "p1")
            .with_version(1)
            .with_last_updated(at(200))
            .with_field("name", json!([{"family": "Okafor"}]))
            .with_field("telecom", json!([{"system": "phone", "value": "555-0101"}]))
            .with_field("gender", json!("female"));
        let remote = Resource::new("Patient", "p1")
            .with_version(2)
            .with_last_updated(at(100))
            .with_field("name", json!([{"family": "Okafor"}, {"family": "Ade"}]))
            .with_field("gender", json!("unknown"))
            .with_field("birthDate", json!("1980-02-01"));

        let merged = merge_person(&local, &remote, at(300));
        assert_eq!(
            merged.field("name"),
            Some(&json!([{"family": "Okafor"}, {"family": "Ade"}]))
        );
        assert_eq!(
            merged.field("telecom"),
            Some(&json!([{"system": "phone", "value": "555-0101"}]))
        );
        assert_eq!(merged.field("gender"), Some(&json!("female")));
        assert_eq!(merged.field("birthDate"), None);
        assert_eq!(merged.version(), Some(2));
        assert!(merged.has_tag(MERGED_TAG_CODE));
    }

    #[test]
    fn merge_measurement_later_effective_value_wins() {
        let local = Resource::new("Observation", "o1")
            .with_version(1)
            .with_field("effectiveDateTime", json!("2024-03-01T10:00:00Z"))
            .with_field("valueQuantity", json!({"value": 120}))
            .with_field("performer", json!([{"reference": "Practitioner/a"}]));
        let remote = Resource::new("Observation", "o1")
            .with_version(4)
            .with_field("effectiveDateTime", json!("2024-03-01T09:00:00Z"))
            .with_field("valueQuantity", json!({"value": 118}))
            .with_field("performer", json!([{"reference": "Practitioner/b"}]));

        let merged = merge_measurement(&local, &remote, at(0));
        assert_eq!(merged.field("valueQuantity"), Some(&json!({"value": 120})));
        assert_eq!(
            merged.field("performer"),
            Some(&json!([
                {"reference": "Practitioner/b"},
                {"reference": "Practitioner/a"}
            ]))
        );
        assert_eq!(merged.version(), Some(4));
    }

    #[test]
    fn merge_order_status_rank_and_instructions() {
        let local = Resource::new("MedicationRequest", "m1")
            .with_last_updated(at(500))
            .with_field("status", json!("on-hold"))
            .with_field("statusReason", json!({"text": "awaiting labs"}))
            .with_field("dosageInstruction", json!([{"text": "1 tab daily"}]));
        let remote = Resource::new("MedicationRequest", "m1")
            .with_last_updated(at(100))
            .with_field("status", json!("active"))
            .with_field("dosageInstruction", json!([{"text": "2 tabs daily"}]));

        let merged = merge_by_type(&local, &remote, at(600));
        assert_eq!(merged.field("status"), Some(&json!("active")));
        assert_eq!(merged.field("statusReason"), None);
        assert_eq!(
            merged.field("dosageInstruction"),
            Some(&json!([{"text": "2 tabs daily"}, {"text": "1 tab daily"}]))
        );
    }

    #[test]
    fn merge_generic_overlays_only_when_local_newer() {
        let local = Resource::new("Organization", "org1")
            .with_last_updated(at(20))
            .with_field("name", json!("North Clinic"));
        let remote = Resource::new("Organization", "org1")
            .with_version(7)
            .with_last_updated(at(10))
            .with_field("name", json!("North"))
            .with_field("active", json!(true));

        let merged = merge_by_type(&local, &remote, at(30));
        assert_eq!(merged.field("name"), Some(&json!("North Clinic")));
        assert_eq!(merged.field("active"), Some(&json!(true)));
        assert_eq!(merged.version(), Some(7));
        assert!(merged.has_tag(MERGED_TAG_CODE));

        let stale = local.clone().with_last_updated(at(5));
        assert_eq!(merge_by_type(&stale, &remote, at(30)), remote);
    }

    #[test]
    fn tag_merged_replaces_previous_marker() {
        let mut resource = Resource::new("Organization", "org1");
        tag_merged(&mut resource, at(1));
        tag_merged(&mut resource, at(2));
        assert_eq!(resource.meta.tag.len(), 1);
        assert_eq!(
            resource.meta.tag[0].display.as_deref(),
            Some("Merged during offline sync on 1970-01-01T00:00:02Z")
        );
    }
}
