//! Clinical resource model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::util::checksum_json;

/// Identity of a resource: its type plus its id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKey {
    pub resource_type: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Key used for this resource in the store's keyed collections.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((resource_type, id)) if !resource_type.is_empty() && !id.is_empty() => {
                Ok(Self::new(resource_type, id))
            }
            _ => Err(Error::InvalidInput(format!(
                "resource key must look like Type/id, got {s:?}"
            ))),
        }
    }
}

/// A tag attached to a resource's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Server-maintained metadata envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    /// Server version the representation corresponds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<u64>,
    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Tags such as the sync audit marker
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Coding>,
}

/// A structured clinical record (person, encounter, measurement, order, ...).
///
/// Everything except the type, id and metadata envelope is kept as free-form
/// JSON so any resource type can flow through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_type: String,
    /// Empty until assigned (locally or by the server)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub meta: ResourceMeta,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Resource {
    /// Create an empty resource of the given type and id.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            meta: ResourceMeta::default(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Builder-style version setter.
    #[must_use]
    pub const fn with_version(mut self, version: u64) -> Self {
        self.meta.version_id = Some(version);
        self
    }

    /// Builder-style timestamp setter.
    #[must_use]
    pub const fn with_last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.meta.last_updated = Some(at);
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type.clone(), self.id.clone())
    }

    pub const fn version(&self) -> Option<u64> {
        self.meta.version_id
    }

    pub const fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.meta.last_updated
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Content hash of the resource body.
    ///
    /// The metadata envelope is excluded so that a server echo with a bumped
    /// version but identical content hashes the same as the local copy.
    pub fn checksum(&self) -> String {
        let mut body = self.fields.clone();
        body.insert(
            "resourceType".to_string(),
            Value::String(self.resource_type.clone()),
        );
        checksum_json(&Value::Object(body))
    }

    /// Whether the metadata carries a tag with this code.
    pub fn has_tag(&self, code: &str) -> bool {
        self.meta.tag.iter().any(|tag| tag.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn resource_json_shape() {
        let raw = json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"versionId": 3, "lastUpdated": "2024-03-01T10:00:00Z"},
            "name": [{"family": "Nakamura"}],
            "active": true
        });

        let resource: Resource = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(resource.resource_type, "Patient");
        assert_eq!(resource.id, "p1");
        assert_eq!(resource.version(), Some(3));
        assert_eq!(resource.field("active"), Some(&json!(true)));
        assert_eq!(serde_json::to_value(&resource).unwrap(), raw);
    }

    #[test]
    fn resource_without_id_omits_it() {
        let resource = Resource::new("Observation", "");
        let value = serde_json::to_value(&resource).unwrap();
        assert!(value.get("id").is_none());
    }

    #[test]
    fn checksum_ignores_meta() {
        let a = Resource::new("Patient", "p1")
            .with_field("gender", json!("female"))
            .with_version(1);
        let b = a.clone().with_version(7);
        assert_eq!(a.checksum(), b.checksum());

        let c = a.clone().with_field("gender", json!("other"));
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn resource_key_parse() {
        let key: ResourceKey = "Encounter/e-9".parse().unwrap();
        assert_eq!(key, ResourceKey::new("Encounter", "e-9"));
        assert_eq!(key.storage_key(), "Encounter/e-9");
        assert!("Encounter".parse::<ResourceKey>().is_err());
        assert!("/x".parse::<ResourceKey>().is_err());
    }
}
