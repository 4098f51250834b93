//! JSON resource-model manifests.
//!
//! A manifest declares record-backed resource types and join collections so
//! a [`Registry`] can be built without Rust types:
//!
//! ```json
//! {
//!   "resources": [
//!     { "name": "recordCompanies", "idKind": "integer",
//!       "attributes": [{ "name": "name", "kind": "text" }],
//!       "relationships": [{ "name": "tracks", "cardinality": "toMany",
//!                           "target": "musicTracks", "inverse": "ownedBy" }] }
//!   ],
//!   "joins": []
//! }
//! ```

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::builder::{AttrSpec, RecordTypeBuilder, RegistryBuilder, RelSpec};
use crate::error::LoadError;
use crate::loader;
use crate::registry::{JoinType, Registry};
use crate::types::{
    AttrCapabilities, AttrKind, Capability, Cardinality, IdKind, LinkKinds, RelCapabilities,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceModel {
    #[serde(default)]
    pub resources: Vec<ResourceDef>,
    #[serde(default)]
    pub joins: Vec<JoinDef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDef {
    pub name: String,
    pub id_kind: IdKind,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttrKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub immutable: bool,
    /// All capabilities when omitted.
    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RelationshipDef {
    pub name: String,
    pub cardinality: Cardinality,
    pub target: String,
    #[serde(default)]
    pub inverse: Option<String>,
    #[serde(default = "default_true")]
    pub includable: bool,
    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(default)]
    pub links: Option<Vec<LinkKind>>,
    #[serde(default)]
    pub through: Option<ThroughDef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThroughDef {
    pub join: String,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    #[serde(rename = "self")]
    SelfLink,
    Related,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinDef {
    pub name: String,
    /// Navigation name to the resource type it points at.
    pub navigations: IndexMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn invalid(message: impl Into<String>) -> LoadError {
    LoadError::InvalidModel {
        message: message.into(),
    }
}

impl ResourceModel {
    /// Parse a manifest from JSON.
    pub fn from_value(value: Value) -> Result<Self, LoadError> {
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
    }

    /// Parse a manifest from a JSON string.
    pub fn parse(content: &str) -> Result<Self, LoadError> {
        Self::from_value(loader::load_json_str(content)?)
    }

    /// Load a manifest from a file path or URL.
    pub fn load(source: &str) -> Result<Self, LoadError> {
        Self::from_value(loader::load_auto(source)?)
    }

    /// Registry builder with every declared type and join.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::InvalidModel` when a capability does not apply to
    /// the field it is listed on.
    pub fn into_builder(self) -> Result<RegistryBuilder, LoadError> {
        let mut builder = RegistryBuilder::new();
        for resource in self.resources {
            builder = builder.resource(resource.into_record_type()?);
        }
        for join in self.joins {
            let join = join
                .navigations
                .into_iter()
                .fold(JoinType::new(join.name), |join, (nav, target)| {
                    join.navigation(nav, target)
                });
            builder = builder.join(join);
        }
        Ok(builder)
    }

    /// Build the registry described by this manifest.
    pub fn build(self) -> Result<Registry, LoadError> {
        Ok(self.into_builder()?.build()?)
    }
}

impl ResourceDef {
    fn into_record_type(self) -> Result<RecordTypeBuilder, LoadError> {
        let mut builder = RecordTypeBuilder::new(&self.name, self.id_kind);
        if let Some(base) = self.extends {
            builder = builder.extends(base);
        }

        for attr in self.attributes {
            let mut spec = AttrSpec::new(&attr.name, attr.kind);
            if attr.nullable {
                spec = spec.nullable();
            }
            if attr.immutable {
                spec = spec.immutable();
            }
            if let Some(names) = &attr.capabilities {
                let flags = names.iter().try_fold(AttrCapabilities::empty(), |acc, c| {
                    c.as_attr().map(|flag| acc | flag).ok_or_else(|| {
                        invalid(format!(
                            "capability {:?} does not apply to attribute {}.{}",
                            c, self.name, attr.name
                        ))
                    })
                })?;
                spec = spec.capabilities(flags);
            }
            builder = builder.attribute(spec);
        }

        for rel in self.relationships {
            let mut spec = RelSpec::new(&rel.name)
                .target(rel.target)
                .includable(rel.includable);
            if let Some(inverse) = rel.inverse {
                spec = spec.inverse(inverse);
            }
            if let Some(through) = rel.through {
                spec = spec.through(through.join, through.left, through.right);
            }
            if let Some(names) = &rel.capabilities {
                let flags = names.iter().try_fold(RelCapabilities::empty(), |acc, c| {
                    c.as_rel().map(|flag| acc | flag).ok_or_else(|| {
                        invalid(format!(
                            "capability {:?} does not apply to relationship {}.{}",
                            c, self.name, rel.name
                        ))
                    })
                })?;
                spec = spec.capabilities(flags);
            }
            if let Some(kinds) = &rel.links {
                let links = kinds.iter().fold(LinkKinds::empty(), |acc, kind| {
                    acc | match kind {
                        LinkKind::SelfLink => LinkKinds::SELF,
                        LinkKind::Related => LinkKinds::RELATED,
                    }
                });
                spec = spec.links(links);
            }
            builder = builder.relationship(spec, rel.cardinality);
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use serde_json::json;

    fn music() -> Value {
        json!({
            "resources": [
                {
                    "name": "recordCompanies",
                    "idKind": "integer",
                    "attributes": [
                        { "name": "name", "kind": "text" },
                        { "name": "countryOfResidence", "kind": "text", "nullable": true }
                    ],
                    "relationships": [
                        { "name": "tracks", "cardinality": "toMany", "target": "musicTracks",
                          "inverse": "ownedBy" }
                    ]
                },
                {
                    "name": "musicTracks",
                    "idKind": "uuid",
                    "attributes": [
                        { "name": "title", "kind": "text" },
                        { "name": "createdAt", "kind": "text", "nullable": true,
                          "immutable": true, "capabilities": ["view", "sort"] }
                    ],
                    "relationships": [
                        { "name": "ownedBy", "cardinality": "toOne", "target": "recordCompanies",
                          "inverse": "tracks", "links": ["related"] },
                        { "name": "tags", "cardinality": "toMany", "target": "tags",
                          "through": { "join": "trackTags", "left": "track", "right": "tag" },
                          "capabilities": ["view", "set"] }
                    ]
                },
                { "name": "tags", "idKind": "integer",
                  "attributes": [{ "name": "name", "kind": "text" }] }
            ],
            "joins": [
                { "name": "trackTags",
                  "navigations": { "track": "musicTracks", "tag": "tags" } }
            ]
        })
    }

    #[test]
    fn builds_registry_from_manifest() {
        let registry = ResourceModel::from_value(music()).unwrap().build().unwrap();
        assert_eq!(registry.len(), 3);

        let tracks = registry.get("musicTracks").unwrap();
        assert_eq!(tracks.id_kind(), IdKind::Uuid);
        let created = tracks.attribute("createdAt").unwrap();
        assert!(created.is_immutable());
        assert_eq!(
            created.capabilities(),
            AttrCapabilities::VIEW | AttrCapabilities::SORT
        );

        let owned_by = tracks.relationship("ownedBy").unwrap();
        assert_eq!(owned_by.links(), LinkKinds::RELATED);
        assert_eq!(owned_by.inverse(), Some("tracks"));

        let tags = tracks.relationship("tags").unwrap();
        assert!(tags.through().is_some());
        assert!(!tags.capabilities().contains(RelCapabilities::ADD));
    }

    #[test]
    fn rejects_misplaced_capability() {
        let model = json!({
            "resources": [{ "name": "tags", "idKind": "integer",
                "attributes": [{ "name": "name", "kind": "text", "capabilities": ["add"] }] }]
        });
        let err = ResourceModel::from_value(model).unwrap().build().unwrap_err();
        assert!(matches!(err, LoadError::InvalidModel { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn unknown_keys_are_invalid() {
        let err = ResourceModel::parse(r#"{"resources": [], "extra": 1}"#).unwrap_err();
        assert!(matches!(err, LoadError::InvalidModel { .. }));
    }

    #[test]
    fn registry_errors_surface() {
        let model = json!({
            "resources": [{ "name": "artists", "idKind": "string", "extends": "people" }]
        });
        let err = ResourceModel::from_value(model).unwrap().build().unwrap_err();
        assert!(matches!(
            err,
            LoadError::Registry(RegistryError::UnknownBaseType { .. })
        ));
    }
}
