//! Query parameters that shape a response: `fields[type]` and `include`.

use indexmap::{IndexMap, IndexSet};

use crate::error::QueryError;
use crate::registry::Registry;

pub const INCLUDE_PARAMETER: &str = "include";

/// Parameter name of a sparse fieldset, e.g. `fields[musicTracks]`.
pub fn fields_parameter(resource_type: &str) -> String {
    format!("fields[{}]", resource_type)
}

/// Client-requested sparse fieldsets, per resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    by_type: IndexMap<String, IndexSet<String>>,
}

impl FieldSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict `resource_type` to `fields`. An empty list selects no fields.
    pub fn with<I, S>(mut self, resource_type: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.by_type.insert(
            resource_type.into(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn get(&self, resource_type: &str) -> Option<&IndexSet<String>> {
        self.by_type.get(resource_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexSet<String>)> {
        self.by_type.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// Relationship paths to side-load, as a tree: `include=a.b,c`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeTree {
    children: IndexMap<String, IncludeTree>,
}

impl IncludeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of dot-separated relationship paths.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidParameter` for empty path segments.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let mut tree = IncludeTree::new();
        if raw.trim().is_empty() {
            return Ok(tree);
        }
        for path in raw.split(',') {
            let segments: Vec<&str> = path.trim().split('.').collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(QueryError::InvalidParameter {
                    parameter: INCLUDE_PARAMETER.to_string(),
                    message: format!("'{}' is not a valid relationship path", path),
                });
            }
            tree = tree.with_path(segments);
        }
        Ok(tree)
    }

    /// Add a path given as its segments.
    pub fn with_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut node = &mut self;
        for segment in path {
            node = node.children.entry(segment.into()).or_default();
        }
        self
    }

    pub fn child(&self, relationship: &str) -> Option<&IncludeTree> {
        self.children.get(relationship)
    }

    pub fn contains(&self, relationship: &str) -> bool {
        self.children.contains_key(relationship)
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &IncludeTree)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Longest path length.
    pub fn depth(&self) -> usize {
        self.children
            .values()
            .map(|c| 1 + c.depth())
            .max()
            .unwrap_or(0)
    }

    /// Check every path against the registry, starting at `root_type`.
    ///
    /// # Errors
    ///
    /// Returns `QueryError` for unknown or non-includable relationships and
    /// for paths longer than `max_depth`.
    pub fn validate(
        &self,
        registry: &Registry,
        root_type: &str,
        max_depth: Option<usize>,
    ) -> Result<(), QueryError> {
        self.validate_at(registry, root_type, max_depth, &mut Vec::new())
    }

    fn validate_at<'t>(
        &'t self,
        registry: &Registry,
        resource_type: &str,
        max_depth: Option<usize>,
        path: &mut Vec<&'t str>,
    ) -> Result<(), QueryError> {
        let ty = registry
            .lookup(resource_type)
            .map_err(|_| QueryError::UnknownResourceType {
                name: resource_type.to_string(),
                parameter: INCLUDE_PARAMETER.to_string(),
            })?;

        for (name, child) in &self.children {
            path.push(name);
            if let Some(max) = max_depth {
                if path.len() > max {
                    return Err(QueryError::IncludeTooDeep {
                        path: path.join("."),
                        max,
                        parameter: INCLUDE_PARAMETER.to_string(),
                    });
                }
            }
            let rel = ty
                .relationship(name)
                .ok_or_else(|| QueryError::UnknownRelationship {
                    resource_type: ty.name().to_string(),
                    relationship: name.clone(),
                    parameter: INCLUDE_PARAMETER.to_string(),
                })?;
            if !rel.is_includable() || !rel.permits(crate::types::Access::Read) {
                return Err(QueryError::RelationshipNotIncludable {
                    resource_type: ty.name().to_string(),
                    relationship: name.clone(),
                    parameter: INCLUDE_PARAMETER.to_string(),
                });
            }
            child.validate_at(registry, rel.related_type(), max_depth, path)?;
            path.pop();
        }
        Ok(())
    }
}

/// Response-shaping parameters parsed from a raw query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub fields: FieldSelection,
    pub include: IncludeTree,
}

impl QueryParams {
    /// Parse `fields[type]` and `include` from a url-encoded query string.
    /// Other parameters are ignored.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidParameter` for malformed values.
    pub fn parse(query: &str) -> Result<Self, QueryError> {
        let mut params = QueryParams::default();
        let query = query.trim_start_matches('?');
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == INCLUDE_PARAMETER {
                params.include = IncludeTree::parse(&value)?;
            } else if let Some(resource_type) = key
                .strip_prefix("fields[")
                .and_then(|rest| rest.strip_suffix(']'))
            {
                if resource_type.is_empty() {
                    return Err(QueryError::InvalidParameter {
                        parameter: key.to_string(),
                        message: "resource type is missing".to_string(),
                    });
                }
                let fields: Vec<&str> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .collect();
                params.fields = params.fields.with(resource_type, fields);
            }
        }
        Ok(params)
    }
}
