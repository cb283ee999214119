//! Serializable content tree used to import nodes into a repository.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use nodecounter_shared::{NodeCounterError, PropertyValue, Result, join_path};
use serde::{Deserialize, Serialize};

use crate::Node;

/// A node and its subtree, as found in an import file.
///
/// ```json
/// { "name": "en", "type": "cq:Page", "children": [
///     { "name": "jcr:content", "type": "cq:PageContent",
///       "lastModified": "2024-05-01T10:00:00Z",
///       "properties": { "jcr:title": { "type": "string", "value": "English" } } } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub name: String,
    #[serde(rename = "type")]
    pub primary_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>, primary_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_type: primary_type.into(),
            resource_type: None,
            last_modified: None,
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: TreeNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = TreeNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Total number of nodes in this subtree, including itself.
    pub fn size(&self) -> usize {
        let mut total = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            total += 1;
            stack.extend(node.children.iter());
        }
        total
    }
}

/// One node of a flattened import, in pre-order.
#[derive(Debug, Clone)]
pub(crate) struct FlatNode {
    pub node: Node,
    pub parent_path: String,
    pub ordinal: usize,
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Flatten `tree` rooted under `parent` into pre-order rows.
pub(crate) fn flatten(parent: &str, tree: &TreeNode) -> Result<Vec<FlatNode>> {
    let mut out = Vec::new();
    let mut stack: Vec<(String, usize, &TreeNode)> = vec![(parent.to_string(), 0, tree)];

    while let Some((parent_path, ordinal, node)) = stack.pop() {
        if node.name.is_empty() || node.name.contains('/') {
            return Err(NodeCounterError::validation(format!(
                "invalid node name '{}' under {parent_path}",
                node.name
            )));
        }
        let path = join_path(&parent_path, &node.name);

        for (i, child) in node.children.iter().enumerate().rev() {
            stack.push((path.clone(), i, child));
        }

        out.push(FlatNode {
            node: Node {
                path,
                name: node.name.clone(),
                primary_type: node.primary_type.clone(),
                resource_type: node.resource_type.clone(),
                last_modified: node.last_modified,
            },
            parent_path,
            ordinal,
            properties: node.properties.clone(),
        });
    }

    Ok(out)
}
