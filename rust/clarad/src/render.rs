use crate::normalize::{scalar_text, truthy_text, ContentNode, ContentTree, NormalizeError};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Map, Value};

const UNTITLED: &str = "Untitled";

/// Back-reference from a rendered node to the node it was built from.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Built(&'a ContentNode),
    Raw(&'a Value),
}

impl<'a> NodeRef<'a> {
    pub fn root(tree: &'a ContentTree<'_>) -> Self {
        match tree {
            ContentTree::Built(node) => NodeRef::Built(node),
            ContentTree::Passthrough(v) => NodeRef::Raw(v.as_ref()),
        }
    }

    pub fn id(&self) -> Option<String> {
        match self {
            NodeRef::Built(node) => Some(node.id.clone()),
            NodeRef::Raw(v) => v.get("id").and_then(scalar_text),
        }
    }

    /// Display label as handed to the renderer. Raw nodes may lack one.
    pub fn label(&self) -> String {
        match self {
            NodeRef::Built(node) => node.label.clone(),
            NodeRef::Raw(v) => v.get("label").and_then(scalar_text).unwrap_or_default(),
        }
    }

    pub fn children(&self) -> Vec<NodeRef<'a>> {
        match self {
            NodeRef::Built(node) => node.children.iter().map(NodeRef::Built).collect(),
            NodeRef::Raw(v) => match v.get("children") {
                Some(Value::Array(items)) => items.iter().map(NodeRef::Raw).collect(),
                _ => Vec::new(),
            },
        }
    }

    /// Header and body shown when the node is clicked.
    pub fn details(&self) -> NodeDetails {
        match self {
            NodeRef::Built(node) => NodeDetails {
                title: if node.label.is_empty() {
                    UNTITLED.to_string()
                } else {
                    node.label.clone()
                },
                body: node.content.clone(),
            },
            NodeRef::Raw(v) => NodeDetails {
                title: truthy_text(v.get("label"))
                    .or_else(|| truthy_text(v.get("title")))
                    .unwrap_or_else(|| UNTITLED.to_string()),
                body: truthy_text(v.get("content"))
                    .or_else(|| truthy_text(v.get("detailed_explanation")))
                    .or_else(|| truthy_text(v.get("explanation")))
                    .unwrap_or_default(),
            },
        }
    }

    /// The node's own fields without its subtree.
    pub fn summary(&self) -> Value {
        match self {
            NodeRef::Built(node) => json!({
                "id": node.id,
                "label": node.label,
                "content": node.content,
            }),
            NodeRef::Raw(Value::Object(map)) => {
                let fields: Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| k.as_str() != "children")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Value::Object(fields)
            }
            NodeRef::Raw(other) => (*other).clone(),
        }
    }

    /// Follow child indices down from this node. An empty path is the node
    /// itself.
    pub fn at(&self, path: &[usize]) -> Option<NodeRef<'a>> {
        match path.split_first() {
            None => Some(*self),
            Some((&idx, rest)) => self.children().get(idx)?.at(rest),
        }
    }

    /// Preorder search; the path of the first node carrying `id` wins.
    pub fn locate(&self, id: &str) -> Option<Vec<usize>> {
        if self.id().as_deref() == Some(id) {
            return Some(Vec::new());
        }
        self.children()
            .iter()
            .enumerate()
            .find_map(|(idx, child)| {
                let mut path = child.locate(id)?;
                path.insert(0, idx);
                Some(path)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDetails {
    pub title: String,
    pub body: String,
}

/// Node shape expected by the mindmap renderer: `label` becomes `content`.
/// `path` holds the child indices from the root and is the key a click
/// sends back, since raw trees may repeat or omit ids.
#[derive(Debug, Clone)]
pub struct RenderNode<'a> {
    pub content: String,
    pub data: NodeRef<'a>,
    pub path: Vec<usize>,
    pub children: Vec<RenderNode<'a>>,
}

impl Serialize for RenderNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.children.is_empty() { 3 } else { 4 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("content", &self.content)?;
        map.serialize_entry("data", &self.data.summary())?;
        map.serialize_entry("path", &self.path)?;
        if !self.children.is_empty() {
            map.serialize_entry("children", &self.children)?;
        }
        map.end()
    }
}

/// Build the render tree, refusing trees deeper than `max_depth` levels.
pub fn to_render_tree<'a>(
    tree: &'a ContentTree<'_>,
    max_depth: usize,
) -> Result<RenderNode<'a>, NormalizeError> {
    render_node(NodeRef::root(tree), Vec::new(), max_depth)
}

fn render_node(
    node: NodeRef<'_>,
    path: Vec<usize>,
    max_depth: usize,
) -> Result<RenderNode<'_>, NormalizeError> {
    // The root sits at depth 1.
    if path.len() >= max_depth {
        return Err(NormalizeError::CyclicInput { limit: max_depth });
    }
    let children = node
        .children()
        .into_iter()
        .enumerate()
        .map(|(idx, child)| {
            let mut child_path = path.clone();
            child_path.push(idx);
            render_node(child, child_path, max_depth)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RenderNode {
        content: node.label(),
        data: node,
        path,
        children,
    })
}
