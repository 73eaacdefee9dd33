use crate::normalize::{normalize, ContentTree, NormalizeError};
use crate::render::{to_render_tree, NodeDetails, NodeRef, RenderNode};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// One open mindmap: its content tree plus at most one selected node,
/// addressed by its render path.
#[derive(Debug)]
pub struct MindmapSession {
    tree: ContentTree<'static>,
    selected: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub path: Vec<usize>,
    pub node_id: Option<String>,
    pub details: NodeDetails,
    /// Previously selected node whose marker must be cleared.
    pub deselected: Option<Vec<usize>>,
}

impl MindmapSession {
    pub fn open(data: &Value, max_depth: usize) -> Result<Self, NormalizeError> {
        let tree = prepare(data, max_depth)?;
        Ok(MindmapSession {
            tree,
            selected: None,
        })
    }

    /// Swap in freshly generated content. On error the previous content and
    /// selection are kept.
    pub fn update(&mut self, data: &Value, max_depth: usize) -> Result<(), NormalizeError> {
        self.tree = prepare(data, max_depth)?;
        self.selected = None;
        Ok(())
    }

    pub fn render(&self, max_depth: usize) -> Result<RenderNode<'_>, NormalizeError> {
        to_render_tree(&self.tree, max_depth)
    }

    /// Select the node at `path`, as carried by each render node.
    pub fn select(&mut self, path: &[usize]) -> Option<Selection> {
        let node = NodeRef::root(&self.tree).at(path)?;
        let details = node.details();
        let node_id = node.id();
        let deselected = self.selected.replace(path.to_vec());
        Some(Selection {
            path: path.to_vec(),
            node_id,
            details,
            deselected,
        })
    }

    /// Select the first node, in preorder, whose id is `node_id`.
    pub fn select_id(&mut self, node_id: &str) -> Option<Selection> {
        let path = NodeRef::root(&self.tree).locate(node_id)?;
        self.select(&path)
    }

    pub fn selected(&self) -> Option<&[usize]> {
        self.selected.as_deref()
    }

    pub fn selected_id(&self) -> Option<String> {
        let path = self.selected.as_deref()?;
        NodeRef::root(&self.tree).at(path)?.id()
    }
}

fn prepare(data: &Value, max_depth: usize) -> Result<ContentTree<'static>, NormalizeError> {
    let tree = normalize(data)?;
    to_render_tree(&tree, max_depth)?;
    Ok(tree.into_owned())
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, MindmapSession>,
}

impl SessionRegistry {
    pub fn open(&mut self, data: &Value, max_depth: usize) -> Result<String, NormalizeError> {
        let session = MindmapSession::open(data, max_depth)?;
        let id = Uuid::new_v4().to_string();
        self.sessions.insert(id.clone(), session);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&MindmapSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut MindmapSession> {
        self.sessions.get_mut(id)
    }

    pub fn close(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
