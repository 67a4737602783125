//! Minimal DOM: a flat node arena with parent links.
//! A locator matches a node when the node lists that exact selector.

use chatbridge_core::traits::ElementHandle;

#[derive(Debug, Clone)]
pub struct SimNode {
    pub id: u64,
    pub parent: Option<u64>,
    pub selectors: Vec<String>,
    pub text: String,
    pub enabled: bool,
}

#[derive(Debug, Default)]
pub struct SimDom {
    nodes: Vec<SimNode>,
    next_id: u64,
}

impl SimDom {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), next_id: 1 }
    }

    /// Append a node; returns its handle.
    pub fn add(&mut self, parent: Option<ElementHandle>, selectors: &[&str], text: &str) -> ElementHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.push(SimNode {
            id,
            parent: parent.map(|p| p.0),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            text: text.to_string(),
            enabled: true,
        });
        ElementHandle(id)
    }

    pub fn node(&self, handle: ElementHandle) -> Option<&SimNode> {
        self.nodes.iter().find(|n| n.id == handle.0)
    }

    pub fn node_mut(&mut self, handle: ElementHandle) -> Option<&mut SimNode> {
        self.nodes.iter_mut().find(|n| n.id == handle.0)
    }

    fn is_descendant(&self, node: &SimNode, ancestor: u64) -> bool {
        let mut cursor = node.parent;
        while let Some(pid) = cursor {
            if pid == ancestor {
                return true;
            }
            cursor = self.nodes.iter().find(|n| n.id == pid).and_then(|n| n.parent);
        }
        false
    }

    /// Matching nodes in document (insertion) order.
    pub fn query_all(&self, scope: Option<ElementHandle>, selector: &str) -> Vec<ElementHandle> {
        self.nodes
            .iter()
            .filter(|n| n.selectors.iter().any(|s| s == selector))
            .filter(|n| scope.is_none_or(|s| self.is_descendant(n, s.0)))
            .map(|n| ElementHandle(n.id))
            .collect()
    }

    pub fn query(&self, scope: Option<ElementHandle>, selector: &str) -> Option<ElementHandle> {
        self.query_all(scope, selector).into_iter().next()
    }

    /// Own text, or the children's text joined by newlines.
    pub fn text_content(&self, handle: ElementHandle) -> Option<String> {
        let node = self.node(handle)?;
        if !node.text.is_empty() {
            return Some(node.text.clone());
        }
        let parts: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.parent == Some(handle.0))
            .filter_map(|n| self.text_content(ElementHandle(n.id)))
            .filter(|t| !t.is_empty())
            .collect();
        Some(parts.join("\n"))
    }

    pub fn remove(&mut self, handle: ElementHandle) {
        self.nodes.retain(|n| n.id != handle.0);
    }
}
