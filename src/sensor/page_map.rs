//! Node to diagnostic page mapping
//!
//! Deltas are laid out node after node, X-major: every Y node of the first
//! X line, then every Y node of the second, and so on. Each node takes two
//! bytes, so a page of `page_size` bytes holds `page_size / 2` nodes.

use crate::config::NodeCounts;
use crate::error::{Result, RigError};
use crate::types::{NodeAddress, PageLocation};

/// Bytes per node delta
pub const BYTES_PER_NODE: usize = 2;

/// Maps node addresses onto diagnostic pages for one sensor matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMap {
    matrix: NodeCounts,
    page_size: usize,
}

impl PageMap {
    /// Build a map for a controller matrix of `matrix` nodes
    pub fn new(matrix: NodeCounts, page_size: usize) -> Self {
        Self { matrix, page_size }
    }

    pub fn matrix(&self) -> NodeCounts {
        self.matrix
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn nodes_per_page(&self) -> usize {
        self.page_size / BYTES_PER_NODE
    }

    /// Where the delta of `node` lives, if the node is on the matrix
    pub fn location(&self, node: NodeAddress) -> Option<PageLocation> {
        if node.x >= self.matrix.x || node.y >= self.matrix.y {
            return None;
        }
        let node_number = node.x as usize * self.matrix.y as usize + node.y as usize;
        let per_page = self.nodes_per_page();
        let page = u8::try_from(node_number / per_page).ok()?;
        Some(PageLocation {
            page,
            offset: BYTES_PER_NODE * (node_number % per_page),
        })
    }

    /// Like [`location`](Self::location) but failing for off-matrix nodes
    pub fn require(&self, node: NodeAddress) -> Result<PageLocation> {
        self.location(node).ok_or_else(|| {
            RigError::Config(format!(
                "node {} is outside the {}x{} sensor matrix",
                node, self.matrix.x, self.matrix.y
            ))
        })
    }
}

/// Nodes of the (2r+1)x(2r+1) grid around `center`
///
/// The center is moved inward so the whole grid stays inside `bounds`.
/// Nodes are ordered row by row: Y outer, X inner.
pub fn neighborhood_nodes(
    center: NodeAddress,
    radius: u16,
    bounds: NodeCounts,
) -> Result<Vec<NodeAddress>> {
    let side = 2 * radius + 1;
    if bounds.x < side || bounds.y < side {
        return Err(RigError::Config(format!(
            "a {}x{} neighborhood does not fit a {}x{} node grid",
            side, side, bounds.x, bounds.y
        )));
    }
    let cx = center.x.clamp(radius, bounds.x - 1 - radius);
    let cy = center.y.clamp(radius, bounds.y - 1 - radius);

    let mut nodes = Vec::with_capacity(side as usize * side as usize);
    for y in cy - radius..=cy + radius {
        for x in cx - radius..=cx + radius {
            nodes.push(NodeAddress::new(x, y));
        }
    }
    Ok(nodes)
}
