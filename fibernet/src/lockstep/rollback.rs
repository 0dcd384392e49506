//! Rollback notification for state living outside the lockstep world.
//!
//! Presentation state (interpolated positions, effects, UI) is mutated
//! while frames are predicted. When a prediction is undone, every node of
//! the tree is told the frame the simulation went back to.

/// A node that must react when predicted frames are undone.
pub trait RollbackNode {
    /// The simulation was rolled back to `frame`.
    fn rollback(&mut self, frame: u32);

    /// Child nodes, notified after their parent.
    fn children_mut(&mut self) -> &mut [Box<dyn RollbackNode>] {
        &mut []
    }
}

/// Notify `node` and all its descendants, parent first.
pub fn walk_rollback(node: &mut dyn RollbackNode, frame: u32) {
    node.rollback(frame);
    for child in node.children_mut() {
        walk_rollback(child.as_mut(), frame);
    }
}
