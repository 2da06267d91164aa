//! Higher-level analyses over aggregated records: landmark scoring,
//! milestone detection, timelines, research trees, and citation graphs.

pub mod branches;
pub mod citation_tree;
pub mod landmark;
pub mod milestones;
pub mod timeline;
