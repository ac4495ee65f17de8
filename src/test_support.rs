//! Shared fixtures for unit tests.

use crate::state::Topology;

/// A standard four-lane crossing: NorthSouth (L1) against EastWest (L2).
pub fn test_topology() -> Topology {
    Topology {
        label_a: "NorthSouth".to_string(),
        code_a: "L1".to_string(),
        lanes_a: vec!["North".to_string(), "South".to_string()],
        label_b: "EastWest".to_string(),
        code_b: "L2".to_string(),
        lanes_b: vec!["East".to_string(), "West".to_string()],
    }
}
