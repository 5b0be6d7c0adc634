//! Simulated nodes.

use matterlink_core::MatterNode;
use serde_json::json;
use std::collections::BTreeMap;

/// Basic Information attributes plus one OnOff endpoint.
fn light(node_id: u64, label: &str, on: bool) -> MatterNode {
    let attributes = BTreeMap::from([
        ("0/40/1".to_string(), json!("Acme Lighting")),
        ("0/40/2".to_string(), json!(65521)),
        ("0/40/3".to_string(), json!("Dimmable Bulb")),
        ("0/40/5".to_string(), json!(label)),
        ("0/40/15".to_string(), json!(format!("ACME-{node_id:04}"))),
        ("1/6/0".to_string(), json!(on)),
    ]);
    MatterNode {
        node_id,
        date_commissioned: Some("2024-11-02T09:12:44".into()),
        last_interview: Some("2024-11-02T09:13:05".into()),
        interview_version: 5,
        available: true,
        is_bridge: false,
        attributes,
    }
}

pub fn nodes() -> Vec<MatterNode> {
    vec![
        light(1, "Kitchen", false),
        light(2, "Hallway", true),
        light(3, "", false),
    ]
}
