//! Payloads carried in command results and node events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A commissioned node as the server describes it.
///
/// Attributes are keyed by `endpoint/cluster/attribute` paths, e.g. `0/40/5`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatterNode {
    pub node_id: u64,
    #[serde(default)]
    pub date_commissioned: Option<String>,
    #[serde(default)]
    pub last_interview: Option<String>,
    #[serde(default)]
    pub interview_version: u32,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub is_bridge: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl MatterNode {
    /// Basic Information cluster: NodeLabel.
    pub fn label(&self) -> Option<&str> {
        let label = self.attributes.get("0/40/5")?.as_str()?;
        if label.contains("\u{0}\u{0}") {
            return None;
        }
        let label = label.trim();
        (!label.is_empty()).then_some(label)
    }

    /// Basic Information cluster: VendorName.
    pub fn vendor_name(&self) -> Option<&str> {
        self.attributes.get("0/40/1")?.as_str()
    }

    /// Basic Information cluster: ProductName.
    pub fn product_name(&self) -> Option<&str> {
        self.attributes.get("0/40/3")?.as_str()
    }

    /// Basic Information cluster: SerialNumber.
    pub fn serial_number(&self) -> Option<&str> {
        self.attributes.get("0/40/15")?.as_str()
    }

    /// Copy of this node with one attribute replaced.
    pub fn with_attribute(&self, path: impl Into<String>, value: Value) -> Self {
        let mut node = self.clone();
        node.attributes.insert(path.into(), value);
        node
    }
}

/// Result of `ping_node`: reachability per known address.
pub type NodePingResult = BTreeMap<String, bool>;

/// Result of `get_vendor_names`: vendor id to vendor name.
pub type VendorNames = BTreeMap<String, String>;

/// Result of `open_commissioning_window`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissioningParameters {
    pub setup_pin_code: u32,
    pub setup_manual_code: String,
    pub setup_qr_code: String,
}

/// A device found by `discover_commissionable_nodes` (BLE or mDNS).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionableNodeData {
    pub instance_name: Option<String>,
    pub host_name: Option<String>,
    pub port: Option<u16>,
    pub long_discriminator: Option<u16>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub commissioning_mode: Option<u8>,
    pub device_type: Option<u32>,
    pub device_name: Option<String>,
    pub pairing_instruction: Option<String>,
    pub pairing_hint: Option<u32>,
    pub supports_tcp: Option<bool>,
    pub addresses: Option<Vec<String>>,
}

/// A fabric a node is a member of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatterFabricData {
    pub fabric_id: Option<u64>,
    pub vendor_id: Option<u16>,
    pub fabric_index: Option<u8>,
    pub fabric_label: Option<String>,
    pub vendor_name: Option<String>,
}

/// An available software update, as returned by `check_node_update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatterSoftwareVersion {
    pub vid: u16,
    pub pid: u16,
    pub software_version: u32,
    pub software_version_string: String,
    #[serde(default)]
    pub firmware_information: Option<String>,
    #[serde(default)]
    pub min_applicable_software_version: u32,
    #[serde(default)]
    pub max_applicable_software_version: u32,
    #[serde(default)]
    pub release_notes_url: Option<String>,
    #[serde(default)]
    pub update_source: Option<String>,
}
