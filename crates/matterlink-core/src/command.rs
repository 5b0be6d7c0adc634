//! The closed set of commands a client may send.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote operations understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    StartListening,
    #[serde(rename = "diagnostics")]
    ServerDiagnostics,
    ServerInfo,
    GetNodes,
    GetNode,
    CommissionWithCode,
    CommissionOnNetwork,
    SetWifiCredentials,
    SetThreadDataset,
    OpenCommissioningWindow,
    DiscoverCommissionableNodes,
    InterviewNode,
    DeviceCommand,
    RemoveNode,
    GetVendorNames,
    ReadAttribute,
    WriteAttribute,
    PingNode,
    ImportTestNode,
    GetNodeIpAddresses,
    GetMatterFabrics,
    RemoveMatterFabric,
    CheckNodeUpdate,
    UpdateNode,
    SetAclEntry,
    SetNodeBinding,
}

impl Command {
    /// Wire name of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartListening => "start_listening",
            Self::ServerDiagnostics => "diagnostics",
            Self::ServerInfo => "server_info",
            Self::GetNodes => "get_nodes",
            Self::GetNode => "get_node",
            Self::CommissionWithCode => "commission_with_code",
            Self::CommissionOnNetwork => "commission_on_network",
            Self::SetWifiCredentials => "set_wifi_credentials",
            Self::SetThreadDataset => "set_thread_dataset",
            Self::OpenCommissioningWindow => "open_commissioning_window",
            Self::DiscoverCommissionableNodes => "discover_commissionable_nodes",
            Self::InterviewNode => "interview_node",
            Self::DeviceCommand => "device_command",
            Self::RemoveNode => "remove_node",
            Self::GetVendorNames => "get_vendor_names",
            Self::ReadAttribute => "read_attribute",
            Self::WriteAttribute => "write_attribute",
            Self::PingNode => "ping_node",
            Self::ImportTestNode => "import_test_node",
            Self::GetNodeIpAddresses => "get_node_ip_addresses",
            Self::GetMatterFabrics => "get_matter_fabrics",
            Self::RemoveMatterFabric => "remove_matter_fabric",
            Self::CheckNodeUpdate => "check_node_update",
            Self::UpdateNode => "update_node",
            Self::SetAclEntry => "set_acl_entry",
            Self::SetNodeBinding => "set_node_binding",
        }
    }

    /// Lowest server schema that implements this command, if the command
    /// was introduced after the first revision.
    pub fn min_schema(self) -> Option<u32> {
        match self {
            Self::GetMatterFabrics | Self::RemoveMatterFabric => Some(3),
            Self::GetNodeIpAddresses => Some(8),
            Self::CheckNodeUpdate | Self::UpdateNode => Some(10),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
