//! Record of created resources and their reverse-order deletion.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::arm::ResourceManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    StorageAccount,
    ManagedDisk,
    VirtualNetwork,
    NetworkSecurityGroup,
    PublicIpAddress,
    NetworkInterface,
    VirtualMachine,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::StorageAccount => "storage account",
            ResourceKind::ManagedDisk => "managed disk",
            ResourceKind::VirtualNetwork => "virtual network",
            ResourceKind::NetworkSecurityGroup => "network security group",
            ResourceKind::PublicIpAddress => "public IP address",
            ResourceKind::NetworkInterface => "network interface",
            ResourceKind::VirtualMachine => "virtual machine",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResource {
    pub kind: ResourceKind,
    pub id: String,
}

/// Resources created by one pipeline run, in creation order.
///
/// The resource group is recorded for reference only and is never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackLog {
    pub vm_name: String,
    pub resource_group: String,
    #[serde(default)]
    pub resource_group_created: bool,
    #[serde(default)]
    pub resources: Vec<CreatedResource>,
}

impl RollbackLog {
    pub fn new(vm_name: &str, resource_group: &str) -> Self {
        Self {
            vm_name: vm_name.to_string(),
            resource_group: resource_group.to_string(),
            resource_group_created: false,
            resources: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: ResourceKind, id: &str) {
        tracing::debug!(%kind, id, "recorded created resource");
        self.resources.push(CreatedResource {
            kind,
            id: id.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Default file name for this run's log.
    pub fn file_name(&self) -> String {
        format!("vhd2vm-rollback-{}.json", self.vm_name)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write rollback log {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rollback log {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse rollback log {}", path.display()))
    }
}

#[derive(Debug, Default)]
pub struct RollbackReport {
    pub deleted: Vec<CreatedResource>,
    pub failed: Vec<(CreatedResource, String)>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletes every recorded resource, newest first.
///
/// A failed deletion is reported and the remaining resources are still attempted.
pub async fn rollback(arm: &dyn ResourceManager, log: &RollbackLog) -> RollbackReport {
    let mut report = RollbackReport::default();
    for resource in log.resources.iter().rev() {
        tracing::info!(kind = %resource.kind, id = %resource.id, "deleting");
        match arm.delete_resource(&resource.id).await {
            Ok(()) => report.deleted.push(resource.clone()),
            Err(e) => {
                tracing::warn!(id = %resource.id, error = %e, "delete failed");
                report.failed.push((resource.clone(), format!("{:#}", e)));
            }
        }
    }
    report
}
