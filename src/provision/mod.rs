//! The disk image to virtual machine pipeline.
//!
//! A [`ProvisionContext`] is built once per invocation from validated parameters and is
//! advanced one step at a time:
//!
//! 1. ensure the resource group
//! 2. create the storage account
//! 3. upload local disk files (when given)
//! 4. check every disk link exists (unless skipped)
//! 5. create one managed disk per link, the first being the OS disk
//! 6. create the network interface and its dependencies
//! 7. create the virtual machine
//!
//! [`ProvisionContext::run`] performs all of them in order. Every resource created along
//! the way is appended to the context's [`RollbackLog`].

mod compute;
pub mod naming;
pub mod params;
pub mod rollback;
mod storage;

pub use naming::{prefix_based_name, ResourceNames};
pub use params::{DiskSource, ResolvedParams, VhdVmParams};
pub use rollback::{rollback, CreatedResource, ResourceKind, RollbackLog, RollbackReport};

use serde::Serialize;
use std::collections::HashMap;

use crate::arm::{resource_id, ResourceManager};
use crate::error::{ProvisionError, Result};
use crate::storage::BlobStorage;
use crate::upload::UploadContext;

/// Per-invocation pipeline state.
pub struct ProvisionContext {
    params: ResolvedParams,
    source: DiskSource,
    names: ResourceNames,
    blob_endpoint: Option<String>,
    disk_links: Vec<String>,
    disk_ids: Vec<String>,
    uploads: Vec<UploadContext>,
    /// Lowercased storage account name to resource ID.
    account_ids: HashMap<String, String>,
    rollback: RollbackLog,
}

impl ProvisionContext {
    /// Applies defaults and validates `params`. Makes no remote calls.
    pub fn new(params: VhdVmParams) -> Result<Self> {
        Self::from_resolved(params.normalize())
    }

    pub fn from_resolved(params: ResolvedParams) -> Result<Self> {
        let source = params.validate()?;
        let names = ResourceNames::for_vm(&params.vm_name)?;
        let disk_links = match &source {
            DiskSource::Links(links) => links.clone(),
            DiskSource::Files(_) => Vec::new(),
        };
        let rollback = RollbackLog::new(&params.vm_name, &params.resource_group);

        Ok(Self {
            params,
            source,
            names,
            blob_endpoint: None,
            disk_links,
            disk_ids: Vec::new(),
            uploads: Vec::new(),
            account_ids: HashMap::new(),
            rollback,
        })
    }

    /// Runs every step and returns the created virtual machine as the service reported it.
    pub async fn run(
        &mut self,
        arm: &dyn ResourceManager,
        blobs: &dyn BlobStorage,
    ) -> Result<serde_json::Value> {
        self.ensure_resource_group(arm).await?;
        self.create_storage_account(arm).await?;
        self.upload_disk_files(arm, blobs).await?;
        self.ensure_disk_links_exist(arm, blobs).await?;
        self.create_managed_disks(arm).await?;
        let nic_id = self.create_network_interface(arm).await?;
        self.create_virtual_machine(arm, &nic_id).await
    }

    pub fn params(&self) -> &ResolvedParams {
        &self.params
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    pub fn vm_name(&self) -> &str {
        &self.params.vm_name
    }

    pub fn source(&self) -> &DiskSource {
        &self.source
    }

    /// Blob URIs backing the VM's disks, OS disk first.
    pub fn disk_links(&self) -> &[String] {
        &self.disk_links
    }

    pub fn disk_ids(&self) -> &[String] {
        &self.disk_ids
    }

    pub fn uploads(&self) -> &[UploadContext] {
        &self.uploads
    }

    pub fn rollback_log(&self) -> &RollbackLog {
        &self.rollback
    }

    /// Disk layout the pipeline will create, without contacting Azure.
    pub fn plan_disks(&self) -> Result<Vec<PlannedDisk>> {
        let sources: Vec<String> = match &self.source {
            DiskSource::Links(links) => links.clone(),
            DiskSource::Files(files) => files.iter().map(|f| f.display().to_string()).collect(),
        };

        sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| {
                let uploaded_as = match self.source {
                    DiskSource::Files(_) => Some(format!(
                        "{}/{}",
                        self.names.container,
                        self.names.blob_name(index)
                    )),
                    DiskSource::Links(_) => None,
                };
                Ok(PlannedDisk {
                    name: self.names.managed_disk(index)?,
                    role: if index == 0 { DiskRole::Os } else { DiskRole::Data },
                    lun: if index == 0 { None } else { Some(index as u32) },
                    source,
                    uploaded_as,
                })
            })
            .collect()
    }

    /// Logs a resource under its ID before the PUT that creates it, and returns the ID.
    /// An accepted PUT that then fails or times out still leaves the resource logged.
    fn record_before_create(
        &mut self,
        arm: &dyn ResourceManager,
        kind: ResourceKind,
        provider_type: &str,
        name: &str,
    ) -> String {
        let id = resource_id(
            arm.subscription_id(),
            &self.params.resource_group,
            provider_type,
            name,
        );
        self.rollback.record(kind, &id);
        id
    }

    fn blob_endpoint(&self) -> Result<&str> {
        self.blob_endpoint.as_deref().ok_or_else(|| {
            ProvisionError::invalid_argument(
                "StorageAccount",
                format!(
                    "storage account '{}' has no primary blob endpoint",
                    self.names.storage_account
                ),
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskRole {
    Os,
    Data,
}

/// One managed disk as it will be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedDisk {
    pub name: String,
    pub role: DiskRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lun: Option<u32>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_as: Option<String>,
}

/// Resource ID from a create response, or a remote error naming the resource.
fn require_id(id: Option<String>, kind: ResourceKind, name: &str) -> Result<String> {
    id.ok_or_else(|| {
        ProvisionError::Remote(anyhow::anyhow!(
            "{} '{}' was created but the response carried no resource ID",
            kind,
            name
        ))
    })
}
