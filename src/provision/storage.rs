//! Resource group, storage account, upload and blob existence steps.

use std::path::Path;

use super::{require_id, DiskSource, ProvisionContext, ResourceKind};
use crate::arm::models::{ResourceGroup, StorageAccount, StorageAccountCreate};
use crate::arm::{resource_group_of, ResourceManager, STORAGE_ACCOUNTS};
use crate::error::{ProvisionError, Result};
use crate::storage::{is_channel_required, BlobStorage, BlobUri, StorageCredentials};
use crate::upload::{upload_vhd, UploadParameters};
use crate::vhd::{DiskType, VhdError, VirtualDisk};

impl ProvisionContext {
    /// Creates the resource group unless one with the same name (any case) exists.
    pub async fn ensure_resource_group(&mut self, arm: &dyn ResourceManager) -> Result<()> {
        let name = &self.params.resource_group;
        let groups = arm.list_resource_groups().await?;
        let exists = groups.iter().any(|g| {
            g.name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        });

        if exists {
            tracing::info!(resource_group = %name, "resource group exists");
            return Ok(());
        }

        let group = ResourceGroup {
            location: self.params.location.clone(),
            ..Default::default()
        };
        arm.create_resource_group(name, &group).await?;
        self.rollback.resource_group_created = true;
        tracing::info!(resource_group = %name, location = %self.params.location, "resource group created");
        Ok(())
    }

    /// Creates the geo-redundant storage account and reads back its blob endpoint.
    pub async fn create_storage_account(&mut self, arm: &dyn ResourceManager) -> Result<()> {
        let rg = self.params.resource_group.clone();
        let name = self.names.storage_account.clone();

        let id = self.record_before_create(arm, ResourceKind::StorageAccount, STORAGE_ACCOUNTS, &name);
        self.account_ids.insert(name.to_lowercase(), id);

        arm.create_storage_account(
            &rg,
            &name,
            &StorageAccountCreate::geo_redundant(&self.params.location),
        )
        .await?;

        let account: StorageAccount = arm.get_storage_account(&rg, &name).await?;

        self.blob_endpoint = account.blob_endpoint().map(str::to_string);
        let endpoint = self.blob_endpoint()?;
        tracing::info!(storage_account = %name, endpoint, "storage account ready");
        Ok(())
    }

    /// Uploads each local disk file as a page blob and makes the uploaded blobs the
    /// disk links, in input order. Does nothing when disk links were given.
    pub async fn upload_disk_files(
        &mut self,
        arm: &dyn ResourceManager,
        blobs: &dyn BlobStorage,
    ) -> Result<()> {
        let files = match &self.source {
            DiskSource::Files(files) => files.clone(),
            DiskSource::Links(_) => {
                tracing::debug!("no disk files given; skipping upload");
                return Ok(());
            }
        };

        // Reject unusable files before the first byte goes out
        let disks = files
            .iter()
            .map(|path| open_disk_file(path))
            .collect::<Result<Vec<_>>>()?;

        let mut uploaded = Vec::with_capacity(disks.len());
        for (index, disk) in disks.iter().enumerate() {
            let endpoint = self.blob_endpoint()?;
            let blob_name = self.names.blob_name(index);
            let destination = BlobUri::under_endpoint(endpoint, &self.names.container, &blob_name)
                .ok_or_else(|| {
                    ProvisionError::invalid_argument(
                        "destinationUri",
                        format!(
                            "cannot build a blob URL from endpoint '{}' and '{}/{}'",
                            endpoint, self.names.container, blob_name
                        ),
                    )
                })?;

            let credentials = self.credentials_for(arm, &destination).await?;
            let params = UploadParameters {
                local_file: disk.path().to_path_buf(),
                destination,
                credentials,
                uploader_threads: self.params.uploader_threads,
            };

            let context = upload_vhd(blobs, disk, &params).await?;
            uploaded.push(context.destination_uri.clone());
            self.uploads.push(context);
        }

        self.disk_links = uploaded;
        Ok(())
    }

    /// Credentials for writing to a blob in the pipeline's own resource group.
    async fn credentials_for(
        &self,
        arm: &dyn ResourceManager,
        blob: &BlobUri,
    ) -> Result<StorageCredentials> {
        if !is_channel_required(blob) {
            return Ok(StorageCredentials::for_public_uri(blob));
        }
        account_key_credentials(arm, &self.params.resource_group, blob.storage_account_name())
            .await
    }

    /// Fails unless every disk link names an existing page blob.
    pub async fn ensure_disk_links_exist(
        &mut self,
        arm: &dyn ResourceManager,
        blobs: &dyn BlobStorage,
    ) -> Result<()> {
        if self.params.skip_existence_check {
            tracing::info!("skipping disk link existence check");
            return Ok(());
        }

        let accounts = arm.list_storage_accounts().await?;

        for link in self.disk_links.clone() {
            let blob = BlobUri::parse(&link).ok_or_else(|| {
                ProvisionError::invalid_argument("DiskLink", format!("invalid blob URL '{}'", link))
            })?;
            let account_name = blob.storage_account_name();

            let mut matching = accounts.iter().filter(|a| {
                a.name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(account_name))
            });
            let account = match (matching.next(), matching.next()) {
                (Some(account), None) => account,
                _ => {
                    return Err(ProvisionError::NotFound(format!(
                        "storage account '{}' of disk link '{}'",
                        account_name, link
                    )))
                }
            };
            let account_id = require_id(account.id.clone(), ResourceKind::StorageAccount, account_name)?;
            let account_rg = resource_group_of(&account_id)
                .unwrap_or(&self.params.resource_group)
                .to_string();

            let credentials = account_key_credentials(arm, &account_rg, account_name).await?;
            let containers = blobs.list_containers(blob.base_uri(), &credentials).await?;
            let container_exists = containers
                .iter()
                .any(|c| c.eq_ignore_ascii_case(blob.container()));

            if !container_exists || !blobs.page_blob_exists(&blob, &credentials).await? {
                return Err(ProvisionError::out_of_range(
                    "DiskLink",
                    format!("Disk's page blob does not exist: '{}'", link),
                ));
            }

            self.account_ids
                .entry(account_name.to_lowercase())
                .or_insert(account_id);
            tracing::debug!(link = %link, "disk link exists");
        }
        Ok(())
    }
}

async fn account_key_credentials(
    arm: &dyn ResourceManager,
    resource_group: &str,
    account: &str,
) -> Result<StorageCredentials> {
    let keys = arm.list_storage_account_keys(resource_group, account).await?;
    let key = keys.first_available().ok_or_else(|| {
        ProvisionError::invalid_argument(
            "StorageAccount",
            format!("no access key available for storage account '{}'", account),
        )
    })?;
    Ok(StorageCredentials::shared_key(account, key)?)
}

/// Opens a local VHD, rejecting differencing disks and truncated fixed disks.
fn open_disk_file(path: &Path) -> Result<VirtualDisk> {
    let disk = VirtualDisk::open(path).map_err(|e| match e {
        VhdError::Unsupported(disk_type) => ProvisionError::invalid_argument(
            "DiskFile",
            format!("'{}' is a {} VHD, which cannot be uploaded", path.display(), disk_type),
        ),
        source => ProvisionError::DiskFile {
            path: path.display().to_string(),
            source,
        },
    })?;

    if disk.disk_type() == DiskType::Fixed && !disk.is_sector_aligned() {
        return Err(ProvisionError::out_of_range(
            "DiskFile",
            format!("Given vhd file '{}' is a corrupted fixed vhd", path.display()),
        ));
    }
    Ok(disk)
}
