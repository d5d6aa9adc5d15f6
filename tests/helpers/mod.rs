#![allow(dead_code)] // Test helpers appear unused when compiled independently

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use zerocopy::IntoBytes;

use vhd2vm::arm::models::{
    Disk, Endpoints, NetworkInterface, NetworkSecurityGroup, PublicIpAddress, ResourceGroup,
    StorageAccount, StorageAccountCreate, StorageAccountKey, StorageAccountKeys,
    StorageAccountProperties, VirtualMachine, VirtualNetwork,
};
use vhd2vm::arm::ResourceManager;
use vhd2vm::storage::{BlobStorage, BlobUri, StorageCredentials, MAX_PAGE_WRITE};
use vhd2vm::vhd::{DynamicHeader, VhdFooter};

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000001";
/// base64("fake-account-key")
pub const ACCOUNT_KEY: &str = "ZmFrZS1hY2NvdW50LWtleQ==";

pub fn resource_id(resource_group: &str, provider_type: &str, name: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
        SUBSCRIPTION, resource_group, provider_type, name
    )
}

pub fn storage_account(resource_group: &str, name: &str) -> StorageAccount {
    StorageAccount {
        id: Some(resource_id(
            resource_group,
            "Microsoft.Storage/storageAccounts",
            name,
        )),
        name: Some(name.to_string()),
        location: Some("westus".to_string()),
        properties: Some(StorageAccountProperties {
            provisioning_state: Some("Succeeded".to_string()),
            primary_endpoints: Some(Endpoints {
                blob: Some(format!("https://{}.blob.core.windows.net/", name)),
            }),
        }),
    }
}

/// In-memory Resource Manager recording every call.
#[derive(Default)]
pub struct FakeArm {
    pub calls: Mutex<Vec<String>>,
    pub resource_groups: Mutex<Vec<ResourceGroup>>,
    pub storage_accounts: Mutex<Vec<StorageAccount>>,
    pub disks: Mutex<Vec<(String, Disk)>>,
    pub virtual_networks: Mutex<Vec<(String, VirtualNetwork)>>,
    pub security_groups: Mutex<Vec<(String, NetworkSecurityGroup)>>,
    pub public_ips: Mutex<Vec<(String, PublicIpAddress)>>,
    pub network_interfaces: Mutex<Vec<(String, NetworkInterface)>>,
    /// VM definitions as submitted
    pub virtual_machines: Mutex<Vec<(String, VirtualMachine)>>,
    /// VM bodies as returned, with the service-populated fields ARM adds
    pub vm_responses: Mutex<Vec<serde_json::Value>>,
    pub deleted: Mutex<Vec<String>>,
    /// Operation name that fails when called
    pub fail_on: Mutex<Option<&'static str>>,
    /// Create operation that stores its resource and then reports a failed provisioning
    pub fail_after_create: Mutex<Option<&'static str>>,
    /// Resource IDs whose deletion fails
    pub undeletable: Mutex<BTreeSet<String>>,
}

impl FakeArm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource_group(self, name: &str) -> Self {
        self.resource_groups.lock().unwrap().push(ResourceGroup {
            id: Some(format!("/subscriptions/{}/resourceGroups/{}", SUBSCRIPTION, name)),
            name: Some(name.to_string()),
            location: "westus".to_string(),
        });
        self
    }

    pub fn with_storage_account(self, resource_group: &str, name: &str) -> Self {
        self.storage_accounts
            .lock()
            .unwrap()
            .push(storage_account(resource_group, name));
        self
    }

    pub fn fail_on(self, operation: &'static str) -> Self {
        *self.fail_on.lock().unwrap() = Some(operation);
        self
    }

    pub fn fail_after_create(self, operation: &'static str) -> Self {
        *self.fail_after_create.lock().unwrap() = Some(operation);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, operation: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(operation))
    }

    fn call(&self, operation: &'static str, detail: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", operation, detail).trim_end().to_string());
        if *self.fail_on.lock().unwrap() == Some(operation) {
            bail!("injected failure in {}", operation);
        }
        Ok(())
    }

    fn provisioned(&self, operation: &'static str, name: &str) -> Result<()> {
        if *self.fail_after_create.lock().unwrap() == Some(operation) {
            bail!("Provisioning of {} ended in state 'Failed'", name);
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceManager for FakeArm {
    fn subscription_id(&self) -> &str {
        SUBSCRIPTION
    }

    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>> {
        self.call("list_resource_groups", "")?;
        Ok(self.resource_groups.lock().unwrap().clone())
    }

    async fn create_resource_group(&self, name: &str, group: &ResourceGroup) -> Result<ResourceGroup> {
        self.call("create_resource_group", name)?;
        let created = ResourceGroup {
            id: Some(format!("/subscriptions/{}/resourceGroups/{}", SUBSCRIPTION, name)),
            name: Some(name.to_string()),
            location: group.location.clone(),
        };
        self.resource_groups.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        params: &StorageAccountCreate,
    ) -> Result<StorageAccount> {
        self.call("create_storage_account", name)?;
        assert_eq!(params.sku.name, "Standard_GRS");
        let account = storage_account(resource_group, name);
        self.storage_accounts.lock().unwrap().push(account.clone());
        self.provisioned("create_storage_account", name)?;
        Ok(account)
    }

    async fn get_storage_account(&self, _resource_group: &str, name: &str) -> Result<StorageAccount> {
        self.call("get_storage_account", name)?;
        self.storage_accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("storage account {} not found", name))
    }

    async fn list_storage_accounts(&self) -> Result<Vec<StorageAccount>> {
        self.call("list_storage_accounts", "")?;
        Ok(self.storage_accounts.lock().unwrap().clone())
    }

    async fn list_storage_account_keys(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccountKeys> {
        self.call("list_storage_account_keys", &format!("{}/{}", resource_group, name))?;
        Ok(StorageAccountKeys {
            keys: vec![StorageAccountKey {
                key_name: "key1".to_string(),
                value: ACCOUNT_KEY.to_string(),
                permissions: Some("FULL".to_string()),
            }],
        })
    }

    async fn create_disk(&self, resource_group: &str, name: &str, disk: &Disk) -> Result<Disk> {
        self.call("create_disk", name)?;
        let mut created = disk.clone();
        created.id = Some(resource_id(resource_group, "Microsoft.Compute/disks", name));
        created.name = Some(name.to_string());
        self.disks
            .lock()
            .unwrap()
            .push((name.to_string(), created.clone()));
        self.provisioned("create_disk", name)?;
        Ok(created)
    }

    async fn create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        vnet: &VirtualNetwork,
    ) -> Result<VirtualNetwork> {
        self.call("create_virtual_network", name)?;
        let id = resource_id(resource_group, "Microsoft.Network/virtualNetworks", name);
        let mut created = vnet.clone();
        for subnet in &mut created.properties.subnets {
            subnet.id = Some(format!("{}/subnets/{}", id, subnet.name));
        }
        created.id = Some(id);
        self.virtual_networks
            .lock()
            .unwrap()
            .push((name.to_string(), created.clone()));
        self.provisioned("create_virtual_network", name)?;
        Ok(created)
    }

    async fn create_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
        nsg: &NetworkSecurityGroup,
    ) -> Result<NetworkSecurityGroup> {
        self.call("create_network_security_group", name)?;
        let mut created = nsg.clone();
        created.id = Some(resource_id(
            resource_group,
            "Microsoft.Network/networkSecurityGroups",
            name,
        ));
        self.security_groups
            .lock()
            .unwrap()
            .push((name.to_string(), created.clone()));
        self.provisioned("create_network_security_group", name)?;
        Ok(created)
    }

    async fn create_public_ip_address(
        &self,
        resource_group: &str,
        name: &str,
        pip: &PublicIpAddress,
    ) -> Result<PublicIpAddress> {
        self.call("create_public_ip_address", name)?;
        let mut created = pip.clone();
        created.id = Some(resource_id(
            resource_group,
            "Microsoft.Network/publicIPAddresses",
            name,
        ));
        self.public_ips
            .lock()
            .unwrap()
            .push((name.to_string(), created.clone()));
        self.provisioned("create_public_ip_address", name)?;
        Ok(created)
    }

    async fn create_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface> {
        self.call("create_network_interface", name)?;
        let mut created = nic.clone();
        created.id = Some(resource_id(
            resource_group,
            "Microsoft.Network/networkInterfaces",
            name,
        ));
        self.network_interfaces
            .lock()
            .unwrap()
            .push((name.to_string(), created.clone()));
        self.provisioned("create_network_interface", name)?;
        Ok(created)
    }

    async fn create_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<serde_json::Value> {
        self.call("create_virtual_machine", name)?;
        self.virtual_machines
            .lock()
            .unwrap()
            .push((name.to_string(), vm.clone()));

        let mut response = serde_json::to_value(vm)?;
        response["id"] = json!(resource_id(
            resource_group,
            "Microsoft.Compute/virtualMachines",
            name
        ));
        response["name"] = json!(name);
        response["type"] = json!("Microsoft.Compute/virtualMachines");
        response["properties"]["vmId"] = json!("2b1f4a7e-93c0-4d7b-a2f6-0c5e9e1d8a44");
        response["properties"]["provisioningState"] = json!("Succeeded");
        response["properties"]["storageProfile"]["osDisk"]["name"] = json!(format!("os0-{}", name));
        response["properties"]["storageProfile"]["osDisk"]["caching"] = json!("ReadWrite");
        self.vm_responses.lock().unwrap().push(response.clone());

        self.provisioned("create_virtual_machine", name)?;
        Ok(response)
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        self.call("delete_resource", id)?;
        if self.undeletable.lock().unwrap().contains(id) {
            bail!("HTTP 409 Conflict: {} is in use", id);
        }
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// In-memory Blob service holding page blob contents.
#[derive(Default)]
pub struct FakeBlobs {
    pub calls: Mutex<Vec<String>>,
    /// Container names per account base URI
    pub containers: Mutex<BTreeMap<String, BTreeSet<String>>>,
    /// Page blob contents by URI
    pub blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Page writes as (uri, offset, len)
    pub writes: Mutex<Vec<(String, u64, usize)>>,
}

impl FakeBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing page blob (and its container).
    pub fn with_blob(self, uri: &str, len: usize) -> Self {
        let blob = BlobUri::parse(uri).expect("test blob URI");
        self.containers
            .lock()
            .unwrap()
            .entry(blob.base_uri().to_string())
            .or_default()
            .insert(blob.container().to_string());
        self.blobs
            .lock()
            .unwrap()
            .insert(blob.without_query(), vec![0; len]);
        self
    }

    /// Registers an empty container under an account base URI.
    pub fn with_container(self, base_uri: &str, container: &str) -> Self {
        self.containers
            .lock()
            .unwrap()
            .entry(base_uri.to_string())
            .or_default()
            .insert(container.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn blob(&self, uri: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(uri).cloned()
    }

    fn call(&self, operation: &str, detail: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", operation, detail));
    }
}

#[async_trait]
impl BlobStorage for FakeBlobs {
    async fn list_containers(
        &self,
        base_uri: &str,
        credentials: &StorageCredentials,
    ) -> Result<Vec<String>> {
        self.call("list_containers", base_uri);
        assert!(matches!(credentials, StorageCredentials::SharedKey { .. }));
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(base_uri)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_container_if_not_exists(
        &self,
        blob: &BlobUri,
        _credentials: &StorageCredentials,
    ) -> Result<()> {
        self.call("create_container", blob.container());
        self.containers
            .lock()
            .unwrap()
            .entry(blob.base_uri().to_string())
            .or_default()
            .insert(blob.container().to_string());
        Ok(())
    }

    async fn page_blob_exists(&self, blob: &BlobUri, _credentials: &StorageCredentials) -> Result<bool> {
        self.call("page_blob_exists", &blob.without_query());
        Ok(self.blobs.lock().unwrap().contains_key(&blob.without_query()))
    }

    async fn create_page_blob(
        &self,
        blob: &BlobUri,
        size: u64,
        _credentials: &StorageCredentials,
    ) -> Result<()> {
        self.call("create_page_blob", &blob.without_query());
        assert_eq!(size % 512, 0, "page blob size must be sector aligned");
        self.blobs
            .lock()
            .unwrap()
            .insert(blob.without_query(), vec![0; size as usize]);
        Ok(())
    }

    async fn put_page(
        &self,
        blob: &BlobUri,
        offset: u64,
        data: Bytes,
        _credentials: &StorageCredentials,
    ) -> Result<()> {
        assert_eq!(offset % 512, 0, "page offset must be sector aligned");
        assert_eq!(data.len() % 512, 0, "page length must be sector aligned");
        assert!(data.len() as u64 <= MAX_PAGE_WRITE);

        let uri = blob.without_query();
        let mut blobs = self.blobs.lock().unwrap();
        let Some(content) = blobs.get_mut(&uri) else {
            bail!("HTTP 404: blob {} does not exist", uri);
        };
        let start = offset as usize;
        content[start..start + data.len()].copy_from_slice(&data);
        self.writes
            .lock()
            .unwrap()
            .push((uri, offset, data.len()));
        Ok(())
    }
}

/// Fixed VHD whose data is `data_len` bytes, the first sector filled with `fill`.
pub fn fixed_vhd(data_len: usize, fill: u8) -> NamedTempFile {
    assert_eq!(data_len % 512, 0, "fixed VHD data must be whole sectors");
    let mut data = vec![0u8; data_len];
    let head = data_len.min(512);
    data[..head].fill(fill);

    let tmp = NamedTempFile::new().unwrap();
    tmp.as_file().write_all(&data).unwrap();
    tmp.as_file()
        .write_all(VhdFooter::new_fixed(data_len as u64, [5; 16]).as_bytes())
        .unwrap();
    tmp
}

/// Fixed VHD whose length is not a whole number of sectors.
pub fn truncated_fixed_vhd() -> NamedTempFile {
    let tmp = NamedTempFile::new().unwrap();
    tmp.as_file().write_all(&[1u8; 1025]).unwrap();
    tmp.as_file()
        .write_all(VhdFooter::new_fixed(1024, [6; 16]).as_bytes())
        .unwrap();
    tmp
}

pub const DYNAMIC_BLOCK: usize = 4096;

/// Dynamic VHD of 3 blocks of 4 KiB with blocks 0 (0xAA) and 2 (0xBB) allocated.
pub fn dynamic_vhd() -> NamedTempFile {
    let virtual_size = 3 * DYNAMIC_BLOCK as u64;
    let mut footer = VhdFooter::new_fixed(virtual_size, [9; 16]);
    footer.disk_type = VhdFooter::DISK_TYPE_DYNAMIC.into();
    footer.data_offset = 512u64.into();
    footer.checksum = footer.compute_checksum().into();

    let header = DynamicHeader::new(1536, 3, DYNAMIC_BLOCK as u32);
    let mut image = Vec::new();
    image.extend_from_slice(footer.as_bytes());
    image.extend_from_slice(header.as_bytes());

    let mut bat = vec![0xFFu8; 512];
    bat[0..4].copy_from_slice(&4u32.to_be_bytes());
    bat[8..12].copy_from_slice(&13u32.to_be_bytes());
    image.extend_from_slice(&bat);

    image.extend_from_slice(&[0xFF; 512]);
    image.extend_from_slice(&[0xAA; DYNAMIC_BLOCK]);
    image.extend_from_slice(&[0xFF; 512]);
    image.extend_from_slice(&[0xBB; DYNAMIC_BLOCK]);
    image.extend_from_slice(footer.as_bytes());

    let tmp = NamedTempFile::new().unwrap();
    tmp.as_file().write_all(&image).unwrap();
    tmp
}
