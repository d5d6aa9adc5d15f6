// src/arm/mod.rs
pub mod client;
pub mod models;

pub use client::ArmClient;

use anyhow::Result;
use async_trait::async_trait;

use models::{
    Disk, NetworkInterface, NetworkSecurityGroup, PublicIpAddress, ResourceGroup, StorageAccount,
    StorageAccountCreate, StorageAccountKeys, VirtualMachine, VirtualNetwork,
};

pub const STORAGE_ACCOUNTS: &str = "Microsoft.Storage/storageAccounts";
pub const DISKS: &str = "Microsoft.Compute/disks";
pub const VIRTUAL_MACHINES: &str = "Microsoft.Compute/virtualMachines";
pub const VIRTUAL_NETWORKS: &str = "Microsoft.Network/virtualNetworks";
pub const NETWORK_SECURITY_GROUPS: &str = "Microsoft.Network/networkSecurityGroups";
pub const PUBLIC_IP_ADDRESSES: &str = "Microsoft.Network/publicIPAddresses";
pub const NETWORK_INTERFACES: &str = "Microsoft.Network/networkInterfaces";

/// Resource Manager operations the provisioning pipeline depends on.
///
/// Every create is a create-or-update PUT that resolves once the resource reaches a
/// terminal provisioning state.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Subscription every resource ID is built under.
    fn subscription_id(&self) -> &str;

    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroup>>;

    async fn create_resource_group(&self, name: &str, group: &ResourceGroup)
        -> Result<ResourceGroup>;

    async fn create_storage_account(
        &self,
        resource_group: &str,
        name: &str,
        params: &StorageAccountCreate,
    ) -> Result<StorageAccount>;

    async fn get_storage_account(&self, resource_group: &str, name: &str)
        -> Result<StorageAccount>;

    /// All storage accounts in the subscription.
    async fn list_storage_accounts(&self) -> Result<Vec<StorageAccount>>;

    async fn list_storage_account_keys(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<StorageAccountKeys>;

    async fn create_disk(&self, resource_group: &str, name: &str, disk: &Disk) -> Result<Disk>;

    async fn create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        vnet: &VirtualNetwork,
    ) -> Result<VirtualNetwork>;

    async fn create_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
        nsg: &NetworkSecurityGroup,
    ) -> Result<NetworkSecurityGroup>;

    async fn create_public_ip_address(
        &self,
        resource_group: &str,
        name: &str,
        pip: &PublicIpAddress,
    ) -> Result<PublicIpAddress>;

    async fn create_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface>;

    /// Returns the VM exactly as the service reports it.
    async fn create_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<serde_json::Value>;

    /// Deletes a resource by its full ID. Deleting a missing resource succeeds.
    async fn delete_resource(&self, id: &str) -> Result<()>;
}

/// Resource group segment of an ARM resource ID.
pub fn resource_group_of(id: &str) -> Option<&str> {
    let mut segments = id.split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("resourceGroups") {
            return segments.next().filter(|s| !s.is_empty());
        }
    }
    None
}

/// ID of a resource group scoped resource, known before the resource exists.
pub fn resource_id(
    subscription_id: &str,
    resource_group: &str,
    provider_type: &str,
    name: &str,
) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
        subscription_id, resource_group, provider_type, name
    )
}
