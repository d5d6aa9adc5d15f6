//! Managed disk, network and virtual machine steps.

use super::{ProvisionContext, ResourceKind};
use crate::arm::models::{
    AddressSpace, BootDiagnostics, DataDisk, DiagnosticsProfile, Disk, HardwareProfile,
    IpConfiguration, IpConfigurationProperties, ManagedDiskParameters, NetworkInterface,
    NetworkInterfaceProperties, NetworkProfile, NetworkSecurityGroup,
    NetworkSecurityGroupProperties, OsDisk, PublicIpAddress, PublicIpAddressProperties,
    StorageProfile, SubResource, Subnet, SubnetProperties, VirtualMachine,
    VirtualMachineProperties, VirtualNetwork, VirtualNetworkProperties, CREATE_OPTION_ATTACH,
};
use crate::arm::{
    ResourceManager, DISKS, NETWORK_INTERFACES, NETWORK_SECURITY_GROUPS, PUBLIC_IP_ADDRESSES,
    VIRTUAL_MACHINES, VIRTUAL_NETWORKS,
};
use crate::error::{ProvisionError, Result};
use crate::storage::BlobUri;

impl ProvisionContext {
    /// Imports one managed disk per disk link, in link order.
    pub async fn create_managed_disks(&mut self, arm: &dyn ResourceManager) -> Result<()> {
        let rg = self.params.resource_group.clone();

        for (index, link) in self.disk_links.clone().iter().enumerate() {
            let name = self.names.managed_disk(index)?;
            let storage_account_id = BlobUri::parse(link).and_then(|blob| {
                self.account_ids
                    .get(&blob.storage_account_name().to_lowercase())
                    .cloned()
            });

            let disk = Disk::import(&self.params.location, link, storage_account_id);
            let id = self.record_before_create(arm, ResourceKind::ManagedDisk, DISKS, &name);
            arm.create_disk(&rg, &name, &disk).await?;

            tracing::info!(disk = %name, source = %link, "managed disk created");
            self.disk_ids.push(id);
        }
        Ok(())
    }

    /// Creates the virtual network, security group, public IP and the NIC joining them.
    /// Returns the NIC's resource ID.
    pub async fn create_network_interface(&mut self, arm: &dyn ResourceManager) -> Result<String> {
        let rg = self.params.resource_group.clone();
        let location = self.params.location.clone();
        let names = self.names.clone();

        let vnet = VirtualNetwork {
            id: None,
            name: None,
            location: location.clone(),
            properties: VirtualNetworkProperties {
                address_space: AddressSpace {
                    address_prefixes: vec![self.params.vnet_address_prefix.clone()],
                },
                subnets: vec![Subnet {
                    id: None,
                    name: names.subnet.clone(),
                    properties: SubnetProperties {
                        address_prefix: self.params.subnet_address_prefix.clone(),
                    },
                }],
            },
        };
        self.record_before_create(
            arm,
            ResourceKind::VirtualNetwork,
            VIRTUAL_NETWORKS,
            &names.virtual_network,
        );
        let vnet = arm
            .create_virtual_network(&rg, &names.virtual_network, &vnet)
            .await?;
        let subnet_id = vnet
            .properties
            .subnets
            .first()
            .and_then(|s| s.id.clone())
            .ok_or_else(|| {
                ProvisionError::Remote(anyhow::anyhow!(
                    "virtual network '{}' has no subnet",
                    names.virtual_network
                ))
            })?;

        let nsg = NetworkSecurityGroup {
            id: None,
            name: None,
            location: location.clone(),
            properties: NetworkSecurityGroupProperties {
                security_rules: self.params.security_rules.clone(),
            },
        };
        let nsg_id = self.record_before_create(
            arm,
            ResourceKind::NetworkSecurityGroup,
            NETWORK_SECURITY_GROUPS,
            &names.network_security_group,
        );
        arm.create_network_security_group(&rg, &names.network_security_group, &nsg).await?;

        let pip = PublicIpAddress {
            id: None,
            name: None,
            location: location.clone(),
            properties: PublicIpAddressProperties {
                public_ip_allocation_method: "Dynamic".to_string(),
            },
        };
        let pip_id = self.record_before_create(
            arm,
            ResourceKind::PublicIpAddress,
            PUBLIC_IP_ADDRESSES,
            &names.public_ip,
        );
        arm.create_public_ip_address(&rg, &names.public_ip, &pip).await?;

        let nic = NetworkInterface {
            id: None,
            name: None,
            location,
            properties: NetworkInterfaceProperties {
                ip_configurations: vec![IpConfiguration {
                    name: names.network_interface.clone(),
                    properties: IpConfigurationProperties {
                        subnet: SubResource::new(subnet_id),
                        public_ip_address: Some(SubResource::new(pip_id)),
                    },
                }],
                network_security_group: Some(SubResource::new(nsg_id)),
            },
        };
        let nic_id = self.record_before_create(
            arm,
            ResourceKind::NetworkInterface,
            NETWORK_INTERFACES,
            &names.network_interface,
        );
        arm.create_network_interface(&rg, &names.network_interface, &nic).await?;

        tracing::info!(nic = %names.network_interface, "network interface created");
        Ok(nic_id)
    }

    /// The VM definition: OS disk from the first managed disk, data disks from the rest
    /// with LUN equal to their position.
    pub fn virtual_machine_definition(&self, nic_id: &str) -> Result<VirtualMachine> {
        let (os_disk_id, data_disk_ids) = self.disk_ids.split_first().ok_or_else(|| {
            ProvisionError::invalid_argument("DiskLink", "no managed disk to boot from")
        })?;

        let data_disks = data_disk_ids
            .iter()
            .enumerate()
            .map(|(i, id)| DataDisk {
                lun: (i + 1) as u32,
                create_option: CREATE_OPTION_ATTACH.to_string(),
                managed_disk: ManagedDiskParameters { id: id.clone() },
            })
            .collect();

        Ok(VirtualMachine {
            id: None,
            name: None,
            location: self.params.location.clone(),
            properties: VirtualMachineProperties {
                hardware_profile: HardwareProfile {
                    vm_size: self.params.vm_size.clone(),
                },
                storage_profile: StorageProfile {
                    os_disk: OsDisk {
                        os_type: self.params.os_type,
                        create_option: CREATE_OPTION_ATTACH.to_string(),
                        managed_disk: ManagedDiskParameters {
                            id: os_disk_id.clone(),
                        },
                    },
                    data_disks,
                },
                network_profile: NetworkProfile {
                    network_interfaces: vec![SubResource::new(nic_id)],
                },
                diagnostics_profile: Some(DiagnosticsProfile {
                    boot_diagnostics: BootDiagnostics {
                        enabled: true,
                        storage_uri: self.blob_endpoint()?.to_string(),
                    },
                }),
                provisioning_state: None,
            },
        })
    }

    /// Submits the VM and returns the created resource as the service reports it.
    pub async fn create_virtual_machine(
        &mut self,
        arm: &dyn ResourceManager,
        nic_id: &str,
    ) -> Result<serde_json::Value> {
        let definition = self.virtual_machine_definition(nic_id)?;
        let vm_name = self.params.vm_name.clone();
        self.record_before_create(arm, ResourceKind::VirtualMachine, VIRTUAL_MACHINES, &vm_name);
        let vm = arm
            .create_virtual_machine(&self.params.resource_group, &vm_name, &definition)
            .await?;
        tracing::info!(vm = %self.params.vm_name, "virtual machine created");
        Ok(vm)
    }
}
