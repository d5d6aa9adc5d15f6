//! Resource names derived from the VM name.

use crate::error::{ProvisionError, Result};

pub const DEFAULT_MAX_NAME_LEN: usize = 80;
pub const STORAGE_ACCOUNT_MAX_LEN: usize = 24;
pub const CONTAINER_MAX_LEN: usize = 63;

/// Builds `prefix-vmName`, optionally dropping hyphens, truncating to `max_len`
/// characters and lower-casing, in that order.
pub fn prefix_based_name(
    prefix: &str,
    vm_name: &str,
    use_hyphen: bool,
    to_lower: bool,
    max_len: usize,
) -> Result<String> {
    if prefix.is_empty() {
        return Err(ProvisionError::invalid_argument(
            "prefix",
            "resource name prefix must not be empty",
        ));
    }
    if max_len == 0 {
        return Err(ProvisionError::out_of_range(
            "maxLength",
            "maximum name length must be positive",
        ));
    }

    let mut name = format!("{}-{}", prefix, vm_name);
    if !use_hyphen {
        name.retain(|c| c != '-');
    }
    if let Some((cut, _)) = name.char_indices().nth(max_len) {
        name.truncate(cut);
    }
    if to_lower {
        name = name.to_lowercase();
    }
    Ok(name)
}

/// Every name the pipeline creates for one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    vm_name: String,
    pub storage_account: String,
    pub container: String,
    pub blob_prefix: String,
    pub virtual_network: String,
    pub subnet: String,
    pub network_security_group: String,
    pub public_ip: String,
    pub network_interface: String,
}

impl ResourceNames {
    pub fn for_vm(vm_name: &str) -> Result<Self> {
        let hyphenated = |prefix: &str| prefix_based_name(prefix, vm_name, true, false, DEFAULT_MAX_NAME_LEN);
        Ok(Self {
            vm_name: vm_name.to_string(),
            storage_account: prefix_based_name("sto", vm_name, false, true, STORAGE_ACCOUNT_MAX_LEN)?,
            // Container names must be lowercase and at most 63 characters
            container: prefix_based_name("cnt", vm_name, false, true, CONTAINER_MAX_LEN)?,
            blob_prefix: prefix_based_name("blb", vm_name, false, false, DEFAULT_MAX_NAME_LEN)?,
            virtual_network: hyphenated("vnet")?,
            subnet: hyphenated("subnet")?,
            network_security_group: hyphenated("nsg")?,
            public_ip: hyphenated("pip")?,
            network_interface: hyphenated("nic")?,
        })
    }

    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    /// `os0-<vm>` for the first disk, `d<i>-<vm>` for the rest.
    pub fn managed_disk(&self, index: usize) -> Result<String> {
        let prefix = if index == 0 {
            "os0".to_string()
        } else {
            format!("d{}", index)
        };
        prefix_based_name(&prefix, &self.vm_name, true, false, DEFAULT_MAX_NAME_LEN)
    }

    /// Blob name for the `index`-th uploaded file.
    pub fn blob_name(&self, index: usize) -> String {
        format!("{}{}.vhd", self.blob_prefix, index)
    }
}
