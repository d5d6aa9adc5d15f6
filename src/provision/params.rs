//! Pipeline inputs: defaults and validation.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::PathBuf;

use crate::arm::models::{OsType, SecurityRule};
use crate::error::{ProvisionError, Result};
use crate::upload::{DEFAULT_UPLOADER_THREADS, MAX_UPLOADER_THREADS};

pub const DEFAULT_VM_SIZE: &str = "Standard_A2";
pub const DEFAULT_VNET_ADDRESS_PREFIX: &str = "10.0.0.0/16";
pub const DEFAULT_SUBNET_ADDRESS_PREFIX: &str = "10.0.0.0/24";

const VM_NAME_SUFFIX_LEN: usize = 11;

/// Inputs to the pipeline as given by the caller.
#[derive(Debug, Clone)]
pub struct VhdVmParams {
    pub resource_group: String,
    pub location: String,
    pub os_type: OsType,
    pub disk_links: Option<Vec<String>>,
    pub disk_files: Option<Vec<PathBuf>>,
    pub vm_name: Option<String>,
    pub vm_size: Option<String>,
    pub security_rules: Option<Vec<SecurityRule>>,
    pub vnet_address_prefix: Option<String>,
    pub subnet_address_prefix: Option<String>,
    pub uploader_threads: Option<usize>,
    pub skip_existence_check: bool,
}

impl VhdVmParams {
    pub fn new(resource_group: &str, location: &str, os_type: OsType) -> Self {
        Self {
            resource_group: resource_group.to_string(),
            location: location.to_string(),
            os_type,
            disk_links: None,
            disk_files: None,
            vm_name: None,
            vm_size: None,
            security_rules: None,
            vnet_address_prefix: None,
            subnet_address_prefix: None,
            uploader_threads: None,
            skip_existence_check: false,
        }
    }

    /// Fills every unset optional input with its default.
    pub fn normalize(self) -> ResolvedParams {
        let suffix = random_suffix();
        self.normalize_with(Utc::now(), &suffix)
    }

    /// [`normalize`](Self::normalize) with a fixed clock and name suffix.
    pub fn normalize_with(self, now: DateTime<Utc>, suffix: &str) -> ResolvedParams {
        let vm_name = match self.vm_name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => default_vm_name(&self.location, &self.resource_group, now, suffix),
        };

        ResolvedParams {
            resource_group: self.resource_group,
            location: self.location,
            os_type: self.os_type,
            disk_links: self.disk_links,
            disk_files: self.disk_files,
            vm_name,
            vm_size: self
                .vm_size
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_VM_SIZE.to_string()),
            security_rules: self.security_rules.unwrap_or_else(default_security_rules),
            vnet_address_prefix: self
                .vnet_address_prefix
                .unwrap_or_else(|| DEFAULT_VNET_ADDRESS_PREFIX.to_string()),
            subnet_address_prefix: self
                .subnet_address_prefix
                .unwrap_or_else(|| DEFAULT_SUBNET_ADDRESS_PREFIX.to_string()),
            uploader_threads: self.uploader_threads.unwrap_or(DEFAULT_UPLOADER_THREADS),
            skip_existence_check: self.skip_existence_check,
        }
    }
}

/// Inputs with every default applied.
#[derive(Debug, Clone)]
pub struct ResolvedParams {
    pub resource_group: String,
    pub location: String,
    pub os_type: OsType,
    pub disk_links: Option<Vec<String>>,
    pub disk_files: Option<Vec<PathBuf>>,
    pub vm_name: String,
    pub vm_size: String,
    pub security_rules: Vec<SecurityRule>,
    pub vnet_address_prefix: String,
    pub subnet_address_prefix: String,
    pub uploader_threads: usize,
    pub skip_existence_check: bool,
}

/// Where the VM's disks come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DiskSource {
    /// Page blobs that already exist.
    Links(Vec<String>),
    /// Local VHD files to upload first.
    Files(Vec<PathBuf>),
}

impl DiskSource {
    pub fn len(&self) -> usize {
        match self {
            DiskSource::Links(links) => links.len(),
            DiskSource::Files(files) => files.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResolvedParams {
    /// Checks the inputs without touching any remote service.
    pub fn validate(&self) -> Result<DiskSource> {
        if !(1..=MAX_UPLOADER_THREADS).contains(&self.uploader_threads) {
            return Err(ProvisionError::invalid_argument(
                "UploaderThreads",
                format!(
                    "must be between 1 and {}, got {}",
                    MAX_UPLOADER_THREADS, self.uploader_threads
                ),
            ));
        }

        match (&self.disk_links, &self.disk_files) {
            (Some(_), Some(_)) => Err(ProvisionError::invalid_argument(
                "DiskLink",
                "DiskLink and DiskFile are mutually exclusive",
            )),
            (None, None) => Err(ProvisionError::invalid_argument(
                "DiskLink",
                "one of DiskLink or DiskFile is required",
            )),
            (Some(links), None) if links.is_empty() => Err(ProvisionError::invalid_argument(
                "DiskLink",
                "at least one disk link is required",
            )),
            (None, Some(files)) if files.is_empty() => Err(ProvisionError::invalid_argument(
                "DiskFile",
                "at least one disk file is required",
            )),
            (Some(links), None) => Ok(DiskSource::Links(links.clone())),
            (None, Some(files)) => Ok(DiskSource::Files(files.clone())),
        }
    }
}

/// `vm-<location><yyyyMMddHHmmss><resourceGroup><suffix>`
pub fn default_vm_name(
    location: &str,
    resource_group: &str,
    now: DateTime<Utc>,
    suffix: &str,
) -> String {
    format!(
        "vm-{}{}{}{}",
        location,
        now.format("%Y%m%d%H%M%S"),
        resource_group,
        suffix
    )
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VM_NAME_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Inbound TCP 3389, 80 and 8080 from anywhere.
pub fn default_security_rules() -> Vec<SecurityRule> {
    vec![
        SecurityRule::allow_inbound_tcp(3389, 110),
        SecurityRule::allow_inbound_tcp(80, 120),
        SecurityRule::allow_inbound_tcp(8080, 130),
    ]
}
