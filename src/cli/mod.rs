pub mod auth;
pub mod az;
pub mod commands;
pub mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::arm::models::{OsType, SecurityRule};
use crate::provision::VhdVmParams;
use config::Config;

#[derive(Parser)]
#[command(name = "vhd2vm")]
#[command(about = "Turn VHD disk images into Azure virtual machines")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a .vhd2vm.toml with defaults for this directory
    Init(InitArgs),
    /// Upload disks (if given as files) and create the VM
    Create(CreateArgs),
    /// Dry-run: show the names and disk layout that would be created
    Plan(PlanArgs),
    /// Delete the resources recorded in a rollback log
    Rollback(RollbackArgs),
}

#[derive(clap::Args)]
pub struct InitArgs {
    /// Default subscription ID
    #[arg(long)]
    pub subscription: Option<String>,

    /// Default Azure location (e.g. westus)
    #[arg(long)]
    pub location: Option<String>,

    /// Default number of concurrent page writers per upload
    #[arg(long)]
    pub uploader_threads: Option<usize>,

    /// Resource Manager endpoint for non-public clouds
    #[arg(long)]
    pub arm_endpoint: Option<String>,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

/// Inputs shared by `create` and `plan`.
#[derive(clap::Args, Debug, Clone)]
pub struct VmArgs {
    /// Resource group to create the VM in (created if missing)
    #[arg(long, short = 'g')]
    pub resource_group: String,

    /// Azure location (falls back to .vhd2vm.toml)
    #[arg(long, short = 'l', env = "VHD2VM_LOCATION")]
    pub location: Option<String>,

    /// Guest OS type: Windows or Linux
    #[arg(long)]
    pub os_type: OsType,

    /// Existing page blob URL; the first is the OS disk (repeatable)
    #[arg(long = "disk-link")]
    pub disk_links: Vec<String>,

    /// Local VHD file to upload; the first is the OS disk (repeatable)
    #[arg(long = "disk-file")]
    pub disk_files: Vec<PathBuf>,

    /// VM name (generated from location, time and resource group if omitted)
    #[arg(long)]
    pub vm_name: Option<String>,

    /// VM size
    #[arg(long)]
    pub vm_size: Option<String>,

    /// JSON file with the network security rules
    #[arg(long)]
    pub security_rules: Option<PathBuf>,

    /// Virtual network address space
    #[arg(long)]
    pub vnet_address_prefix: Option<String>,

    /// Subnet address prefix
    #[arg(long)]
    pub subnet_address_prefix: Option<String>,

    /// Concurrent page writers per upload (1-64)
    #[arg(long, env = "VHD2VM_UPLOADER_THREADS")]
    pub uploader_threads: Option<usize>,

    /// Do not check that disk links exist before creating disks
    #[arg(long)]
    pub skip_existence_check: bool,
}

impl VmArgs {
    /// Pipeline parameters, filling location and thread count from the config file.
    pub fn into_params(self, config: &Config) -> Result<VhdVmParams> {
        let location = self
            .location
            .or_else(|| config.location.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No location given. Pass --location, set VHD2VM_LOCATION, or run 'vhd2vm init --location <location>'"
                )
            })?;

        let security_rules = match &self.security_rules {
            Some(path) => Some(load_security_rules(path)?),
            None => None,
        };

        let mut params = VhdVmParams::new(&self.resource_group, &location, self.os_type);
        params.disk_links = Some(self.disk_links).filter(|l| !l.is_empty());
        params.disk_files = Some(self.disk_files).filter(|f| !f.is_empty());
        params.vm_name = self.vm_name;
        params.vm_size = self.vm_size;
        params.security_rules = security_rules;
        params.vnet_address_prefix = self.vnet_address_prefix;
        params.subnet_address_prefix = self.subnet_address_prefix;
        params.uploader_threads = self.uploader_threads.or(config.uploader_threads);
        params.skip_existence_check = self.skip_existence_check;
        Ok(params)
    }
}

fn load_security_rules(path: &PathBuf) -> Result<Vec<SecurityRule>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse security rules in {}", path.display()))
}

#[derive(clap::Args)]
pub struct CreateArgs {
    #[command(flatten)]
    pub vm: VmArgs,

    /// Subscription ID (falls back to .vhd2vm.toml, then 'az account show')
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription: Option<String>,

    /// Delete everything created so far if a step fails
    #[arg(long)]
    pub rollback_on_failure: bool,
}

#[derive(clap::Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub vm: VmArgs,
}

#[derive(clap::Args)]
pub struct RollbackArgs {
    /// Rollback log written by a failed 'create'
    pub log: PathBuf,

    /// Subscription ID (falls back to .vhd2vm.toml, then 'az account show')
    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription: Option<String>,

    /// Skip confirmation prompt
    #[arg(long)]
    pub force: bool,
}
