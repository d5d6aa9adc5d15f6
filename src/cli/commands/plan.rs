use anyhow::Result;

use crate::cli::config::Config;
use crate::cli::PlanArgs;
use crate::provision::{DiskRole, DiskSource, ProvisionContext};

pub fn execute_plan(args: PlanArgs) -> Result<()> {
    let config = Config::load_or_default()?;
    let generated_name = args.vm.vm_name.is_none();
    let ctx = ProvisionContext::new(args.vm.into_params(&config)?)?;
    let params = ctx.params();
    let names = ctx.names();

    eprintln!("==> VM Provisioning Plan\n");
    eprintln!("Resource Group: {} (created if missing)", params.resource_group);
    eprintln!("Location:       {}", params.location);
    eprintln!();

    eprintln!("Storage Account:");
    eprintln!("  - Name: {}", names.storage_account);
    eprintln!("  - SKU: Standard_GRS");
    if let DiskSource::Files(files) = ctx.source() {
        eprintln!("  - Container: {}", names.container);
        eprintln!(
            "  - Uploads: {} file(s), {} concurrent writer(s) each",
            files.len(),
            params.uploader_threads
        );
    }
    eprintln!();

    eprintln!("Managed Disks (Premium_LRS, imported):");
    for disk in ctx.plan_disks()? {
        let role = match (disk.role, disk.lun) {
            (DiskRole::Os, _) => "OS disk".to_string(),
            (DiskRole::Data, Some(lun)) => format!("data disk, LUN {}", lun),
            (DiskRole::Data, None) => "data disk".to_string(),
        };
        eprintln!("  - {} ({})", disk.name, role);
        match disk.uploaded_as {
            Some(blob) => eprintln!("    from {} → {}", disk.source, blob),
            None => eprintln!("    from {}", disk.source),
        }
    }
    if params.skip_existence_check {
        eprintln!("  Disk link existence check: skipped");
    }
    eprintln!();

    eprintln!("Network:");
    eprintln!(
        "  - Virtual network: {} ({})",
        names.virtual_network, params.vnet_address_prefix
    );
    eprintln!(
        "  - Subnet: {} ({})",
        names.subnet, params.subnet_address_prefix
    );
    eprintln!("  - Security group: {}", names.network_security_group);
    for rule in &params.security_rules {
        eprintln!(
            "    - {}: {} {} port {} (priority {})",
            rule.name,
            rule.properties.access,
            rule.properties.direction,
            rule.properties.destination_port_range,
            rule.properties.priority
        );
    }
    eprintln!("  - Public IP: {} (Dynamic)", names.public_ip);
    eprintln!("  - Network interface: {}", names.network_interface);
    eprintln!();

    eprintln!("Virtual Machine:");
    eprintln!("  - Name: {}", params.vm_name);
    eprintln!("  - Size: {}", params.vm_size);
    eprintln!("  - OS: {}", params.os_type);
    eprintln!("  - Boot diagnostics: {}", names.storage_account);
    eprintln!();

    eprintln!("To create these resources, run 'vhd2vm create' with the same arguments.");
    // Generated names embed a timestamp, so a later run derives different ones
    if generated_name {
        eprintln!("Pass --vm-name {} to keep the generated names.", params.vm_name);
    }

    Ok(())
}
