use anyhow::{Context, Result};
use std::path::PathBuf;

use super::rollback::print_report;
use crate::arm::ResourceManager;
use crate::cli::auth::resolve_credentials;
use crate::cli::config::Config;
use crate::cli::CreateArgs;
use crate::provision::{rollback, DiskSource, ProvisionContext};
use crate::storage::{BlobServiceClient, BlobStorage};

pub async fn execute_create(args: CreateArgs) -> Result<()> {
    let config = Config::load_or_default()?;
    // Validate everything local before touching Azure
    let mut ctx = ProvisionContext::new(args.vm.into_params(&config)?)?;

    let creds = resolve_credentials(args.subscription, &config)?;
    let arm = creds.arm_client()?;
    let blobs = BlobServiceClient::new()?;

    let params = ctx.params();
    eprintln!("==> Creating VM {}", params.vm_name);
    eprintln!("    Subscription:   {}", creds.subscription_id);
    eprintln!("    Resource Group: {}", params.resource_group);
    eprintln!("    Location:       {}", params.location);
    eprintln!("    Storage:        {}", ctx.names().storage_account);
    eprintln!("    Disks:          {}", ctx.source().len());

    match run_pipeline(&mut ctx, &arm, &blobs).await {
        Ok(vm) => {
            println!("{}", serde_json::to_string_pretty(&vm)?);

            eprintln!("\n==========================================");
            eprintln!("[ok] VM {} created", ctx.vm_name());
            eprintln!("==========================================\n");
            Ok(())
        }
        Err(e) => {
            handle_failure(&ctx, &arm, args.rollback_on_failure).await;
            Err(e)
        }
    }
}

async fn run_pipeline(
    ctx: &mut ProvisionContext,
    arm: &dyn ResourceManager,
    blobs: &dyn BlobStorage,
) -> Result<serde_json::Value> {
    eprintln!("\n==> Ensuring resource group");
    ctx.ensure_resource_group(arm).await?;
    eprintln!("    ✓ {}", ctx.params().resource_group);

    eprintln!("\n==> Creating storage account");
    ctx.create_storage_account(arm).await?;
    eprintln!("    ✓ {}", ctx.names().storage_account);

    let file_count = match ctx.source() {
        DiskSource::Files(files) => Some(files.len()),
        DiskSource::Links(_) => None,
    };
    if let Some(count) = file_count {
        eprintln!("\n==> Uploading {} disk file(s)", count);
        ctx.upload_disk_files(arm, blobs).await?;
        for upload in ctx.uploads() {
            println!("{}", serde_json::to_string(upload)?);
            eprintln!(
                "    ✓ {} → {} ({} bytes sent, {} empty ranges skipped)",
                upload.local_file_path.display(),
                upload.destination_uri,
                upload.bytes_uploaded,
                upload.ranges_skipped
            );
        }
    }

    if ctx.params().skip_existence_check {
        eprintln!("\n==> Skipping disk link existence check");
    } else {
        eprintln!("\n==> Checking disk links");
    }
    ctx.ensure_disk_links_exist(arm, blobs).await?;

    eprintln!("\n==> Creating managed disks");
    ctx.create_managed_disks(arm).await?;
    for (index, id) in ctx.disk_ids().iter().enumerate() {
        let role = if index == 0 {
            "OS".to_string()
        } else {
            format!("LUN {}", index)
        };
        eprintln!("    ✓ {} ({})", id, role);
    }

    eprintln!("\n==> Creating network interface");
    let nic_id = ctx.create_network_interface(arm).await?;
    eprintln!("    ✓ {}", ctx.names().network_interface);

    eprintln!("\n==> Creating virtual machine");
    let vm = ctx.create_virtual_machine(arm, &nic_id).await?;
    Ok(vm)
}

/// Roll back immediately, or save the log for a later `vhd2vm rollback`.
async fn handle_failure(ctx: &ProvisionContext, arm: &dyn ResourceManager, rollback_now: bool) {
    let log = ctx.rollback_log();
    if log.is_empty() {
        return;
    }

    if rollback_now {
        eprintln!("\n==> Rolling back {} created resource(s)", log.resources.len());
        let report = rollback(arm, log).await;
        print_report(&report);
        if report.is_clean() {
            return;
        }
    }

    let path = PathBuf::from(log.file_name());
    match log
        .save(&path)
        .with_context(|| format!("Failed to save rollback log for {}", log.vm_name))
    {
        Ok(()) => {
            eprintln!("\nCreated resources were recorded in {}", path.display());
            eprintln!("To delete them:");
            eprintln!("  vhd2vm rollback {}", path.display());
        }
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "could not save rollback log");
            eprintln!("\nCreated resources:");
            for resource in &log.resources {
                eprintln!("  - {} {}", resource.kind, resource.id);
            }
        }
    }
}
