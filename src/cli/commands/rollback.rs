use anyhow::{bail, Result};
use std::io::{self, Write};

use crate::cli::auth::resolve_credentials;
use crate::cli::config::Config;
use crate::cli::RollbackArgs;
use crate::provision::{rollback, RollbackLog, RollbackReport};

pub async fn execute_rollback(args: RollbackArgs) -> Result<()> {
    let log = RollbackLog::load(&args.log)?;

    eprintln!("Rolling back VM {}\n", log.vm_name);
    eprintln!("Resource Group: {} (kept)", log.resource_group);
    eprintln!();

    if log.is_empty() {
        eprintln!("Nothing to delete.");
        return Ok(());
    }

    let config = Config::load_or_default()?;
    let creds = resolve_credentials(args.subscription, &config)?;
    eprintln!("Subscription: {}", creds.subscription_id);
    eprintln!();

    if !args.force {
        eprintln!("This will delete, newest first:");
        for resource in log.resources.iter().rev() {
            eprintln!("  - {}: {}", resource.kind, resource.id);
        }
        eprintln!();
        eprint!("Are you sure? (yes/no): ");
        io::stderr().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() != "yes" {
            eprintln!("Aborted.");
            return Ok(());
        }
    }

    let arm = creds.arm_client()?;
    eprintln!("\n==> Deleting resources");
    let report = rollback(&arm, &log).await;
    print_report(&report);

    if !report.is_clean() {
        bail!(
            "{} resource(s) could not be deleted; rerun 'vhd2vm rollback {}' to retry",
            report.failed.len(),
            args.log.display()
        );
    }

    eprintln!("\n==========================================");
    eprintln!("[ok] Rollback complete");
    eprintln!("==========================================\n");

    Ok(())
}

pub(super) fn print_report(report: &RollbackReport) {
    for resource in &report.deleted {
        eprintln!("    ✓ Deleted {}: {}", resource.kind, resource.id);
    }
    for (resource, error) in &report.failed {
        eprintln!("    ✗ {}: {} ({})", resource.kind, resource.id, error);
    }
}
