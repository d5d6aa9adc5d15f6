use anyhow::{bail, Result};
use std::path::Path;

use crate::cli::config::{Config, CONFIG_FILENAME};
use crate::cli::InitArgs;
use crate::upload::MAX_UPLOADER_THREADS;

pub fn execute_init(args: InitArgs) -> Result<()> {
    // Check if config already exists
    if Path::new(CONFIG_FILENAME).exists() && !args.force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            CONFIG_FILENAME
        );
    }

    if let Some(threads) = args.uploader_threads {
        if !(1..=MAX_UPLOADER_THREADS).contains(&threads) {
            bail!(
                "--uploader-threads must be between 1 and {}, got {}",
                MAX_UPLOADER_THREADS,
                threads
            );
        }
    }

    let config = Config {
        subscription_id: args.subscription,
        location: args.location,
        uploader_threads: args.uploader_threads,
        arm_endpoint: args.arm_endpoint,
    };

    config.save()?;

    eprintln!("Created {}", CONFIG_FILENAME);
    if let Some(ref id) = config.subscription_id {
        eprintln!("  subscription_id: {}", id);
    }
    if let Some(ref location) = config.location {
        eprintln!("  location: {}", location);
    }
    if let Some(threads) = config.uploader_threads {
        eprintln!("  uploader_threads: {}", threads);
    }
    if let Some(ref endpoint) = config.arm_endpoint {
        eprintln!("  arm_endpoint: {}", endpoint);
    }
    eprintln!();
    eprintln!("Next: vhd2vm plan -g <resource-group> --os-type <Windows|Linux> --disk-file <vhd>");

    Ok(())
}
