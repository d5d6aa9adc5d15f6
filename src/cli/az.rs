use anyhow::{Context, Result};
use std::process::Command;

/// Execute az CLI command and return stdout
fn run_az(args: &[&str]) -> Result<String> {
    let output = Command::new("az")
        .args(args)
        .output()
        .context("Failed to execute az command. Is Azure CLI installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("az command failed: {}", stderr);
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Current subscription ID of the signed-in az session
pub fn get_subscription_id() -> Result<String> {
    run_az(&["account", "show", "--query", "id", "-o", "tsv"])
        .context("Failed to get subscription ID. Run 'az login' first.")
}

/// Access token for `resource` (the Resource Manager endpoint)
pub fn get_access_token(resource: &str) -> Result<String> {
    run_az(&[
        "account",
        "get-access-token",
        "--resource",
        resource,
        "--query",
        "accessToken",
        "-o",
        "tsv",
    ])
    .context("Failed to get an access token. Run 'az login' first.")
}
