//! OpenStack MFA Token Manager
//!
//! This program keeps a token-based cloud profile in clouds.yaml fresh for sites that
//! require a one-time code on top of the password.
//!
//! The program performs the following operations:
//! 1. Parses command-line arguments and resolves the target cloud name
//! 2. Locates clouds.yaml
//! 3. Derives a secret-free `<cloud>-long-term` profile on first use
//! 4. Prompts for missing identity fields, the password and the MFA code
//! 5. Exchanges them for a Keystone token and writes a token profile to `<cloud>`

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;

mod cli;
mod clouds;
mod credentials;
mod error;
mod keystone;
mod prompt;
mod updater;

use cli::Args;
use clouds::CloudsConfig;
use keystone::KeystoneClient;
use prompt::{CredentialPrompter, TerminalPrompt};
use updater::ProfileResolver;

/// Main entry point for the OpenStack MFA token manager.
///
/// # Errors
/// Returns an error, which exits with status 1, if:
/// * No cloud name was given via `--os-cloud` or `OS_CLOUD`
/// * clouds.yaml cannot be found, read or parsed
/// * Neither `<cloud>` nor `<cloud>-long-term` exists
/// * The identity service rejects the credentials or cannot be reached
#[tokio::main]
async fn main() -> Result<()> {
    // INFO by default so progress is visible; RUST_LOG overrides.
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let Args {
        os_cloud,
        config_path,
        timeout,
    } = Args::parse();

    let cloud = os_cloud
        .filter(|cloud| !cloud.trim().is_empty())
        .context("OS_CLOUD has not been provided. Run 'os-mfa -h' for more information")?;

    let path = clouds::find_config_file(config_path.as_deref())?;
    debug!("Using {}", path.display());

    let keystone = KeystoneClient::new(Duration::from_secs(timeout))
        .context("Failed to initialise HTTP client")?;
    let mut resolver = ProfileResolver::new(
        CloudsConfig::new(path),
        CredentialPrompter::new(TerminalPrompt),
        keystone,
    );

    resolver.refresh(&cloud).await?;
    Ok(())
}
