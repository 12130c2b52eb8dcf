//! Command-line interface definitions.

use std::path::PathBuf;

use clap::Parser;

/// OpenStack MFA token updater.
///
/// Exchanges username, password and an optional one-time code for a Keystone
/// token. Reads the identity from the `<cloud>-long-term` profile in clouds.yaml
/// (creating it from `<cloud>` on first use) and writes a token-based profile
/// to `<cloud>`.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Name of the cloud configuration to refresh
    #[arg(long, env = "OS_CLOUD")]
    pub os_cloud: Option<String>,

    /// clouds.yaml to use, or a directory to look for one in
    #[arg(short, long, env = "OS_CLIENT_CONFIG_FILE")]
    pub config_path: Option<PathBuf>,

    /// Identity service request timeout in seconds
    #[arg(short, long, env = "OS_MFA_TIMEOUT", default_value = "30")]
    pub timeout: u64,
}
