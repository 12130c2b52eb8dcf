//! OpenStack MFA Profile Updater
//!
//! This module drives the credential lifecycle for one cloud in clouds.yaml. It uses a
//! dual-profile approach so that OpenStack tools always see a ready-to-use token while the
//! identity needed to mint the next one stays on disk without any secrets.
//!
//! ## Dual-Profile Strategy
//!
//! For a cloud named `C` the updater maintains:
//! - `C`: an ephemeral profile with `auth_type: token` and `auth.token`. This is what
//!   `openstack --os-cloud C` and the SDKs consume. It is regenerated on every run.
//! - `C-long-term`: the sanitized identity (`auth_url`, project, optionally `username` and
//!   `user_domain_name`) with no `password`, `token` or `auth_type`. It is created once, the
//!   first time the tool sees a password-based `C`, and is never rewritten afterwards.
//!
//! ## State Machine
//!
//! | `C-long-term` exists | `C` exists | Action |
//! |---|---|---|
//! | yes | - | exchange using `C-long-term`, write the token profile to `C` |
//! | no | yes | derive `C-long-term` from `C`, exchange reusing any password in `C`, write both |
//! | no | no | fail with [`Error::ProfileNotFound`] before any prompt or request |
//!
//! ## File Format
//!
//! ```yaml
//! clouds:
//!   catalyst:                       # ephemeral, rewritten each run
//!     auth:
//!       auth_url: https://api.nz-hlz-1.catalystcloud.io:5000
//!       project_id: 1238a098c1273d409812409812
//!       token: gAAAAAB...
//!     auth_type: token
//!     region_name: nz-hlz-1
//!   catalyst-long-term:             # sanitized, created once
//!     auth:
//!       auth_url: https://api.nz-hlz-1.catalystcloud.io:5000
//!       project_id: 1238a098c1273d409812409812
//!       username: john.doe@example.com
//!       user_domain_name: Default
//!     region_name: nz-hlz-1
//! ```
//!
//! The file is written once per run, after the identity service has issued a token. A
//! rejected password, a network failure or an interrupted prompt leaves it exactly as it was.

use chrono::Local;
use log::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    clouds::CloudsConfig,
    credentials::{Profile, derive_long_term, derive_token},
    error::Error,
    keystone::{self, KeystoneClient, Token},
    prompt::{CredentialPrompter, Prompt, combine_secret},
};

/// Name of the sanitized profile kept alongside `cloud`.
pub fn long_term_name(cloud: &str) -> String {
    format!("{cloud}-long-term")
}

/// Refreshes the token-based profile of a cloud from its long-term identity.
///
/// The resolver owns the three collaborators of a run: the clouds.yaml store, the prompter
/// that fills identity gaps and collects secrets, and the identity service client.
pub struct ProfileResolver<P> {
    /// Backing clouds.yaml
    store: CloudsConfig,
    /// Source of usernames, domains, passwords and MFA codes
    prompter: CredentialPrompter<P>,
    /// Identity service client used for the password-to-token exchange
    keystone: KeystoneClient,
}

impl<P: Prompt> ProfileResolver<P> {
    pub fn new(
        store: CloudsConfig,
        prompter: CredentialPrompter<P>,
        keystone: KeystoneClient,
    ) -> Self {
        Self {
            store,
            prompter,
            keystone,
        }
    }

    /// Obtains a fresh token for `cloud` and writes it back to clouds.yaml.
    ///
    /// # Arguments
    ///
    /// * `cloud` - Base cloud name, usually from `OS_CLOUD`. Its long-term companion is
    ///   looked up as `<cloud>-long-term`.
    ///
    /// # Returns
    ///
    /// * `Ok(Token)` - The issued token, already persisted under `cloud`
    /// * `Err(Error)` - Nothing was written. Notable cases:
    ///   - [`Error::ProfileNotFound`] when neither profile exists
    ///   - [`Error::Auth`] when the identity service rejects the credentials
    ///   - [`Error::Network`] when the service is unreachable twice in a row
    ///
    /// # Security Considerations
    ///
    /// - A password found in a password-based `cloud` profile is used for this exchange only
    ///   and is dropped from every profile that gets written
    /// - Password, MFA code and the combined secret are zeroed on drop
    /// - Authentication failures are never retried, to avoid locking the account
    pub async fn refresh(&mut self, cloud: &str) -> Result<Token, Error> {
        let long_term_name = long_term_name(cloud);

        let (long_term, carried, created) = if self.store.exists(&long_term_name).await? {
            let long_term = self.store.get_by_name(&long_term_name).await?;
            if !long_term.is_sanitized() {
                warn!("'{long_term_name}' holds a password, token or auth_type; ignoring them");
            }
            (long_term, None, false)
        } else if self.store.exists(cloud).await? {
            info!("Creating config: {long_term_name}");
            let (long_term, password) = derive_long_term(&self.store.get_by_name(cloud).await?);
            (long_term, password, true)
        } else {
            return Err(Error::ProfileNotFound {
                cloud: cloud.to_string(),
                long_term: long_term_name,
                path: self.store.path().to_path_buf(),
            });
        };

        let token = self.exchange(&long_term_name, &long_term, carried).await?;

        let ephemeral = derive_token(&long_term, token.value());
        debug_assert!(ephemeral.is_ephemeral());
        if created {
            self.store
                .put_profiles([(cloud.to_string(), ephemeral), (long_term_name, long_term)])
                .await?;
        } else {
            self.store.put_by_name(cloud, ephemeral).await?;
        }
        info!("The '{cloud}' config has been updated.");

        Ok(token)
    }

    async fn exchange(
        &mut self,
        name: &str,
        long_term: &Profile,
        carried: Option<Zeroizing<String>>,
    ) -> Result<Token, Error> {
        keystone::validate_target(long_term)?;

        // Prompted identity fields only live in this working copy.
        let mut working = long_term.clone();
        let username = self.prompter.resolve_username(name, &working)?;
        working.set_auth("username", username);
        let user_domain_name = self.prompter.resolve_user_domain_name(name, &working)?;
        working.set_auth("user_domain_name", user_domain_name);

        let password = self.prompter.resolve_password(&working, carried)?;
        let mfa_code = self.prompter.resolve_mfa_code()?;
        let secret = combine_secret(&password, &mfa_code);

        info!("Getting token...");
        let token = match self.keystone.exchange(&working, &secret).await {
            Err(err) if err.is_retryable() => {
                warn!("{err}, retrying once");
                self.keystone.exchange(&working, &secret).await?
            }
            result => result?,
        };

        info!(
            "Token issued. Expires: {}",
            token.expires_at().with_timezone(&Local).to_rfc2822()
        );
        if let Some(issued_at) = token.issued_at() {
            debug!("Token issued at {issued_at}");
        }
        if token.is_expired() {
            warn!("The issued token has already expired; check the system clock");
        }

        Ok(token)
    }

    #[cfg(test)]
    fn prompter(&self) -> &CredentialPrompter<P> {
        &self.prompter
    }
}
