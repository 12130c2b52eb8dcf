//! Keystone v3 password-to-token exchange.

use std::{borrow::Cow, fmt, time::Duration};

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{credentials::Profile, error::Error};

const SUBJECT_TOKEN_HEADER: &str = "x-subject-token";
const TOKENS_PATH: &str = "/v3/auth/tokens";

/// A bearer token issued by the identity service.
#[derive(Clone, PartialEq)]
pub struct Token {
    value: String,
    expires_at: DateTime<Utc>,
    issued_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Both sides are absolute instants, so the issuer's offset is irrelevant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Parses a Keystone timestamp. Keystone emits RFC 3339 with a `Z` suffix;
/// a timestamp without any offset is taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|at| at.and_utc())
        })
}

/// The token endpoint for `auth_url`: its origin plus `/v3/auth/tokens`.
/// Any path, query or credentials in `auth_url` are dropped.
pub fn token_endpoint(auth_url: &str) -> Result<Url, Error> {
    let invalid = |reason: String| Error::InvalidAuthUrl {
        url: auth_url.to_string(),
        reason,
    };

    let parsed = Url::parse(auth_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("no host".to_string()));
    }

    Url::parse(&format!("{}{TOKENS_PATH}", parsed.origin().ascii_serialization()))
        .map_err(|e| invalid(e.to_string()))
}

/// Checks that `profile` names a usable identity endpoint and a project to
/// scope to, returning the token endpoint.
///
/// Runs before any secret is collected so a broken profile fails fast.
pub fn validate_target(profile: &Profile) -> Result<Url, Error> {
    let auth_url = profile
        .auth_str("auth_url")
        .ok_or(Error::MissingField("auth_url"))?;
    let endpoint = token_endpoint(&auth_url)?;
    if profile.auth_str("project_id").is_none() && profile.auth_str("project_name").is_none() {
        return Err(Error::MissingField("project_id"));
    }
    Ok(endpoint)
}

/// Identity service client.
#[derive(Debug, Clone)]
pub struct KeystoneClient {
    http: Client,
}

impl KeystoneClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Exchanges the identity in `profile.auth` plus `secret` (password with
    /// any MFA code already appended) for a project-scoped token.
    ///
    /// A non-success status is an [`Error::Auth`] and must not be retried.
    pub async fn exchange(&self, profile: &Profile, secret: &str) -> Result<Token, Error> {
        let endpoint = validate_target(profile)?;
        let request = keystone_v3::AuthRequest::password(profile, secret)?;

        debug!("Requesting token from {endpoint}");
        let response = self
            .http
            .post(endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|source| Error::Network {
                url: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth { status, body });
        }

        let value = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .ok_or_else(|| Error::InvalidResponse("missing X-Subject-Token header".to_string()))?
            .to_str()
            .map_err(|_| {
                Error::InvalidResponse("X-Subject-Token header is not valid UTF-8".to_string())
            })?
            .to_string();

        let body: keystone_v3::TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("failed to parse token response: {e}")))?;

        let expires_at = parse_timestamp(&body.token.expires_at).map_err(|e| {
            Error::InvalidResponse(format!(
                "invalid expires_at '{}': {e}",
                body.token.expires_at
            ))
        })?;
        let issued_at = body
            .token
            .issued_at
            .as_deref()
            .and_then(|raw| parse_timestamp(raw).ok());

        Ok(Token {
            value,
            expires_at,
            issued_at,
        })
    }
}

mod keystone_v3 {
    use super::*;

    #[derive(Serialize)]
    pub(super) struct AuthRequest<'a> {
        auth: Auth<'a>,
    }

    #[derive(Serialize)]
    struct Auth<'a> {
        identity: Identity<'a>,
        scope: Scope<'a>,
    }

    #[derive(Serialize)]
    struct Identity<'a> {
        methods: [&'static str; 1],
        password: Password<'a>,
    }

    #[derive(Serialize)]
    struct Password<'a> {
        user: User<'a>,
    }

    #[derive(Serialize)]
    struct User<'a> {
        name: Cow<'a, str>,
        domain: Domain<'a>,
        password: &'a str,
    }

    #[derive(Serialize)]
    struct Domain<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Cow<'a, str>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<Cow<'a, str>>,
    }

    #[derive(Serialize)]
    struct Scope<'a> {
        project: Project<'a>,
    }

    #[derive(Serialize)]
    struct Project<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Cow<'a, str>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<Cow<'a, str>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        domain: Option<Domain<'a>>,
    }

    impl<'a> AuthRequest<'a> {
        pub(super) fn password(profile: &'a Profile, secret: &'a str) -> Result<Self, Error> {
            let username = profile
                .auth_str("username")
                .ok_or(Error::MissingField("username"))?;
            let user_domain = profile
                .auth_str("user_domain_name")
                .ok_or(Error::MissingField("user_domain_name"))?;

            let project = match profile.auth_str("project_id") {
                Some(id) => Project {
                    id: Some(id),
                    name: None,
                    domain: None,
                },
                None => {
                    let name = profile
                        .auth_str("project_name")
                        .ok_or(Error::MissingField("project_id"))?;
                    let domain = match (
                        profile.auth_str("project_domain_name"),
                        profile.auth_str("project_domain_id"),
                    ) {
                        (Some(name), _) => Domain {
                            id: None,
                            name: Some(name),
                        },
                        (None, Some(id)) => Domain {
                            id: Some(id),
                            name: None,
                        },
                        (None, None) => Domain {
                            id: None,
                            name: Some(user_domain.clone()),
                        },
                    };
                    Project {
                        id: None,
                        name: Some(name),
                        domain: Some(domain),
                    }
                }
            };

            Ok(Self {
                auth: Auth {
                    identity: Identity {
                        methods: ["password"],
                        password: Password {
                            user: User {
                                name: username,
                                domain: Domain {
                                    id: None,
                                    name: Some(user_domain),
                                },
                                password: secret,
                            },
                        },
                    },
                    scope: Scope { project },
                },
            })
        }
    }

    #[derive(Deserialize)]
    pub(super) struct TokenResponse {
        pub(super) token: TokenBody,
    }

    #[derive(Deserialize)]
    pub(super) struct TokenBody {
        pub(super) expires_at: String,
        #[serde(default)]
        pub(super) issued_at: Option<String>,
    }
}
