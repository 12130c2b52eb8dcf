//! Cloud profiles and the transformations between their long-term and
//! token-based forms.
//!
//! A profile is kept as the raw YAML mapping it was read from, so attributes
//! this tool knows nothing about (`region_name`, `interface`,
//! `identity_api_version`, ...) pass through every transformation untouched.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use zeroize::Zeroizing;

const AUTH: &str = "auth";
const AUTH_TYPE: &str = "auth_type";

/// Auth attributes that must never be present in a long-term profile.
const LONG_TERM_SECRETS: [&str; 2] = ["token", "password"];

/// Auth attributes removed once a token has been issued.
const TOKEN_STRIPPED: [&str; 3] = ["username", "password", "user_domain_name"];

/// A single entry under `clouds:` in clouds.yaml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(Mapping);

impl Profile {
    pub fn from_mapping(mapping: Mapping) -> Self {
        Self(mapping)
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    pub fn auth(&self) -> Option<&Mapping> {
        self.0.get(AUTH).and_then(Value::as_mapping)
    }

    /// Returns a scalar attribute of `auth` as text, treating blank values as
    /// absent. `username: 12345678` is as present as a quoted string.
    pub fn auth_str(&self, key: &str) -> Option<Cow<'_, str>> {
        self.auth()
            .and_then(|auth| auth.get(key))
            .and_then(scalar_text)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn set_auth(&mut self, key: &str, value: impl Into<String>) {
        let mut auth = self.auth().cloned().unwrap_or_default();
        auth.insert(Value::from(key), Value::from(value.into()));
        self.0.insert(Value::from(AUTH), Value::Mapping(auth));
    }

    fn remove_auth(&mut self, key: &str) -> Option<Value> {
        self.0
            .get_mut(AUTH)
            .and_then(Value::as_mapping_mut)
            .and_then(|auth| auth.shift_remove(key))
    }

    pub fn auth_type(&self) -> Option<&str> {
        self.0.get(AUTH_TYPE).and_then(Value::as_str)
    }

    /// True when nothing in the profile is secret and no auth plugin is pinned.
    pub fn is_sanitized(&self) -> bool {
        !self.0.contains_key(AUTH_TYPE)
            && self
                .auth()
                .is_none_or(|auth| LONG_TERM_SECRETS.iter().all(|k| !auth.contains_key(*k)))
    }

    pub fn is_ephemeral(&self) -> bool {
        self.auth_type() == Some("token")
            && self.auth_str("token").is_some()
            && self
                .auth()
                .is_some_and(|auth| TOKEN_STRIPPED.iter().all(|k| !auth.contains_key(*k)))
    }
}

fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

/// Derives a long-term profile that is safe to keep on disk.
///
/// `auth_type`, `auth.token` and `auth.password` are dropped from a copy of
/// `profile`. A plaintext password found on the way is handed back so the
/// caller can use it for the exchange in the same run instead of prompting.
pub fn derive_long_term(profile: &Profile) -> (Profile, Option<Zeroizing<String>>) {
    let mut long_term = profile.clone();
    long_term.0.shift_remove(AUTH_TYPE);
    long_term.remove_auth("token");

    let password = long_term
        .remove_auth("password")
        .and_then(|value| match value {
            Value::String(s) => Some(Zeroizing::new(s)),
            other => scalar_text(&other).map(|s| Zeroizing::new(s.into_owned())),
        })
        .filter(|s| !s.is_empty());

    (long_term, password)
}

/// Derives the token-based profile written back under the base cloud name.
pub fn derive_token(long_term: &Profile, token: &str) -> Profile {
    let mut ephemeral = long_term.clone();
    ephemeral
        .0
        .insert(Value::from(AUTH_TYPE), Value::from("token"));
    ephemeral.set_auth("token", token);
    for key in TOKEN_STRIPPED {
        ephemeral.remove_auth(key);
    }
    ephemeral
}
