//! Client identity as seen by a trusted service.
//!
//! A client authenticating with [`LoginMethod::Authentication`] presents a
//! manifest: UTF-8 text of `name: value` lines. Blank lines and lines starting
//! with `#` are ignored. The secure world turns the manifest into the client's
//! properties; `sm.*` names are reserved for properties the secure world sets
//! itself and are ignored when they appear in a manifest.

use std::collections::BTreeMap;

use tdrm_proto::LoginMethod;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Property holding the numeric login method. Always present.
pub const PROP_CLIENT_LOGIN: &str = "sm.client.login";

const RESERVED_PREFIX: &str = "sm.";

/// Manifest parse failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest is not valid UTF-8")]
    NotUtf8,

    #[error("line {line}: expected `name: value`")]
    MissingSeparator { line: usize },

    #[error("line {line}: empty property name")]
    EmptyName { line: usize },
}

/// Properties a client claims about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientManifest {
    properties: BTreeMap<String, String>,
}

impl ClientManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::NotUtf8)?;
        let mut properties = BTreeMap::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(ManifestError::MissingSeparator { line: index + 1 })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ManifestError::EmptyName { line: index + 1 });
            }
            properties.insert(name.to_string(), value.trim().to_string());
        }

        Ok(ClientManifest { properties })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for (name, value) in &self.properties {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.into_bytes()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Identity of the client on the other side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Identifier of the client context the session was opened from.
    pub client_id: Uuid,
    pub login: LoginMethod,
    properties: BTreeMap<String, String>,
}

impl ClientIdentity {
    /// Identity for a session opened with `login`. Manifest properties are
    /// only taken into account for authenticated logins.
    pub fn new(client_id: Uuid, login: LoginMethod, manifest: Option<&ClientManifest>) -> Self {
        let mut properties = BTreeMap::new();
        if login == LoginMethod::Authentication {
            if let Some(manifest) = manifest {
                for (name, value) in manifest.iter() {
                    if name.starts_with(RESERVED_PREFIX) {
                        warn!(property = name, "ignoring reserved property in client manifest");
                        continue;
                    }
                    properties.insert(name.to_string(), value.to_string());
                }
            }
        }
        properties.insert(PROP_CLIENT_LOGIN.to_string(), login.as_u32().to_string());

        ClientIdentity {
            client_id,
            login,
            properties,
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Boolean property; absent or unrecognized values read as `false`.
    pub fn property_bool(&self, name: &str) -> bool {
        matches!(
            self.property(name).map(str::to_ascii_lowercase).as_deref(),
            Some("true" | "yes" | "on" | "1")
        )
    }

    /// Login method recorded in the `sm.client.login` property.
    pub fn login_property(&self) -> Option<u32> {
        self.property(PROP_CLIENT_LOGIN)?.parse().ok()
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
