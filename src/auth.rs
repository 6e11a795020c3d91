//! Authentication header composition.
//!
//! A client keeps an ordered list of [`Authentication`] entries, one per
//! [`AuthKind`]. Every entry except [`AuthKind::API_KEY`] is attached to each
//! outbound request as `header_name: prefix + token`.

use std::fmt;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{KitError, Result};

/// Kind of authorization header and how its value is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AuthKind {
    /// Header the token is sent in.
    pub header_name: &'static str,
    /// Identity of the kind. At most one entry per kind is kept.
    pub kind: &'static str,
    /// Prepended to the token in the header value.
    pub prefix: &'static str,
}

impl AuthKind {
    pub const BASIC: Self = Self {
        header_name: "Authorization",
        kind: "Basic",
        prefix: "Basic ",
    };
    pub const BEARER: Self = Self {
        header_name: "Authorization",
        kind: "Bearer",
        prefix: "Bearer ",
    };
    pub const ACCESS_TOKEN: Self = Self {
        header_name: "X-Access-Token",
        kind: "Auth0",
        prefix: "",
    };
    pub const SECRET: Self = Self {
        header_name: "Secret",
        kind: "Secret",
        prefix: "",
    };
    /// Registered like the others but never attached automatically.
    pub const API_KEY: Self = Self {
        header_name: "APIKey",
        kind: "APIKey",
        prefix: "",
    };

    /// Pairs this kind with a token.
    pub fn with_token(self, token: impl Into<String>) -> Authentication {
        Authentication {
            kind: self,
            token: token.into(),
        }
    }

    pub fn is_api_key(self) -> bool {
        self.kind == Self::API_KEY.kind
    }
}

/// A token registered under an [`AuthKind`].
#[derive(Clone, PartialEq, Eq)]
pub struct Authentication {
    kind: AuthKind,
    token: String,
}

impl Authentication {
    pub fn kind(&self) -> AuthKind {
        self.kind
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Rendered header value, `prefix + token`.
    pub fn header_value(&self) -> String {
        format!("{}{}", self.kind.prefix, self.token)
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("kind", &self.kind.kind)
            .field("header_name", &self.kind.header_name)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Ordered authentication entries of a client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Authentications {
    entries: Vec<Authentication>,
}

impl Authentications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, or replaces the token of the entry with the same kind
    /// in place.
    pub fn upsert(&mut self, auth: Authentication) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.kind.kind == auth.kind.kind)
        {
            Some(entry) => entry.token = auth.token,
            None => self.entries.push(auth),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Authentication> {
        self.entries.iter()
    }

    /// Token registered for `kind`, if any.
    pub fn token(&self, kind: AuthKind) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.kind.kind == kind.kind)
            .map(Authentication::token)
    }

    /// Appends one header per entry, skipping API-key entries.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        for entry in self.entries.iter().filter(|entry| !entry.kind.is_api_key()) {
            let name = HeaderName::from_bytes(entry.kind.header_name.as_bytes()).map_err(|err| {
                KitError::InvalidHeader(format!("{}: {err}", entry.kind.header_name))
            })?;
            let mut value = HeaderValue::from_str(&entry.header_value()).map_err(|err| {
                KitError::InvalidHeader(format!("{}: {err}", entry.kind.header_name))
            })?;
            value.set_sensitive(true);
            headers.append(name, value);
        }
        Ok(())
    }

    pub(crate) fn is_auth_header(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.kind.header_name.eq_ignore_ascii_case(name))
    }
}
