use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{GROUP_SERVER, USER_SERVER};
use crate::error::IdentityError;

// Chat or user address: `<user>@<server>`. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipientIdentity {
    user: String,
    server: String,
}

impl RecipientIdentity {
    pub fn new(user: &str, server: &str) -> Result<Self, IdentityError> {
        let valid_user = !user.is_empty()
            && user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        let valid_server = !server.is_empty()
            && !server.starts_with('.')
            && !server.ends_with('.')
            && server
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-'));

        if !valid_user || !valid_server {
            return Err(IdentityError::Malformed(format!("{user}@{server}")));
        }

        Ok(Self {
            user: user.to_string(),
            server: server.to_string(),
        })
    }

    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let (user, server) = s
            .split_once('@')
            .ok_or_else(|| IdentityError::Malformed(s.to_string()))?;
        if server.contains('@') {
            return Err(IdentityError::Malformed(s.to_string()));
        }
        Self::new(user, server)
    }

    /// Parse an address as a transport reports it. A device suffix on the
    /// user part (`<user>:<device>@<server>`) is dropped, so messages typed
    /// on a companion device resolve to the same chat or user. Only the
    /// shape is checked; allow-list entries go through [`Self::parse`].
    pub fn from_wire(s: &str) -> Result<Self, IdentityError> {
        let malformed = || IdentityError::Malformed(s.to_string());
        let (user, server) = s.split_once('@').ok_or_else(malformed)?;
        let user = user.split_once(':').map_or(user, |(user, _device)| user);

        if user.is_empty()
            || server.is_empty()
            || server.contains('@')
            || s.chars().any(char::is_whitespace)
        {
            return Err(malformed());
        }

        Ok(Self {
            user: user.to_string(),
            server: server.to_string(),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Kind inferred from the server part, if it is one of the known servers.
    pub fn kind(&self) -> Option<RecipientKind> {
        match self.server.as_str() {
            USER_SERVER => Some(RecipientKind::User),
            GROUP_SERVER => Some(RecipientKind::Group),
            _ => None,
        }
    }
}

impl fmt::Display for RecipientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for RecipientIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RecipientIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RecipientIdentity> for String {
    fn from(id: RecipientIdentity) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    User,
    Group,
}

impl RecipientKind {
    pub fn server(&self) -> &'static str {
        match self {
            Self::User => USER_SERVER,
            Self::Group => GROUP_SERVER,
        }
    }
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Group => f.write_str("group"),
        }
    }
}

/// Media class passed to the transport on upload. Selects the remote
/// bucket and the key derivation info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
        }
    }
}
