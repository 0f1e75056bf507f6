//! Domain types describing an insert request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Highest (least urgent) priority class accepted by the engine.
pub const MAX_PRIORITY_CLASS: u8 = 6;

/// Default retry budget handed to inserters.
pub const DEFAULT_MAX_RETRIES: i32 = 10;

/// Bounded scheduling priority, `0` being the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PriorityClass(u8);

impl PriorityClass {
    /// Priority used for bulk inserts when the caller does not pick one.
    pub const BULK: Self = Self(4);

    /// Validate a raw priority value.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::PriorityOutOfRange`] above [`MAX_PRIORITY_CLASS`].
    pub const fn new(value: u8) -> Result<Self, ModelError> {
        if value > MAX_PRIORITY_CLASS {
            Err(ModelError::PriorityOutOfRange { value })
        } else {
            Ok(Self(value))
        }
    }

    /// Raw priority value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for PriorityClass {
    fn default() -> Self {
        Self::BULK
    }
}

impl TryFrom<u8> for PriorityClass {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PriorityClass> for u8 {
    fn from(value: PriorityClass) -> Self {
        value.0
    }
}

/// Target identifier pattern, such as `CHK@` or `SSK@<key>/site`.
///
/// Only the shape `<KEYTYPE>@<rest>` is checked; key material is opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InsertUri(String);

impl InsertUri {
    /// Validate and wrap an identifier string.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidUri`] when no alphabetic key type precedes `@`.
    pub fn parse(value: impl Into<String>) -> Result<Self, ModelError> {
        let value = value.into();
        let valid = value.split_once('@').is_some_and(|(key_type, _)| {
            !key_type.is_empty() && key_type.chars().all(|c| c.is_ascii_alphabetic())
        });
        if valid {
            Ok(Self(value))
        } else {
            Err(ModelError::InvalidUri { value })
        }
    }

    /// Key type prefix, upper-cased as written (`CHK`, `SSK`, `USK`, `KSK`).
    #[must_use]
    pub fn key_type(&self) -> &str {
        self.0.split_once('@').map_or("", |(key_type, _)| key_type)
    }

    /// Part after the `@`.
    #[must_use]
    pub fn key_body(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, rest)| rest)
    }

    /// Whether the final identifier is derived from the content itself.
    #[must_use]
    pub fn is_content_hash(&self) -> bool {
        self.key_type().eq_ignore_ascii_case("CHK")
    }

    /// Identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InsertUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InsertUri {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InsertUri {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<InsertUri> for String {
    fn from(value: InsertUri) -> Self {
        value.0
    }
}

/// Unique handle of a request: identifier within a client scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestIdentity {
    /// Client scope owning the request.
    pub client: String,
    /// Caller-chosen identifier.
    pub identifier: String,
}

impl RequestIdentity {
    /// Build an identity from its parts.
    #[must_use]
    pub fn new(client: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client, self.identifier)
    }
}

/// Boolean switches passed through to the inserter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutFlags {
    /// Only compute the final identifier; do not push data to the network.
    pub get_chk_only: bool,
    /// Skip compression of the payload.
    pub dont_compress: bool,
    /// Encode the top-level block before the rest of the data.
    pub early_encode: bool,
}

/// Scheduling and behaviour parameters shared by fresh and restored requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutParams {
    /// Identity of the request.
    pub identity: RequestIdentity,
    /// Target identifier pattern.
    pub uri: InsertUri,
    /// Verbosity bitmask.
    pub verbosity: u32,
    /// Priority class.
    pub priority_class: PriorityClass,
    /// Persistence mode.
    pub persistence: cairn_events::PersistenceMode,
    /// Opaque token echoed back to the client.
    pub client_token: Option<String>,
    /// Whether the request lives on the global queue.
    pub global: bool,
    /// Retry budget; `-1` retries forever.
    pub max_retries: i32,
    /// Inserter switches.
    pub flags: PutFlags,
    /// File name attached to the inserted data.
    pub target_filename: Option<String>,
}

impl PutParams {
    /// Parameters with engine defaults for everything but identity and target.
    #[must_use]
    pub fn new(identity: RequestIdentity, uri: InsertUri) -> Self {
        Self {
            identity,
            uri,
            verbosity: 0,
            priority_class: PriorityClass::default(),
            persistence: cairn_events::PersistenceMode::ConnectionBound,
            client_token: None,
            global: false,
            max_retries: DEFAULT_MAX_RETRIES,
            flags: PutFlags::default(),
            target_filename: None,
        }
    }
}
