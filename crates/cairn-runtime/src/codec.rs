//! Versioned schema for persisted insert requests.
//!
//! Encoding is plain serde. Decoding goes through a permissive raw shape so
//! that every missing or unusable field surfaces as a named
//! [`PersistenceParseError`] instead of a default.

use cairn_events::{DataSourceKind, PersistenceMode};
use cairn_insert_core::{
    InsertError, InsertUri, PersistenceParseError, PriorityClass, PutFlags, RequestIdentity,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written into every record.
pub const SCHEMA_VERSION: u32 = 1;

/// Engine-owned temp file backing an unfinished direct upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTemp {
    /// Hex encoded decryption key.
    pub decrypt_key: String,
    /// File name inside the temp directory.
    pub filename: String,
    /// Plaintext size in bytes.
    pub size: u64,
}

/// Kind-specific source fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "upload_from", rename_all = "snake_case")]
pub enum PersistedSource {
    /// Staged bytes; the temp file is only recorded while unfinished.
    Direct {
        /// Backing temp file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp: Option<PersistedTemp>,
    },
    /// Caller-owned file.
    Disk {
        /// Path of the original file.
        filename: String,
    },
    /// Redirect descriptor.
    Redirect {
        /// Identifier the redirect points at.
        target_uri: InsertUri,
    },
}

impl PersistedSource {
    /// Discriminator of this source.
    #[must_use]
    pub const fn kind(&self) -> DataSourceKind {
        match self {
            Self::Direct { .. } => DataSourceKind::Direct,
            Self::Disk { .. } => DataSourceKind::Disk,
            Self::Redirect { .. } => DataSourceKind::Redirect,
        }
    }
}

/// Durable form of one insert request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPut {
    /// Schema version, always [`SCHEMA_VERSION`] when written.
    pub version: u32,
    /// Request identifier.
    pub identifier: String,
    /// Client scope owning the request.
    pub client_name: String,
    /// Target identifier pattern.
    pub uri: InsertUri,
    /// Priority class.
    pub priority_class: PriorityClass,
    /// Persistence mode.
    pub persistence: PersistenceMode,
    /// Verbosity bitmask.
    pub verbosity: u32,
    /// Opaque client token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    /// Retry budget.
    pub max_retries: i32,
    /// Whether the request lives on the global queue.
    pub global: bool,
    /// Inserter switches.
    pub get_chk_only: bool,
    /// Skip compression.
    pub dont_compress: bool,
    /// Encode the top block first.
    pub early_encode: bool,
    /// An attempt has been made.
    pub started: bool,
    /// The last attempt reached a terminal state.
    pub finished: bool,
    /// The last attempt succeeded.
    pub succeeded: bool,
    /// Generated identifier of a succeeded insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_uri: Option<InsertUri>,
    /// Failure of the last attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<InsertError>,
    /// File name attached to the inserted data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_filename: Option<String>,
    /// Content type; never present for redirects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Source discriminator and kind-specific fields.
    pub source: PersistedSource,
    /// Inserter-owned progress snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
}

impl PersistedPut {
    /// Identity the record belongs to.
    #[must_use]
    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(self.client_name.clone(), self.identifier.clone())
    }

    /// Inserter switches.
    #[must_use]
    pub const fn flags(&self) -> PutFlags {
        PutFlags {
            get_chk_only: self.get_chk_only,
            dont_compress: self.dont_compress,
            early_encode: self.early_encode,
        }
    }

    /// Validate and decode a stored document.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceParseError`] naming the first field that is
    /// missing or unusable.
    pub fn decode(document: Value) -> Result<Self, PersistenceParseError> {
        let raw: RawPut = serde_json::from_value(document)
            .map_err(|source| PersistenceParseError::Malformed { source })?;
        raw.validate()
    }
}

#[derive(Debug, Deserialize)]
struct RawPut {
    version: Option<u32>,
    identifier: Option<String>,
    client_name: Option<String>,
    uri: Option<String>,
    priority_class: Option<u8>,
    persistence: Option<PersistenceMode>,
    verbosity: Option<u32>,
    client_token: Option<String>,
    max_retries: Option<i32>,
    global: Option<bool>,
    get_chk_only: Option<bool>,
    dont_compress: Option<bool>,
    early_encode: Option<bool>,
    started: Option<bool>,
    finished: Option<bool>,
    succeeded: Option<bool>,
    final_uri: Option<String>,
    failure: Option<InsertError>,
    target_filename: Option<String>,
    content_type: Option<String>,
    source: Option<PersistedSource>,
    progress: Option<Value>,
    // Records written before the tagged source carried a boolean instead.
    from_disk: Option<Value>,
    filename: Option<String>,
    temp: Option<PersistedTemp>,
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, PersistenceParseError> {
    value.ok_or(PersistenceParseError::MissingField { field })
}

fn invalid(field: &'static str, reason: impl ToString) -> PersistenceParseError {
    PersistenceParseError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

impl RawPut {
    fn validate(self) -> Result<PersistedPut, PersistenceParseError> {
        let version = required(self.version, "version")?;
        if version != SCHEMA_VERSION {
            return Err(PersistenceParseError::UnsupportedVersion { found: version });
        }
        let identifier = required(self.identifier, "identifier")?;
        if identifier.is_empty() {
            return Err(invalid("identifier", "empty identifier"));
        }
        let client_name = required(self.client_name, "client_name")?;
        let uri = InsertUri::parse(required(self.uri, "uri")?).map_err(|err| invalid("uri", err))?;
        let priority_class = PriorityClass::new(required(self.priority_class, "priority_class")?)
            .map_err(|err| invalid("priority_class", err))?;
        let finished = required(self.finished, "finished")?;
        let succeeded = required(self.succeeded, "succeeded")?;

        let final_uri = self
            .final_uri
            .map(InsertUri::parse)
            .transpose()
            .map_err(|err| invalid("final_uri", err))?;
        if succeeded && final_uri.is_none() {
            return Err(PersistenceParseError::MissingField { field: "final_uri" });
        }
        if succeeded && !finished {
            return Err(invalid("succeeded", "succeeded record is not finished"));
        }

        let source = match (self.source, self.from_disk) {
            (Some(source), _) => source,
            (None, Some(Value::Bool(true))) => PersistedSource::Disk {
                filename: required(self.filename, "filename")?,
            },
            (None, Some(Value::Bool(false))) => PersistedSource::Direct { temp: self.temp },
            (None, Some(other)) => return Err(invalid("from_disk", format!("not a boolean: {other}"))),
            (None, None) => return Err(PersistenceParseError::MissingField { field: "source" }),
        };
        match &source {
            PersistedSource::Direct { temp: None } if !finished => {
                return Err(PersistenceParseError::MissingField {
                    field: "source.temp",
                });
            }
            PersistedSource::Disk { filename } if filename.is_empty() => {
                return Err(invalid("source.filename", "empty path"));
            }
            PersistedSource::Redirect { .. } if self.content_type.is_some() => {
                return Err(invalid(
                    "content_type",
                    "redirect records carry no content type",
                ));
            }
            _ => {}
        }

        Ok(PersistedPut {
            version,
            identifier,
            client_name,
            uri,
            priority_class,
            persistence: required(self.persistence, "persistence")?,
            verbosity: required(self.verbosity, "verbosity")?,
            client_token: self.client_token,
            max_retries: required(self.max_retries, "max_retries")?,
            global: required(self.global, "global")?,
            get_chk_only: required(self.get_chk_only, "get_chk_only")?,
            dont_compress: required(self.dont_compress, "dont_compress")?,
            early_encode: required(self.early_encode, "early_encode")?,
            started: required(self.started, "started")?,
            finished,
            succeeded,
            final_uri,
            failure: self.failure,
            target_filename: self.target_filename,
            content_type: self.content_type,
            source,
            progress: self.progress,
        })
    }
}
