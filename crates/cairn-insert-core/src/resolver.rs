//! Turns an upload intent into a uniform data handle.

use std::path::PathBuf;

use cairn_events::DataSourceKind;

use crate::data::DataHandle;
use crate::error::DescriptorError;
use crate::model::InsertUri;

/// Where the bytes of a fresh insert come from.
#[derive(Debug)]
pub enum UploadSource {
    /// Bytes staged by the caller.
    Direct(DataHandle),
    /// Caller-owned file read in place.
    Disk {
        /// Path to the file.
        path: PathBuf,
    },
    /// Pointer to content already in the network.
    Redirect {
        /// Identifier the descriptor points at.
        target: InsertUri,
    },
}

impl UploadSource {
    /// Discriminator of this source.
    #[must_use]
    pub const fn kind(&self) -> DataSourceKind {
        match self {
            Self::Direct(_) => DataSourceKind::Direct,
            Self::Disk { .. } => DataSourceKind::Disk,
            Self::Redirect { .. } => DataSourceKind::Redirect,
        }
    }
}

/// Output of [`resolve`].
#[derive(Debug)]
pub struct ResolvedSource {
    /// Source discriminator.
    pub kind: DataSourceKind,
    /// Handle the request will own.
    pub handle: DataHandle,
    /// Content type retained by the request; always `None` for redirects.
    pub content_type: Option<String>,
    /// Caller-owned path, for disk sources.
    pub original_filename: Option<PathBuf>,
    /// Redirect target, for redirect sources.
    pub target_uri: Option<InsertUri>,
    /// Whether the handle carries a descriptor rather than user content.
    pub is_metadata: bool,
}

/// Resolve `source` into a handle. For redirects the content type is folded
/// into the generated descriptor and not retained.
///
/// # Errors
///
/// Returns [`DescriptorError`] when the redirect descriptor cannot be encoded.
pub fn resolve(
    source: UploadSource,
    content_type: Option<String>,
) -> Result<ResolvedSource, DescriptorError> {
    match source {
        UploadSource::Direct(handle) => Ok(ResolvedSource {
            kind: DataSourceKind::Direct,
            handle,
            content_type,
            original_filename: None,
            target_uri: None,
            is_metadata: false,
        }),
        UploadSource::Disk { path } => Ok(ResolvedSource {
            kind: DataSourceKind::Disk,
            handle: DataHandle::disk(path.clone()),
            content_type,
            original_filename: Some(path),
            target_uri: None,
            is_metadata: false,
        }),
        UploadSource::Redirect { target } => {
            let descriptor = RedirectDescriptor {
                target: target.to_string(),
                content_type,
            };
            let bytes = descriptor.encode()?;
            Ok(ResolvedSource {
                kind: DataSourceKind::Redirect,
                handle: DataHandle::memory(bytes),
                content_type: None,
                original_filename: None,
                target_uri: Some(target),
                is_metadata: true,
            })
        }
    }
}

const MAGIC: [u8; 4] = *b"CRNM";
const VERSION: u8 = 1;
const TYPE_SIMPLE_REDIRECT: u8 = 0;
const FLAG_CONTENT_TYPE: u8 = 0b0000_0001;
const HEADER_LEN: usize = MAGIC.len() + 3;

/// Compact "simple redirect" document pointing at another identifier.
///
/// Layout: magic, version, type, flags, then `u16` big-endian length-prefixed
/// target and (when flagged) content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectDescriptor {
    /// Identifier the redirect resolves to.
    pub target: String,
    /// Content type of the target data.
    pub content_type: Option<String>,
}

impl RedirectDescriptor {
    /// Serialise the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] for an empty target or a field longer than
    /// `u16::MAX` bytes.
    pub fn encode(&self) -> Result<Vec<u8>, DescriptorError> {
        if self.target.is_empty() {
            return Err(DescriptorError::EmptyTarget);
        }
        let mut out = Vec::with_capacity(HEADER_LEN + 4 + self.target.len());
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.push(TYPE_SIMPLE_REDIRECT);
        out.push(if self.content_type.is_some() {
            FLAG_CONTENT_TYPE
        } else {
            0
        });
        push_field(&mut out, "target", &self.target)?;
        if let Some(content_type) = &self.content_type {
            push_field(&mut out, "content_type", content_type)?;
        }
        Ok(out)
    }

    /// Parse a descriptor produced by [`RedirectDescriptor::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Malformed`] on any structural mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let malformed = |operation| DescriptorError::Malformed { operation };
        let header = bytes.get(..HEADER_LEN).ok_or(malformed("header"))?;
        if header[..MAGIC.len()] != MAGIC {
            return Err(malformed("magic"));
        }
        if header[4] != VERSION {
            return Err(malformed("version"));
        }
        if header[5] != TYPE_SIMPLE_REDIRECT {
            return Err(malformed("type"));
        }
        let flags = header[6];
        let mut rest = &bytes[HEADER_LEN..];
        let target = take_field(&mut rest, "target")?;
        if target.is_empty() {
            return Err(DescriptorError::EmptyTarget);
        }
        let content_type = if flags & FLAG_CONTENT_TYPE == 0 {
            None
        } else {
            Some(take_field(&mut rest, "content_type")?)
        };
        if !rest.is_empty() {
            return Err(malformed("trailing"));
        }
        Ok(Self {
            target,
            content_type,
        })
    }
}

fn push_field(out: &mut Vec<u8>, field: &'static str, value: &str) -> Result<(), DescriptorError> {
    let len = u16::try_from(value.len()).map_err(|_| DescriptorError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn take_field(rest: &mut &[u8], operation: &'static str) -> Result<String, DescriptorError> {
    let malformed = DescriptorError::Malformed { operation };
    let (len, tail) = rest.split_first_chunk::<2>().ok_or(malformed.clone())?;
    let len = usize::from(u16::from_be_bytes(*len));
    let value = tail.get(..len).ok_or(malformed.clone())?;
    let value = String::from_utf8(value.to_vec()).map_err(|_| malformed)?;
    *rest = &tail[len..];
    Ok(value)
}
