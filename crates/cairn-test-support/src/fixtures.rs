//! Parameter builders for request tests.

use cairn_events::PersistenceMode;
use cairn_insert_core::{InsertUri, PutParams, RequestIdentity};

/// Content-hash target identifier.
///
/// # Panics
///
/// Never in practice; the literal is a valid identifier.
#[must_use]
pub fn chk_uri() -> InsertUri {
    InsertUri::parse("CHK@").expect("static identifier parses")
}

/// Keyed target identifier with the given document name.
///
/// # Panics
///
/// Panics if `name` produces an invalid identifier.
#[must_use]
pub fn ssk_uri(name: &str) -> InsertUri {
    InsertUri::parse(format!("SSK@fixture-key/{name}")).expect("fixture identifier parses")
}

/// Parameters for a content-hash put with the given persistence mode.
#[must_use]
pub fn put_params(client: &str, identifier: &str, persistence: PersistenceMode) -> PutParams {
    let mut params = PutParams::new(RequestIdentity::new(client, identifier), chk_uri());
    params.persistence = persistence;
    params
}
