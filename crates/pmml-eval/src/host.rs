//! Host-side collaborator traits (spec.md §9 "CustomProcessing via
//! host-language evaluation"): `HostCapability`'s begin/action/end/exception
//! hooks and `PersistentStorage` are external capabilities invoked through a
//! vtable rather than embedded interpreters.

use std::collections::HashMap;
use std::fmt;

/// Fragment of XML a `HostCapability` hook may contribute to the score
/// stream (spec.md §9: each hook returns `xml`).
pub type XmlFragment = String;

/// `HostCapability` capability (spec.md §6/§9): `begin`/`action`/`end` fire
/// at the obvious points in the event loop; `exception` fires once, in
/// place of `end`, when a fatal error aborts the run.
pub trait HostCapability {
    fn begin(&mut self) -> Option<XmlFragment> {
        None
    }

    fn action(&mut self, record_count: u64) -> Option<XmlFragment> {
        let _ = record_count;
        None
    }

    fn end(&mut self) -> Option<XmlFragment> {
        None
    }

    fn exception(&mut self, error: &str) -> Option<XmlFragment> {
        let _ = error;
        None
    }
}

/// No-op default, used when a configuration declares no `HostCapability`.
pub struct NullHostCapability;

impl HostCapability for NullHostCapability {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProtocol {
    Json,
    Pickle,
}

#[derive(Debug)]
pub struct StorageUriError(pub String);

impl fmt::Display for StorageUriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid PersistentStorage.connect URI: {}", self.0)
    }
}

impl std::error::Error for StorageUriError {}

/// Splits a `PROTOCOL://ADDRESS` connect string (spec.md §6 "Persistent
/// storage protocols").
pub fn parse_storage_uri(uri: &str) -> Result<(StorageProtocol, &str), StorageUriError> {
    let (scheme, address) = uri.split_once("://").ok_or_else(|| StorageUriError(uri.to_string()))?;
    let protocol = match scheme {
        "json" => StorageProtocol::Json,
        "pickle" => StorageProtocol::Pickle,
        other => return Err(StorageUriError(format!("unrecognized protocol {other:?}"))),
    };
    if address.is_empty() {
        return Err(StorageUriError(uri.to_string()));
    }
    Ok((protocol, address))
}

/// A flat string-keyed namespace: the unit of storage under `Global` or
/// under a single segment identifier in `Segments` (spec.md §6).
pub type Namespace = HashMap<String, String>;

/// The two top-level keys the json-backed format always carries (spec.md
/// §6): `Global`, plus `Segments` keyed by segment identifier. The
/// pickle-backed format is modeled the same way at this layer; the
/// difference is purely in how a host serializes it to disk (`None` segment
/// key maps to `global` here).
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub global: Namespace,
    pub segments: HashMap<String, Namespace>,
}

/// `PersistentStorage` capability: loaded once at begin, saved once at
/// end/exception. The core never touches the backing file directly; a host
/// implements the actual json/pickle codec.
pub trait PersistentStorage {
    fn load(&mut self) -> StorageSnapshot;
    fn save(&mut self, snapshot: &StorageSnapshot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_and_pickle_schemes() {
        assert_eq!(parse_storage_uri("json:///var/lib/model.json").unwrap(), (StorageProtocol::Json, "/var/lib/model.json"));
        assert_eq!(parse_storage_uri("pickle://state.pkl").unwrap(), (StorageProtocol::Pickle, "state.pkl"));
    }

    #[test]
    fn rejects_unknown_scheme_and_missing_address() {
        assert!(parse_storage_uri("yaml://x").is_err());
        assert!(parse_storage_uri("json://").is_err());
        assert!(parse_storage_uri("no-scheme-here").is_err());
    }
}
