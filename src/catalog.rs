//! # Protocol Catalog
//!
//! A read-only provider of `ProtocolDescriptor`s (spec.md §4.1): the set of
//! protocol implementations the Property Reducer is allowed to pick from.
//! The filesystem-watching daemon (`tapsd`) that keeps a catalog directory
//! in sync is explicitly out of scope (spec.md §1); what remains in scope
//! is the catalog *reader*.
//!
//! ## Catalog Sources
//!
//! - **`YamlCatalog`**: walks a directory of `*.yaml` files, one or more
//!   `---`-separated documents per file, each describing a single protocol
//! - **`StaticCatalog`**: an in-memory fixed list, for tests and for
//!   embedding the reference TCP module without a filesystem round trip
//!
//! ## Design Principles
//!
//! - **Read-only**: nothing here mutates a catalog source; `update` only
//!   appends into the caller's buffer
//! - **Best-effort parsing**: a malformed document or an unrecognized
//!   ability name is logged and skipped rather than aborting the whole
//!   directory scan
//! - **Bounded output**: every `update` call respects the caller's
//!   `capacity`, matching the fixed-size descriptor arrays spec.md §4.1
//!   describes
//!
//! Modeled on `ipc/mod.rs`'s `TransportConfig` (a plain
//! `serde`-deserializable struct with sensible defaults) and grounded in
//! the wire format `taps_cfg.c`'s hand-rolled YAML walker parses: `name`,
//! `protocol`, `libpath` and `properties` keys per document.

use crate::error::{TapsError, TapsResult};
use crate::properties::Ability;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A single catalog entry: a named protocol implementation, the abilities
/// it supports, and the module path used to load it (spec.md §3
/// "ProtocolDescriptor").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub name: String,
    pub wire_protocol: String,
    pub module_path: String,
    pub supported: u16,
}

impl ProtocolDescriptor {
    pub fn supports(&self, ability: Ability) -> bool {
        self.supported & ability.bit() != 0
    }
}

/// Raw deserialization target for one catalog YAML document. Field names
/// match `taps_cfg.c`'s parser exactly.
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    name: Option<String>,
    protocol: Option<String>,
    libpath: Option<String>,
    #[serde(default)]
    properties: Vec<String>,
}

/// Read-only provider of `ProtocolDescriptor`s (spec.md §4.1 Contract).
pub trait Catalog: Send + Sync {
    /// Fill `out` with up to `capacity` descriptors, returning the number
    /// written.
    ///
    /// # Arguments
    ///
    /// * `out` - buffer to append discovered descriptors to; existing
    ///   contents are left in place.
    /// * `capacity` - total size `out` is allowed to grow to; `update`
    ///   stops appending once `out.len()` reaches it.
    ///
    /// # Returns
    ///
    /// The number of descriptors appended during this call, or
    /// `Unavailable` if the underlying source (e.g. a directory) does not
    /// exist.
    fn update(&self, out: &mut Vec<ProtocolDescriptor>, capacity: usize) -> TapsResult<usize>;
}

/// Reads `*.yaml` descriptor files from a directory.
pub struct YamlCatalog {
    directory: PathBuf,
}

impl YamlCatalog {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        YamlCatalog { directory: directory.into() }
    }

    fn parse_file(path: &Path, out: &mut Vec<ProtocolDescriptor>, capacity: usize) -> TapsResult<()> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TapsError::Unavailable(format!("{}: {e}", path.display())))?;
        for document in serde_yaml::Deserializer::from_str(&contents) {
            if out.len() == capacity {
                return Ok(());
            }
            let raw = match RawDescriptor::deserialize(document) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("skipping malformed catalog document in {:?}: {e}", path);
                    continue;
                }
            };
            let (name, protocol, libpath) = match (raw.name, raw.protocol, raw.libpath) {
                (Some(n), Some(p), Some(l)) => (n, p, l),
                _ => {
                    warn!(
                        "skipping catalog document in {:?}: missing name/protocol/libpath",
                        path
                    );
                    continue;
                }
            };
            let mut supported = 0u16;
            for name in &raw.properties {
                match Ability::from_name(name) {
                    Some(ability) => supported |= ability.bit(),
                    None => warn!("unrecognized ability {:?} in {:?}, ignoring", name, path),
                }
            }
            out.push(ProtocolDescriptor {
                name,
                wire_protocol: protocol,
                module_path: libpath,
                supported,
            });
        }
        Ok(())
    }
}

impl Catalog for YamlCatalog {
    fn update(&self, out: &mut Vec<ProtocolDescriptor>, capacity: usize) -> TapsResult<usize> {
        let entries = std::fs::read_dir(&self.directory)
            .map_err(|e| TapsError::Unavailable(format!("{}: {e}", self.directory.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "yaml").unwrap_or(false))
            .collect();
        files.sort();
        let start = out.len();
        for path in files {
            if out.len() == capacity {
                break;
            }
            if let Err(e) = Self::parse_file(&path, out, capacity) {
                warn!("failed to read catalog file {:?}: {e}", path);
            }
        }
        Ok(out.len() - start)
    }
}

/// An in-memory catalog, useful for tests and for embedding a fixed set of
/// built-in descriptors (e.g. the reference TCP module) without a
/// filesystem round trip.
#[derive(Default, Clone)]
pub struct StaticCatalog {
    descriptors: Vec<ProtocolDescriptor>,
}

impl StaticCatalog {
    pub fn new(descriptors: Vec<ProtocolDescriptor>) -> Self {
        StaticCatalog { descriptors }
    }
}

impl Catalog for StaticCatalog {
    fn update(&self, out: &mut Vec<ProtocolDescriptor>, capacity: usize) -> TapsResult<usize> {
        let start = out.len();
        for d in &self.descriptors {
            if out.len() == capacity {
                break;
            }
            out.push(d.clone());
        }
        Ok(out.len() - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_directory_is_unavailable() {
        let catalog = YamlCatalog::new("/nonexistent/taps/catalog/path");
        let mut out = Vec::new();
        let err = catalog.update(&mut out, 16).unwrap_err();
        assert!(matches!(err, TapsError::Unavailable(_)));
    }

    #[test]
    fn parses_well_formed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("tcp.yaml")).unwrap();
        writeln!(
            f,
            "name: _kernel_TCP\nprotocol: TCP\nlibpath: taps_tcp\nproperties:\n  - reliability\n  - preserveOrder\n  - bogus_ability\n"
        )
        .unwrap();
        let catalog = YamlCatalog::new(dir.path());
        let mut out = Vec::new();
        let count = catalog.update(&mut out, 16).unwrap();
        assert_eq!(count, 1);
        assert_eq!(out[0].name, "_kernel_TCP");
        assert!(out[0].supports(Ability::Reliability));
        assert!(out[0].supports(Ability::PreserveOrder));
        assert!(!out[0].supports(Ability::Multipath));
    }

    #[test]
    fn skips_malformed_descriptor_missing_libpath() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("bad.yaml")).unwrap();
        writeln!(f, "name: broken\nprotocol: TCP\n").unwrap();
        let catalog = YamlCatalog::new(dir.path());
        let mut out = Vec::new();
        let count = catalog.update(&mut out, 16).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn respects_capacity() {
        let descriptors = vec![
            ProtocolDescriptor { name: "a".into(), wire_protocol: "A".into(), module_path: "a".into(), supported: 0 },
            ProtocolDescriptor { name: "b".into(), wire_protocol: "B".into(), module_path: "b".into(), supported: 0 },
        ];
        let catalog = StaticCatalog::new(descriptors);
        let mut out = Vec::new();
        let count = catalog.update(&mut out, 1).unwrap();
        assert_eq!(count, 1);
    }
}
