//! Lexical filename sandboxing shared by every backend
//!
//! Names are storage-relative paths using `/` separators. Normalisation is
//! purely lexical: `.` segments are dropped and `..` pops the previous
//! segment, failing if it would climb above the root.

use std::path::{Component, Path};

use crate::error::{StorageError, StorageResult};

/// Normalise `name` to a root-relative `a/b/c` form or reject it
pub fn normalize_name(name: &str) -> StorageResult<String> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(StorageError::InvalidFilename(name.to_string()));
    }

    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(StorageError::OutsideRoot(name.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::OutsideRoot(name.to_string()));
            }
        }
    }

    if parts.is_empty() {
        return Err(StorageError::InvalidFilename(name.to_string()));
    }
    Ok(parts.join("/"))
}
