//! Launch manifest handling.
//!
//! The manifest is a JSON array of [`ManifestEntry`] objects, read once at
//! startup and spawned in order. A bad *file* is fatal; a bad *entry* is
//! not — validation failures are surfaced per entry so the rest of the
//! fleet still launches.

use botfabric_types::{FabricError, ManifestEntry};
use std::path::Path;

/// Read and parse the manifest at `path`.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, FabricError> {
    let raw = std::fs::read_to_string(path).map_err(|e| FabricError::Manifest {
        name: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| FabricError::Manifest {
        name: path.display().to_string(),
        reason: format!("invalid JSON: {e}"),
    })
}

/// Reject entries the supervisor could never launch or track.
pub fn validate_entry(entry: &ManifestEntry) -> Result<(), FabricError> {
    if entry.name.trim().is_empty() {
        return Err(FabricError::Manifest {
            name: entry.path.clone(),
            reason: "empty name".to_string(),
        });
    }
    if entry.path.trim().is_empty() {
        return Err(FabricError::Manifest {
            name: entry.name.clone(),
            reason: "empty path".to_string(),
        });
    }
    Ok(())
}
