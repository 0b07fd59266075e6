use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

/// Compute a deterministic version ID for a configuration file based on its content.
///
/// The same content always yields the same version, so the reloader can poll the file
/// cheaply and only re-parse it when the version moves.
pub fn compute_config_version(config_path: &Path) -> Result<String, io::Error> {
    let content = std::fs::read(config_path)?;
    Ok(version_of(&content))
}

/// Hex-encoded SHA-256 of the given bytes.
pub fn version_of(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("{:x}", digest)
}
