//! Host key loading and development key generation.

use keygate_core::{GateError, GateResult};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::{Algorithm, LineEnding};
use russh::keys::PrivateKey;
use std::path::Path;
use tracing::info;

/// Load the host key, preferring inline key material over the path.
pub fn load(inline: Option<&str>, path: &Path) -> GateResult<PrivateKey> {
    if let Some(pem) = inline {
        return russh::keys::decode_secret_key(pem, None)
            .map_err(|e| GateError::Config(format!("cannot decode inline host key: {e}")));
    }

    info!(path = %path.display(), "loading host key");
    russh::keys::load_secret_key(path, None)
        .map_err(|e| GateError::Config(format!("cannot load host key {}: {e}", path.display())))
}

/// Write a fresh Ed25519 host key to `path` unless one already exists.
///
/// Returns `true` if a key was generated.
pub fn generate_if_missing(path: &Path) -> GateResult<bool> {
    if path.exists() {
        return Ok(false);
    }

    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|e| GateError::Other(format!("cannot generate host key: {e}")))?;
    let encoded = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| GateError::Other(format!("cannot encode host key: {e}")))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encoded.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!(path = %path.display(), "generated Ed25519 host key");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("keygate-test-{}-{name}", std::process::id()))
            .join("host_key")
    }

    #[test]
    fn generate_then_load() {
        let path = temp_path("gen");
        let _ = std::fs::remove_file(&path);

        assert!(generate_if_missing(&path).unwrap());
        assert!(!generate_if_missing(&path).unwrap());
        let key = load(None, &path).unwrap();
        assert_eq!(key.algorithm(), Algorithm::Ed25519);

        let pem = std::fs::read_to_string(&path).unwrap();
        let inline = load(Some(&pem), Path::new("/nonexistent")).unwrap();
        assert_eq!(inline.public_key(), key.public_key());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load(None, Path::new("/nonexistent/keygate/host_key")).unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
    }

    #[test]
    fn garbage_inline_key_is_config_error() {
        let err = load(Some("not a key"), Path::new("/unused")).unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
    }
}
