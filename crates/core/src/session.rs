// Portvault - Session Store
// Encrypted persistence for tunnel collections

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use tracing::debug;

use crate::crypto;
use crate::error::{Error, Result};
use crate::forward::Forwarder;
use crate::tunnel::{Tunnel, TunnelSpec};

/// Default session file location, `<config_dir>/portvault/session.vault`.
pub fn default_session_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
    Ok(config_dir.join("portvault").join("session.vault"))
}

/// Encrypt and write `tunnels` to `path`, replacing any previous content.
///
/// Only the specs are persisted, in list order; runtime handles never leave
/// the process. The write is a plain full overwrite with no locking.
pub fn save_session(tunnels: &[Tunnel], path: &Path, password: &str) -> Result<()> {
    debug!("Saving {} tunnel(s) to {}", tunnels.len(), path.display());

    let specs: Vec<&TunnelSpec> = tunnels.iter().map(Tunnel::spec).collect();
    let json = serde_json::to_vec(&specs)?;
    let blob = crypto::encrypt(&json, password);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, B64.encode(blob))?;
    Ok(())
}

/// Read, decrypt, and rebuild the tunnel list from `path`.
///
/// Every returned tunnel is freshly constructed and inactive; the array
/// order in the file defines the returned order. Any failure (missing file,
/// bad base64, wrong password, unparseable plaintext, invalid spec) fails
/// the whole load; there is no partial result.
pub fn load_session(
    path: &Path,
    password: &str,
    forwarder: Arc<dyn Forwarder>,
) -> Result<Vec<Tunnel>> {
    debug!("Loading tunnels from {}", path.display());

    let text = fs::read_to_string(path)?;
    let blob = B64
        .decode(text.trim())
        .map_err(|e| Error::Format(format!("session file is not valid base64: {e}")))?;
    let json = crypto::decrypt(&blob, password)?;
    let mut specs: Vec<TunnelSpec> = serde_json::from_slice(&json)?;

    for spec in &mut specs {
        spec.normalize()?;
    }

    debug!("Loaded {} tunnel(s)", specs.len());
    Ok(specs
        .into_iter()
        .map(|spec| Tunnel::new(spec, forwarder.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::testing::StubForwarder;
    use tempfile::tempdir;

    fn forwarder() -> Arc<StubForwarder> {
        Arc::new(StubForwarder::default())
    }

    fn sample_specs() -> Vec<TunnelSpec> {
        vec![
            TunnelSpec::new(
                "db",
                "127.0.0.1",
                5432,
                "10.0.0.5",
                5432,
                Some("bastion.example.com".to_string()),
                22,
                "alice",
                "secret",
            )
            .unwrap(),
            TunnelSpec::new("web", "127.0.0.1", 8080, "10.0.0.6", 80, None, 22, "bob", "hunter2")
                .unwrap(),
            TunnelSpec::new("metrics", "::1", 9090, "10.0.0.7", 9090, None, 2222, "carol", "pw")
                .unwrap(),
        ]
    }

    fn tunnels_from(specs: Vec<TunnelSpec>) -> Vec<Tunnel> {
        specs
            .into_iter()
            .map(|spec| Tunnel::new(spec, forwarder() as Arc<dyn Forwarder>))
            .collect()
    }

    #[test]
    fn default_session_path_is_under_portvault() {
        let path = default_session_path().expect("should resolve config dir");
        assert!(path.to_string_lossy().contains("portvault"));
        assert!(path.ends_with("session.vault"));
    }

    #[test]
    fn round_trip_preserves_fields_and_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.vault");
        let tunnels = tunnels_from(sample_specs());

        save_session(&tunnels, &path, "hunter2").unwrap();
        let loaded = load_session(&path, "hunter2", forwarder()).unwrap();

        assert_eq!(loaded.len(), tunnels.len());
        for (original, restored) in tunnels.iter().zip(&loaded) {
            assert_eq!(original.spec(), restored.spec());
            assert!(!restored.is_active());
        }
    }

    #[test]
    fn wrong_password_fails_rather_than_returning_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.vault");
        save_session(&tunnels_from(sample_specs()), &path, "hunter2").unwrap();

        let err = load_session(&path, "wrong", forwarder()).unwrap_err();
        assert!(
            matches!(err, Error::Integrity | Error::Deserialization(_)),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn repeated_saves_produce_distinct_ciphertexts() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a.vault");
        let second = dir.path().join("b.vault");
        let tunnels = tunnels_from(sample_specs());

        save_session(&tunnels, &first, "hunter2").unwrap();
        save_session(&tunnels, &second, "hunter2").unwrap();

        assert_ne!(fs::read_to_string(first).unwrap(), fs::read_to_string(second).unwrap());
    }

    #[test]
    fn file_is_one_base64_blob_with_salt_and_iv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.vault");
        save_session(&tunnels_from(sample_specs()), &path, "pw").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let blob = B64.decode(text.trim()).expect("file must be base64");
        assert!(blob.len() > crypto::SALT_LEN + crypto::IV_LEN);
        // AES-CBC ciphertext is always block-aligned
        assert_eq!((blob.len() - crypto::SALT_LEN - crypto::IV_LEN) % 16, 0);
    }

    #[test]
    fn save_overwrites_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.vault");

        save_session(&tunnels_from(sample_specs()), &path, "pw").unwrap();
        save_session(&[], &path, "pw").unwrap();

        let loaded = load_session(&path, "pw", forwarder()).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = load_session(&dir.path().join("nope.vault"), "pw", forwarder()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn corrupted_base64_is_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.vault");
        fs::write(&path, "not base64 at all!!!").unwrap();

        let err = load_session(&path, "pw", forwarder()).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn loads_older_files_without_optional_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.vault");

        let json = r#"[{"name":"legacy","local_port":1234,"host_ip":"10.0.0.9","host_port":80,"user":"u","password":"p"}]"#;
        let blob = crypto::encrypt(json.as_bytes(), "pw");
        fs::write(&path, B64.encode(blob)).unwrap();

        let loaded = load_session(&path, "pw", forwarder()).unwrap();
        assert_eq!(loaded.len(), 1);
        let spec = loaded[0].spec();
        assert_eq!(spec.local_ip, "127.0.0.1");
        assert_eq!(spec.server_port, 22);
        assert_eq!(spec.server_ip, "10.0.0.9");
    }

    #[test]
    fn bastion_scenario_round_trips_exactly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.vault");
        let spec = TunnelSpec::new(
            "db",
            "127.0.0.1",
            5432,
            "10.0.0.5",
            5432,
            Some("bastion.example.com".to_string()),
            22,
            "alice",
            "secret",
        )
        .unwrap();
        let tunnels = tunnels_from(vec![spec.clone()]);

        save_session(&tunnels, &path, "hunter2").unwrap();

        let loaded = load_session(&path, "hunter2", forwarder()).unwrap();
        assert_eq!(loaded.len(), 1);
        let restored = loaded[0].spec();
        assert_eq!(restored.name, "db");
        assert_eq!(restored.local_ip, "127.0.0.1");
        assert_eq!(restored.local_port, 5432);
        assert_eq!(restored.host_ip, "10.0.0.5");
        assert_eq!(restored.host_port, 5432);
        assert_eq!(restored.server_ip, "bastion.example.com");
        assert_eq!(restored.server_port, 22);
        assert_eq!(restored.user, "alice");
        assert_eq!(restored.password, "secret");
        assert_eq!(restored, &spec);

        assert!(load_session(&path, "wrong", forwarder()).is_err());
    }
}
