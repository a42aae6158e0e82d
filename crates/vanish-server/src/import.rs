//! One-shot import of the historical one-JSON-file-per-link data directory.
//!
//! Only the two-blob layout (`encrypted_text` / `encrypted_secrets`) maps onto
//! a [`Record`]. Older single-payload and plaintext files are counted and left
//! alone. Source files are only ever read.

use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{DELETE_AFTER_DAYS_RANGE, MAX_VIEWS_RANGE};
use crate::lifecycle::SECS_PER_DAY;
use crate::store::{crypto, Ciphertext, Record, RecordId, RecordState, ViewEntry};
use crate::vault::Vault;

// Fallbacks for fields missing from a legacy file, as the old cleanup job
// read them.
const LEGACY_DELETE_AFTER_DAYS: u32 = 30;
const LEGACY_MAX_VIEWS: u32 = 9_999;
const LEGACY_SECRETS_EXPIRE: &str = "2099-01-01T00:00:00Z";

/// Latest accepted `_secrets_expired_at`, relative to the import time.
const MAX_STAMP_AHEAD_DAYS: i64 = 3650;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    /// Id already present in the store (live or trashed).
    pub existing: usize,
    /// `encrypted_payload` or plaintext `sections` files.
    pub legacy_shape: usize,
    /// Password hashes that cannot be verified here (bcrypt and friends).
    pub unsupported_password: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct LegacyRecord {
    created: Option<String>,
    expires_secrets: Option<String>,
    delete_after_days: Option<u32>,
    max_views: Option<u32>,
    current_views: Option<u32>,
    password_hash: Option<String>,
    #[serde(default)]
    view_log: Vec<LegacyView>,
    encrypted_text: Option<String>,
    encrypted_secrets: Option<String>,
    encrypted_payload: Option<Value>,
    sections: Option<Value>,
    /// Unix seconds, or an RFC 3339 string in some older files.
    #[serde(rename = "_secrets_expired_at")]
    secrets_expired_at: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LegacyView {
    time: Option<String>,
    ip: Option<String>,
    ip_hash: Option<String>,
}

enum Outcome {
    Imported,
    Existing,
    LegacyShape,
    UnsupportedPassword,
}

/// Import every `<uuid>.json` file directly inside `dir`.
pub fn import_dir(vault: &Vault, dir: &Path) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("read import dir {}", dir.display()))?;

    for entry in entries {
        let path = entry.context("read dir entry")?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match import_file(vault, &path) {
            Ok(Outcome::Imported) => report.imported += 1,
            Ok(Outcome::Existing) => report.existing += 1,
            Ok(Outcome::LegacyShape) => report.legacy_shape += 1,
            Ok(Outcome::UnsupportedPassword) => report.unsupported_password += 1,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "import failed");
                report.failed += 1;
            }
        }
    }

    info!(
        imported = report.imported,
        existing = report.existing,
        legacy_shape = report.legacy_shape,
        unsupported_password = report.unsupported_password,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

fn import_file(vault: &Vault, path: &Path) -> Result<Outcome> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("non-utf8 file name")?;
    let Some(id) = RecordId::parse(stem) else {
        bail!("file name is not a record id");
    };

    let raw = std::fs::read(path).context("read file")?;
    let legacy: LegacyRecord = serde_json::from_slice(&raw).context("parse json")?;

    if legacy.encrypted_text.is_none()
        && (legacy.encrypted_payload.is_some() || legacy.sections.is_some())
    {
        debug!(id = %id, "skipping legacy payload shape");
        return Ok(Outcome::LegacyShape);
    }

    let password_hash = match legacy.password_hash.as_deref() {
        Some(h) if !h.is_empty() && !crypto::is_supported_hash(h) => {
            debug!(id = %id, "skipping unsupported password hash");
            return Ok(Outcome::UnsupportedPassword);
        }
        Some(h) if !h.is_empty() => Some(h.to_owned()),
        _ => None,
    };

    if vault.store().contains(&id)? {
        return Ok(Outcome::Existing);
    }

    let record = convert(vault, legacy, password_hash)?;
    match vault.store().create(&id, &record) {
        Ok(()) => {
            debug!(id = %id, "record imported");
            Ok(Outcome::Imported)
        }
        Err(crate::VaultError::Conflict) => Ok(Outcome::Existing),
        Err(e) => Err(e.into()),
    }
}

fn convert(vault: &Vault, legacy: LegacyRecord, password_hash: Option<String>) -> Result<Record> {
    let created_at = parse_time(legacy.created.as_deref().context("missing created")?)?;
    let secrets_expire_at =
        parse_time(legacy.expires_secrets.as_deref().unwrap_or(LEGACY_SECRETS_EXPIRE))?;

    let delete_after_days = legacy.delete_after_days.unwrap_or(LEGACY_DELETE_AFTER_DAYS);
    check_range("delete_after_days", delete_after_days, DELETE_AFTER_DAYS_RANGE)?;
    let max_views = legacy.max_views.unwrap_or(LEGACY_MAX_VIEWS);
    check_range("max_views", max_views, MAX_VIEWS_RANGE)?;
    // views past the limit only ever meant "expired"
    let current_views = legacy.current_views.unwrap_or(0).min(max_views);

    let text_blob = decode_blob(
        legacy
            .encrypted_text
            .as_deref()
            .context("missing encrypted_text")?,
    )
    .context("encrypted_text")?;
    let secret_blob = legacy
        .encrypted_secrets
        .as_deref()
        .map(decode_blob)
        .transpose()
        .context("encrypted_secrets")?;
    let latest = vault.now() + MAX_STAMP_AHEAD_DAYS * SECS_PER_DAY;
    let expired_at = legacy
        .secrets_expired_at
        .as_ref()
        .map(parse_timestamp)
        .transpose()?;
    if let Some(at) = expired_at {
        if !(0..=latest).contains(&at) {
            bail!("_secrets_expired_at {at} out of range");
        }
    }

    let section_count = 1 + u32::from(secret_blob.is_some());
    let state = match (secret_blob, expired_at) {
        (None, Some(expired_at)) => RecordState::SecretsExpired {
            text_blob,
            expired_at,
        },
        (secret_blob, _) => RecordState::Active {
            text_blob,
            secret_blob,
        },
    };

    let view_log = legacy
        .view_log
        .into_iter()
        .filter_map(|v| {
            let at = v.time.as_deref().and_then(|t| parse_time(t).ok())?;
            let origin = match (v.ip_hash, v.ip) {
                (Some(hash), _) => hash,
                (None, Some(ip)) => vault.fingerprint(&ip),
                (None, None) => return None,
            };
            Some(ViewEntry { at, origin })
        })
        .collect();

    Ok(Record {
        created_at,
        secrets_expire_at,
        delete_after_days,
        max_views,
        current_views,
        password_hash,
        section_count,
        view_log,
        state,
    })
}

fn check_range(name: &str, value: u32, (lo, hi): (u32, u32)) -> Result<()> {
    if value < lo || value > hi {
        bail!("{name} {value} outside {lo}..={hi}");
    }
    Ok(())
}

fn decode_blob(s: &str) -> Result<Ciphertext> {
    let bytes = STANDARD.decode(s).context("invalid base64")?;
    if bytes.is_empty() {
        bail!("empty blob");
    }
    Ok(Ciphertext::new(bytes))
}

fn parse_time(s: &str) -> Result<i64> {
    let t = humantime::parse_rfc3339_weak(s).with_context(|| format!("bad timestamp {s:?}"))?;
    let secs = t
        .duration_since(UNIX_EPOCH)
        .context("timestamp before epoch")?
        .as_secs();
    i64::try_from(secs).context("timestamp out of range")
}

fn parse_timestamp(v: &Value) -> Result<i64> {
    match v {
        Value::Number(n) => n.as_i64().context("bad unix timestamp"),
        Value::String(s) => parse_time(s),
        other => bail!("unexpected _secrets_expired_at {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Phase;
    use crate::vault::testing::{vault, T0};
    use serde_json::json;

    const ID: &str = "3f2a1c4e-9b7d-4e21-a8f0-1c2d3e4f5a6b";

    fn write(dir: &Path, name: &str, body: Value) {
        std::fs::write(dir.join(name), serde_json::to_vec_pretty(&body).unwrap()).unwrap();
    }

    fn two_blob(secrets: Option<&str>) -> Value {
        json!({
            "id": ID,
            "created": "2023-11-14T22:13:20Z",
            "expires_secrets": "2023-11-28T22:13:20Z",
            "delete_after_days": 30,
            "max_views": 5,
            "current_views": 2,
            "status": "active",
            "password_hash": null,
            "view_log": [
                {"time": "2023-11-15T10:00:00Z", "ip": "203.0.113.9"},
                {"time": "2023-11-15T11:00:00Z", "ip_hash": "abcdef012345"}
            ],
            "encrypted_text": STANDARD.encode(b"text-ct"),
            "encrypted_secrets": secrets,
        })
    }

    #[test]
    fn imports_two_blob_record() {
        let (v, _clock, _dir) = vault();
        let src = tempfile::tempdir().unwrap();
        let secret = STANDARD.encode(b"secret-ct");
        write(src.path(), &format!("{ID}.json"), two_blob(Some(&secret)));

        let report = import_dir(&v, src.path()).unwrap();
        assert_eq!(report.imported, 1);

        let r = v.store().read(&RecordId::parse(ID).unwrap()).unwrap();
        assert_eq!(r.created_at, T0);
        assert_eq!(r.secrets_expire_at, T0 + 14 * SECS_PER_DAY);
        assert_eq!(r.delete_after_days, 30);
        assert_eq!(r.current_views, 2);
        assert_eq!(r.section_count, 2);
        assert_eq!(r.text_blob().unwrap().as_bytes(), b"text-ct");
        assert_eq!(r.secret_blob().unwrap().as_bytes(), b"secret-ct");
        assert_eq!(r.view_log.len(), 2);
        assert_eq!(r.view_log[0].origin, v.fingerprint("203.0.113.9"));
        assert_ne!(r.view_log[0].origin, "203.0.113.9");
        assert_eq!(r.view_log[1].origin, "abcdef012345");
    }

    #[test]
    fn expired_secrets_import_as_secrets_expired() {
        let (v, clock, _dir) = vault();
        let src = tempfile::tempdir().unwrap();
        let mut body = two_blob(None);
        body["_secrets_expired_at"] = json!(T0 + 100);
        write(src.path(), &format!("{ID}.json"), body);

        import_dir(&v, src.path()).unwrap();
        clock.set(T0 + 200);
        let view = v.view(ID, None, "198.51.100.1").unwrap();
        assert_eq!(view.phase, Phase::SecretsExpired);
        assert!(view.masked);
        assert_eq!(view.secrets_expired_at, Some(T0 + 100));
        assert_eq!(view.section_count, 1);
    }

    #[test]
    fn skips_legacy_shapes_existing_and_bcrypt() {
        let (v, _clock, _dir) = vault();
        let src = tempfile::tempdir().unwrap();
        write(
            src.path(),
            "0b5c8d2e-1f3a-4b6c-9d7e-8f9a0b1c2d3e.json",
            json!({"created": "2023-11-14T22:13:20Z", "encrypted_payload": "abc"}),
        );
        write(
            src.path(),
            "1c6d9e3f-2a4b-4c7d-8e9f-0a1b2c3d4e5f.json",
            json!({"created": "2023-11-14T22:13:20Z", "sections": []}),
        );
        let mut bcrypt = two_blob(None);
        bcrypt["password_hash"] = json!("$2y$10$abcdefghijklmnopqrstuuABCDEFGHIJKLMNOPQRSTUVWXYZ01234");
        write(src.path(), "2d7e0f4a-3b5c-4d8e-9f0a-1b2c3d4e5f60.json", bcrypt);
        write(src.path(), &format!("{ID}.json"), two_blob(None));
        std::fs::write(src.path().join("README.txt"), "not a record").unwrap();

        let report = import_dir(&v, src.path()).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.legacy_shape, 2);
        assert_eq!(report.unsupported_password, 1);

        let again = import_dir(&v, src.path()).unwrap();
        assert_eq!(again.imported, 0);
        assert_eq!(again.existing, 1);
        assert_eq!(v.store().count().unwrap(), 1);
    }

    #[test]
    fn missing_settings_use_legacy_fallbacks() {
        let (v, _clock, _dir) = vault();
        let src = tempfile::tempdir().unwrap();
        write(
            src.path(),
            &format!("{ID}.json"),
            json!({
                "created": "2023-11-14T22:13:20Z",
                "encrypted_text": STANDARD.encode(b"text-ct"),
                "encrypted_secrets": STANDARD.encode(b"secret-ct"),
            }),
        );

        assert_eq!(import_dir(&v, src.path()).unwrap().imported, 1);
        let r = v.store().read(&RecordId::parse(ID).unwrap()).unwrap();
        assert_eq!(r.delete_after_days, 30);
        assert_eq!(r.max_views, 9_999);
        assert_eq!(r.current_views, 0);
        assert_eq!(r.secrets_expire_at, 4_070_908_800);
    }

    #[test]
    fn settings_are_held_to_creation_limits() {
        let (v, _clock, _dir) = vault();
        let src = tempfile::tempdir().unwrap();

        let mut over_counted = two_blob(None);
        over_counted["current_views"] = json!(50);
        write(src.path(), &format!("{ID}.json"), over_counted);

        let mut long_retention = two_blob(None);
        long_retention["delete_after_days"] = json!(4_000_000);
        write(
            src.path(),
            "5a0b3c7d-6e8f-4a1b-9c2d-3e4f5a6b7c8d.json",
            long_retention,
        );

        let mut no_views = two_blob(None);
        no_views["max_views"] = json!(0);
        write(
            src.path(),
            "6b1c4d8e-7f9a-4b2c-8d3e-4f5a6b7c8d9e.json",
            no_views,
        );

        let report = import_dir(&v, src.path()).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.failed, 2);

        let r = v.store().read(&RecordId::parse(ID).unwrap()).unwrap();
        assert_eq!(r.max_views, 5);
        assert_eq!(r.current_views, 5);
    }

    #[test]
    fn far_future_expiry_stamp_is_rejected() {
        let (v, clock, _dir) = vault();
        let src = tempfile::tempdir().unwrap();
        let mut body = two_blob(None);
        body["delete_after_days"] = json!(1);
        body["_secrets_expired_at"] = json!(i64::MAX);
        write(src.path(), &format!("{ID}.json"), body);

        let other = "7c2d5e9f-8a0b-4c3d-9e4f-5a6b7c8d9e0f";
        let mut ok = two_blob(None);
        ok["delete_after_days"] = json!(1);
        ok["_secrets_expired_at"] = json!(T0);
        write(src.path(), &format!("{other}.json"), ok);

        let report = import_dir(&v, src.path()).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.imported, 1);

        clock.advance_days(1);
        let sweep = v.sweep().unwrap();
        assert_eq!(sweep.trashed, 1);
        assert_eq!(sweep.failed, 0);
    }

    #[test]
    fn malformed_files_are_counted_not_fatal() {
        let (v, _clock, _dir) = vault();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join(format!("{ID}.json")), "{ not json").unwrap();
        write(src.path(), "not-a-uuid.json", two_blob(None));
        let mut bad_blob = two_blob(None);
        bad_blob["encrypted_text"] = json!("%%%");
        write(
            src.path(),
            "4f9a2b6c-5d7e-4f0a-8b1c-2d3e4f5a6b7c.json",
            bad_blob,
        );

        let report = import_dir(&v, src.path()).unwrap();
        assert_eq!(report.failed, 3);
        assert_eq!(report.imported, 0);
    }
}
