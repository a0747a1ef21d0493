// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TLS certificate inspection and issuance.
//!
//! ## Fallback Chain
//!
//! 1. Existing pair with more than 24 hours of validity left → keep it.
//! 2. Issuance enabled and a DNS API token configured → `certbot` with the
//!    DNS challenge for the domain and its wildcard.
//! 3. Otherwise, or when step 2 fails → self-signed pair from `openssl`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::paths::CredentialPaths;
use super::secure_fs::{self, CERT_MODE, SECRET_MODE};
use crate::tools::{ToolCommand, ToolRunner};
use crate::validator::AuthorityCredentials;

/// Certificates expiring within this many hours are replaced.
pub const RENEWAL_WINDOW_HOURS: i64 = 24;

pub const SELF_SIGNED_KEY_BITS: u32 = 2048;
pub const SELF_SIGNED_VALIDITY_DAYS: u32 = 365;

/// Seconds certbot waits for the TXT record to propagate.
const DNS_PROPAGATION_SECONDS: u32 = 60;

const CERTBOT: &str = "certbot";
const OPENSSL: &str = "openssl";

/// State of the pair currently on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    Valid {
        not_after: DateTime<Utc>,
        fingerprint: String,
    },
    Missing {
        path: PathBuf,
    },
    Expiring {
        not_after: DateTime<Utc>,
    },
    Unreadable {
        reason: String,
    },
}

impl CertificateStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, CertificateStatus::Valid { .. })
    }
}

/// Where the certificate in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateSource {
    /// Already valid, nothing written
    Existing,
    Authority,
    SelfSigned,
}

/// Inspect the pair in `paths` against `now`.
pub fn inspect(paths: &CredentialPaths, now: DateTime<Utc>) -> CertificateStatus {
    let cert_path = paths.certificate();
    let key_path = paths.private_key();
    for path in [&cert_path, &key_path] {
        if !path.is_file() {
            return CertificateStatus::Missing { path: path.clone() };
        }
    }

    if let Err(reason) = read_private_key(&key_path) {
        return CertificateStatus::Unreadable { reason };
    }

    let (der, not_after) = match read_certificate(&cert_path) {
        Ok(parsed) => parsed,
        Err(reason) => return CertificateStatus::Unreadable { reason },
    };

    if not_after - now < TimeDelta::hours(RENEWAL_WINDOW_HOURS) {
        return CertificateStatus::Expiring { not_after };
    }

    CertificateStatus::Valid {
        not_after,
        fingerprint: fingerprint(&der),
    }
}

/// Leaf certificate DER and its `notAfter`.
fn read_certificate(path: &Path) -> Result<(Vec<u8>, DateTime<Utc>), String> {
    let bytes = fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let blocks =
        pem::parse_many(&bytes).map_err(|e| format!("invalid PEM in {}: {e}", path.display()))?;
    let leaf = blocks
        .into_iter()
        .find(|b| b.tag() == "CERTIFICATE")
        .ok_or_else(|| format!("no certificate block in {}", path.display()))?;

    let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
        .map_err(|e| format!("invalid X.509 certificate in {}: {e}", path.display()))?;
    let timestamp = cert.validity().not_after.timestamp();
    let not_after = DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| format!("invalid expiry timestamp in {}", path.display()))?;

    Ok((leaf.contents().to_vec(), not_after))
}

fn read_private_key(path: &Path) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let block =
        pem::parse(&bytes).map_err(|e| format!("invalid PEM in {}: {e}", path.display()))?;
    if block.tag().ends_with("PRIVATE KEY") {
        Ok(())
    } else {
        Err(format!("{} does not hold a private key", path.display()))
    }
}

/// SHA-256 of the DER encoding, lowercase hex.
pub fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Request a certificate for `domain` and `*.domain` over the DNS challenge
/// and install it into the certificate directory.
pub async fn issue_with_authority<R: ToolRunner>(
    runner: &R,
    paths: &CredentialPaths,
    domain: &str,
    authority: &AuthorityCredentials,
) -> Result<(), String> {
    let credentials = paths.dns_credentials();
    secure_fs::write_atomic(
        &credentials,
        format!("dns_cloudflare_api_token = {}\n", authority.api_token).as_bytes(),
        SECRET_MODE,
    )
    .map_err(|e| format!("failed to write DNS credentials: {e}"))?;

    let command = certbot_command(paths, domain, authority, &credentials);
    info!(
        domain,
        staging = authority.staging,
        "Requesting certificate from the authority"
    );
    let result = runner.run(&command).await;
    secure_fs::discard(&[&credentials]);

    let output = result.map_err(|e| e.to_string())?;
    if !output.success() {
        return Err(format!(
            "certbot exited with {:?}: {}",
            output.code,
            output.stderr_tail()
        ));
    }

    install_authority_output(paths, domain)
}

fn certbot_command(
    paths: &CredentialPaths,
    domain: &str,
    authority: &AuthorityCredentials,
    credentials: &Path,
) -> ToolCommand {
    let mut command = ToolCommand::new(CERTBOT)
        .args(["certonly", "--non-interactive", "--agree-tos", "--dns-cloudflare"])
        .arg("--dns-cloudflare-credentials")
        .arg(credentials.display().to_string())
        .arg("--dns-cloudflare-propagation-seconds")
        .arg(DNS_PROPAGATION_SECONDS.to_string())
        .arg("--config-dir")
        .arg(paths.letsencrypt_dir().display().to_string())
        .args(["--cert-name", domain])
        .args(["-d", domain])
        .arg("-d")
        .arg(format!("*.{domain}"));

    command = match &authority.email {
        Some(email) => command.args(["--email", email.as_str()]),
        None => command.arg("--register-unsafely-without-email"),
    };
    if authority.staging {
        command = command.arg("--staging");
    }
    if let Some(zone) = &authority.zone_id {
        command = command.env("CLOUDFLARE_ZONE_ID", zone.as_str());
    }
    command
}

/// Copy certbot's live lineage over the pair in the certificate directory.
fn install_authority_output(paths: &CredentialPaths, domain: &str) -> Result<(), String> {
    let chain = fs::read(paths.live_chain(domain))
        .map_err(|e| format!("certbot reported success but the chain is unreadable: {e}"))?;
    let key = fs::read(paths.live_key(domain))
        .map_err(|e| format!("certbot reported success but the key is unreadable: {e}"))?;

    let cert_path = paths.certificate();
    let key_path = paths.private_key();
    let staged_cert = secure_fs::staging_path(&cert_path);
    let staged_key = secure_fs::staging_path(&key_path);

    let result = (|| {
        fs::write(&staged_cert, &chain)?;
        fs::write(&staged_key, &key)?;
        secure_fs::promote(&staged_key, &key_path, SECRET_MODE)?;
        secure_fs::promote(&staged_cert, &cert_path, CERT_MODE)
    })();
    if let Err(e) = result {
        secure_fs::discard(&[&staged_cert, &staged_key]);
        return Err(format!("failed to install certificate: {e}"));
    }

    secure_fs::discard(&[&paths.self_signed_marker()]);
    Ok(())
}

/// Generate a self-signed pair for `domain`.
///
/// This is a non-production fallback; a marker file records it.
pub async fn issue_self_signed<R: ToolRunner>(
    runner: &R,
    paths: &CredentialPaths,
    domain: &str,
) -> Result<(), String> {
    let cert_path = paths.certificate();
    let key_path = paths.private_key();
    let staged_cert = secure_fs::staging_path(&cert_path);
    let staged_key = secure_fs::staging_path(&key_path);

    let command = ToolCommand::new(OPENSSL)
        .args(["req", "-x509", "-nodes"])
        .arg("-newkey")
        .arg(format!("rsa:{SELF_SIGNED_KEY_BITS}"))
        .arg("-days")
        .arg(SELF_SIGNED_VALIDITY_DAYS.to_string())
        .arg("-subj")
        .arg(format!("/CN={domain}"))
        .arg("-addext")
        .arg(format!("subjectAltName=DNS:{domain},DNS:*.{domain}"))
        .arg("-keyout")
        .arg(staged_key.display().to_string())
        .arg("-out")
        .arg(staged_cert.display().to_string());

    let outcome = match runner.run(&command).await {
        Ok(output) if output.success() => {
            if staged_cert.is_file() && staged_key.is_file() {
                Ok(())
            } else {
                Err("openssl succeeded but did not write both files".to_string())
            }
        }
        Ok(output) => Err(format!(
            "openssl exited with {:?}: {}",
            output.code,
            output.stderr_tail()
        )),
        Err(e) => Err(e.to_string()),
    };

    let installed = outcome.and_then(|()| {
        secure_fs::promote(&staged_key, &key_path, SECRET_MODE)
            .and_then(|()| secure_fs::promote(&staged_cert, &cert_path, CERT_MODE))
            .map_err(|e| format!("failed to install self-signed pair: {e}"))
    });
    if installed.is_err() {
        secure_fs::discard(&[&staged_cert, &staged_key]);
        return installed;
    }

    if let Err(e) = secure_fs::write_atomic(
        &paths.self_signed_marker(),
        format!("self-signed for {domain}; not for production use\n").as_bytes(),
        CERT_MODE,
    ) {
        warn!(error = %e, "Failed to write self-signed marker");
    }
    warn!(
        domain,
        "Using a SELF-SIGNED certificate; this is a non-production fallback"
    );
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::tools::testing::{failed, ok, FakeRunner};

    const DOMAIN: &str = "node.relational.network";

    fn authority() -> AuthorityCredentials {
        AuthorityCredentials {
            api_token: "cf-4b1d2e".to_string(),
            zone_id: Some("zone-91".to_string()),
            email: Some("ops@relational.network".to_string()),
            staging: true,
        }
    }

    /// Runner whose `openssl` writes a fresh pair to `-out` / `-keyout`.
    fn openssl_runner() -> FakeRunner {
        FakeRunner::new().on("openssl", |cmd| {
            let pair = long_lived(DOMAIN);
            let out = cmd.arg_after("-out").unwrap();
            let keyout = cmd.arg_after("-keyout").unwrap();
            write_pair(Path::new(out), Path::new(keyout), &pair);
            ok("")
        })
    }

    #[test]
    fn inspect_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        assert_eq!(
            inspect(&paths, Utc::now()),
            CertificateStatus::Missing { path: paths.certificate() }
        );

        std::fs::write(paths.certificate(), long_lived(DOMAIN).0).unwrap();
        assert_eq!(
            inspect(&paths, Utc::now()),
            CertificateStatus::Missing { path: paths.private_key() }
        );
    }

    #[test]
    fn inspect_accepts_long_lived_pair() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        write_pair(&paths.certificate(), &paths.private_key(), &long_lived(DOMAIN));

        match inspect(&paths, Utc::now()) {
            CertificateStatus::Valid { fingerprint, not_after } => {
                assert_eq!(fingerprint.len(), 64);
                assert_eq!(not_after.format("%Y-%m-%d").to_string(), "2045-01-01");
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn inspect_flags_certificate_inside_renewal_window() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        write_pair(&paths.certificate(), &paths.private_key(), &expiring_soon(DOMAIN));

        assert!(matches!(
            inspect(&paths, Utc::now()),
            CertificateStatus::Expiring { .. }
        ));
    }

    #[test]
    fn inspect_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        let pair = long_lived(DOMAIN);
        std::fs::write(paths.certificate(), "not a certificate").unwrap();
        std::fs::write(paths.private_key(), &pair.1).unwrap();
        assert!(matches!(
            inspect(&paths, Utc::now()),
            CertificateStatus::Unreadable { .. }
        ));

        std::fs::write(paths.certificate(), &pair.0).unwrap();
        std::fs::write(paths.private_key(), &pair.0).unwrap();
        assert!(matches!(
            inspect(&paths, Utc::now()),
            CertificateStatus::Unreadable { .. }
        ));
    }

    #[tokio::test]
    async fn self_signed_installs_pair_with_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        let runner = openssl_runner();

        issue_self_signed(&runner, &paths, DOMAIN).await.unwrap();

        assert!(inspect(&paths, Utc::now()).is_valid());
        assert_eq!(secure_fs::mode_of(&paths.certificate()).unwrap(), 0o644);
        assert_eq!(secure_fs::mode_of(&paths.private_key()).unwrap(), 0o600);
        assert!(paths.self_signed_marker().is_file());
        assert!(!secure_fs::staging_path(&paths.certificate()).exists());

        let call = &runner.calls()[0];
        assert_eq!(call.arg_after("-newkey"), Some("rsa:2048"));
        assert_eq!(call.arg_after("-days"), Some("365"));
        assert_eq!(call.arg_after("-subj"), Some("/CN=node.relational.network"));
    }

    #[tokio::test]
    async fn self_signed_failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        let runner = FakeRunner::new().on("openssl", |cmd| {
            // Half-written output before failing.
            std::fs::write(cmd.arg_after("-keyout").unwrap(), "partial").unwrap();
            failed("unable to write 'random state'")
        });

        let err = issue_self_signed(&runner, &paths, DOMAIN).await.unwrap_err();
        assert!(err.contains("random state"));
        assert!(!paths.certificate().exists());
        assert!(!paths.private_key().exists());
        assert!(!secure_fs::staging_path(&paths.private_key()).exists());
    }

    #[tokio::test]
    async fn authority_issuance_installs_live_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        std::fs::write(paths.self_signed_marker(), "old").unwrap();

        let live_chain = paths.live_chain(DOMAIN);
        let live_key = paths.live_key(DOMAIN);
        let runner = FakeRunner::new().on("certbot", move |cmd| {
            let creds = cmd.arg_after("--dns-cloudflare-credentials").unwrap();
            let ini = std::fs::read_to_string(creds).unwrap();
            assert_eq!(ini, "dns_cloudflare_api_token = cf-4b1d2e\n");
            write_pair(&live_chain, &live_key, &long_lived(DOMAIN));
            ok("Successfully received certificate.")
        });

        issue_with_authority(&runner, &paths, DOMAIN, &authority())
            .await
            .unwrap();

        assert!(inspect(&paths, Utc::now()).is_valid());
        assert_eq!(secure_fs::mode_of(&paths.private_key()).unwrap(), 0o600);
        assert!(!paths.self_signed_marker().exists());
        assert!(!paths.dns_credentials().exists());

        let call = &runner.calls()[0];
        assert!(call.args.contains(&"*.node.relational.network".to_string()));
        assert!(call.args.contains(&"--staging".to_string()));
        assert_eq!(call.arg_after("--email"), Some("ops@relational.network"));
        assert_eq!(
            call.env,
            vec![("CLOUDFLARE_ZONE_ID".to_string(), "zone-91".to_string())]
        );
    }

    #[tokio::test]
    async fn authority_failure_is_reported_and_credentials_removed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CredentialPaths::new(dir.path());
        let runner = FakeRunner::new().on("certbot", |_| failed("Invalid API token"));

        let mut creds = authority();
        creds.email = None;
        creds.staging = false;
        let err = issue_with_authority(&runner, &paths, DOMAIN, &creds)
            .await
            .unwrap_err();

        assert!(err.contains("Invalid API token"));
        assert!(!paths.dns_credentials().exists());
        assert!(!paths.certificate().exists());
        let call = &runner.calls()[0];
        assert!(call.args.contains(&"--register-unsafely-without-email".to_string()));
        assert!(!call.args.contains(&"--staging".to_string()));
    }
}
