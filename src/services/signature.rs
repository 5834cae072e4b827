use std::path::Path;

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use ring::{digest, hmac};

use crate::error::{BuildStep, PassError};
use crate::models::platform::Platform;

/// Hex SHA-1 digest, the digest the pkpass manifest is keyed with
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data))
}

/// Per-pass web service token: hex HMAC-SHA256 of the serial number.
///
/// Stable across rebuilds so installed passes keep authenticating.
pub fn authentication_token(serial_number: &str, secret: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hex::encode(hmac::sign(&key, serial_number.as_bytes()))
}

/// Pass Type ID signing identity plus the WWDR intermediate
pub struct PassSigner {
    certificate: X509,
    private_key: PKey<Private>,
    intermediate: X509,
}

impl std::fmt::Debug for PassSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassSigner").finish_non_exhaustive()
    }
}

fn unavailable(reason: impl Into<String>) -> PassError {
    PassError::signing_unavailable(Platform::Apple, reason)
}

fn parse_certificate(data: &[u8], what: &str) -> Result<X509, PassError> {
    X509::from_pem(data)
        .or_else(|_| X509::from_der(data))
        .map_err(|e| unavailable(format!("malformed {}: {}", what, e)))
}

impl PassSigner {
    pub fn new(
        certificate: X509,
        private_key: PKey<Private>,
        intermediate: X509,
    ) -> Result<Self, PassError> {
        let public_key = certificate
            .public_key()
            .map_err(|e| unavailable(format!("unreadable certificate key: {}", e)))?;
        if !public_key.public_eq(&private_key) {
            return Err(unavailable("private key does not match signer certificate"));
        }

        Ok(Self {
            certificate,
            private_key,
            intermediate,
        })
    }

    /// Loads PEM (or DER) encoded material; the key may be passphrase protected.
    pub fn from_pem(
        certificate: &[u8],
        private_key: &[u8],
        key_password: Option<&str>,
        intermediate: &[u8],
    ) -> Result<Self, PassError> {
        let certificate = parse_certificate(certificate, "signer certificate")?;
        let intermediate = parse_certificate(intermediate, "intermediate certificate")?;
        let private_key = match key_password {
            Some(password) => {
                PKey::private_key_from_pem_passphrase(private_key, password.as_bytes())
            }
            None => PKey::private_key_from_pem(private_key),
        }
        .map_err(|e| unavailable(format!("malformed private key: {}", e)))?;

        Self::new(certificate, private_key, intermediate)
    }

    pub fn from_files(
        certificate_path: &Path,
        private_key_path: &Path,
        key_password: Option<&str>,
        intermediate_path: &Path,
    ) -> Result<Self, PassError> {
        let read = |path: &Path| {
            std::fs::read(path)
                .map_err(|e| unavailable(format!("cannot read {}: {}", path.display(), e)))
        };

        Self::from_pem(
            &read(certificate_path)?,
            &read(private_key_path)?,
            key_password,
            &read(intermediate_path)?,
        )
    }

    /// Detached PKCS#7 signature (DER) over `data`, without signed attributes.
    pub fn sign_detached(&self, data: &[u8]) -> Result<Vec<u8>, PassError> {
        let signature_error = |e: openssl::error::ErrorStack| {
            PassError::build_failed(Platform::Apple, BuildStep::Signature, e)
        };

        let mut chain = Stack::new().map_err(signature_error)?;
        chain
            .push(self.intermediate.clone())
            .map_err(signature_error)?;

        let flags = Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY | Pkcs7Flags::NOATTR;
        let pkcs7 = Pkcs7::sign(&self.certificate, &self.private_key, &chain, data, flags)
            .map_err(signature_error)?;

        pkcs7.to_der().map_err(signature_error)
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }
}
