//! Firmware Signing
//!
//! Produces the SHA-256 checksum and the detached RSA signature
//! (PKCS#1 v1.5 over SHA-256) that devices verify before flashing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Missing input: {0}")]
    MissingInput(String),
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid RSA key: {0}")]
    InvalidKey(String),
    #[error("Signing failed: {0}")]
    Crypto(String),
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Failed to write signature: {0}")]
    Write(#[from] io::Error),
}

/// Checksum and detached signature of a firmware image
#[derive(Debug, Clone)]
pub struct SignedFirmware {
    /// Raw signature bytes, not encoded
    pub signature: Vec<u8>,
    /// Lowercase hex SHA-256 of the firmware
    pub checksum: String,
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, SigningError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| SigningError::InvalidKey(e.to_string()))
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, SigningError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| SigningError::InvalidKey(e.to_string()))
}

/// Sign `firmware` with a PEM encoded RSA private key (PKCS#8 or PKCS#1).
///
/// Nothing is returned unless both the checksum and the signature were produced.
pub fn sign(firmware: &[u8], private_key_pem: &str) -> Result<SignedFirmware, SigningError> {
    if firmware.is_empty() {
        return Err(SigningError::MissingInput("firmware image is empty".to_string()));
    }
    if private_key_pem.trim().is_empty() {
        return Err(SigningError::MissingInput("private key is empty".to_string()));
    }

    let signing_key = SigningKey::<Sha256>::new(parse_private_key(private_key_pem)?);
    let signature = signing_key
        .try_sign(firmware)
        .map_err(|e| SigningError::Crypto(e.to_string()))?;

    Ok(SignedFirmware {
        signature: signature.to_vec(),
        checksum: sha256_hex(firmware),
    })
}

/// Verify a detached signature against a PEM encoded RSA public key
pub fn verify(firmware: &[u8], signature: &[u8], public_key_pem: &str) -> Result<(), SigningError> {
    let verifying_key = VerifyingKey::<Sha256>::new(parse_public_key(public_key_pem)?);
    let signature = Signature::try_from(signature).map_err(|_| SigningError::InvalidSignature)?;
    verifying_key
        .verify(firmware, &signature)
        .map_err(|_| SigningError::InvalidSignature)
}

/// Generate a new RSA key pair as `(private PKCS#8 PEM, public SPKI PEM)`
pub fn generate_keypair(bits: usize) -> Result<(String, String), SigningError> {
    let mut rng = rand::thread_rng();
    let private_key =
        RsaPrivateKey::new(&mut rng, bits).map_err(|e| SigningError::Crypto(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| SigningError::Crypto(e.to_string()))?;
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| SigningError::Crypto(e.to_string()))?;

    Ok((private_pem.to_string(), public_pem))
}

/// A built firmware image together with its signature
#[derive(Debug, Clone)]
pub struct SignedArtifact {
    pub firmware: Vec<u8>,
    pub signature: Vec<u8>,
    pub checksum: String,
    pub signature_path: PathBuf,
}

/// Signs build artifacts with a private key kept on disk
#[derive(Debug, Clone)]
pub struct FirmwareSigner {
    private_key_path: PathBuf,
}

impl FirmwareSigner {
    pub fn new(private_key_path: impl Into<PathBuf>) -> Self {
        Self {
            private_key_path: private_key_path.into(),
        }
    }

    fn read_input(path: &Path, what: &str) -> Result<Vec<u8>, SigningError> {
        match fs::read(path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SigningError::MissingInput(
                format!("{} not found: {}", what, path.display()),
            )),
            Err(source) => Err(SigningError::Unreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Sign the firmware at `firmware_path` and write the raw signature to
    /// `signature_path`.
    ///
    /// The signature file appears only once signing succeeded.
    pub fn sign_artifact(
        &self,
        firmware_path: &Path,
        signature_path: &Path,
    ) -> Result<SignedArtifact, SigningError> {
        let firmware = Self::read_input(firmware_path, "Firmware")?;
        let key = Self::read_input(&self.private_key_path, "Private key")?;
        let key = String::from_utf8(key)
            .map_err(|_| SigningError::InvalidKey("private key is not PEM text".to_string()))?;

        let signed = sign(&firmware, &key)?;

        let temp_path = signature_path.with_extension("sig.tmp");
        fs::write(&temp_path, &signed.signature)?;
        if let Err(e) = fs::rename(&temp_path, signature_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        info!(
            path = %signature_path.display(),
            bytes = signed.signature.len(),
            checksum = %signed.checksum,
            "Firmware signed"
        );

        Ok(SignedArtifact {
            firmware,
            signature: signed.signature,
            checksum: signed.checksum,
            signature_path: signature_path.to_path_buf(),
        })
    }
}
