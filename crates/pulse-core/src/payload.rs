// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire payload packaging.
//!
//! A batch of metrics is serialized to JSON, gzip-compressed at the best
//! compression setting, optionally RSA-OAEP encrypted with a pre-loaded
//! public key, and optionally signed with HMAC-SHA256 over the final bytes.
//! [`PayloadCodec::open`] is the receiving side of the same contract.

use crate::error::RelayError;
use crate::metric::Metric;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::io::{Read, Write};

type HmacSha256 = Hmac<Sha256>;

/// OAEP overhead per encrypted block: two SHA-256 digests plus two bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

/// A packaged batch, ready for delivery. `encrypted` and `signature` are
/// surfaced to the transport layer as the `X-Encrypted` and `HashSHA256`
/// headers.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedPayload {
    pub body: Vec<u8>,
    pub encrypted: bool,
    pub signature: Option<String>,
}

/// Packages and unpackages metric batches. Construct once during wiring and
/// share; key material is loaded by the caller.
#[derive(Clone, Default)]
pub struct PayloadCodec {
    public_key: Option<RsaPublicKey>,
    private_key: Option<RsaPrivateKey>,
    signing_key: Option<Vec<u8>>,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables encryption with a PEM-encoded (`PUBLIC KEY`) RSA key.
    pub fn with_public_key_pem(mut self, pem: &str) -> Result<Self, RelayError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| RelayError::Payload(format!("invalid public key: {e}")))?;
        self.public_key = Some(key);
        Ok(self)
    }

    /// Enables decryption with a PEM-encoded PKCS#1 RSA private key.
    pub fn with_private_key_pem(mut self, pem: &str) -> Result<Self, RelayError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| RelayError::Payload(format!("invalid private key: {e}")))?;
        self.private_key = Some(key);
        Ok(self)
    }

    /// Enables signing/verification with a pre-shared secret.
    pub fn with_signing_key(mut self, key: &[u8]) -> Self {
        self.signing_key = Some(key.to_vec());
        self
    }

    /// serialize -> compress -> optional encrypt -> optional sign.
    pub fn seal(&self, metrics: &[Metric]) -> Result<SealedPayload, RelayError> {
        for metric in metrics {
            metric.validate()?;
        }

        let json = serde_json::to_vec(metrics).map_err(RelayError::payload)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&json).map_err(RelayError::payload)?;
        let mut body = encoder.finish().map_err(RelayError::payload)?;

        let encrypted = match &self.public_key {
            Some(key) => {
                body = encrypt_blocks(key, &body)?;
                true
            }
            None => false,
        };

        let signature = match &self.signing_key {
            Some(key) => Some(sign(key, &body)?),
            None => None,
        };

        Ok(SealedPayload {
            body,
            encrypted,
            signature,
        })
    }

    /// The inverse of [`seal`](Self::seal): verify -> decrypt -> decompress
    /// -> deserialize. Signature verification happens before anything else
    /// touches the body.
    pub fn open(&self, payload: &SealedPayload) -> Result<Vec<Metric>, RelayError> {
        if let (Some(key), Some(signature)) = (&self.signing_key, &payload.signature) {
            verify(key, &payload.body, signature)?;
        }

        let compressed = if payload.encrypted {
            let key = self.private_key.as_ref().ok_or_else(|| {
                RelayError::Payload("encrypted payload but no private key loaded".into())
            })?;
            decrypt_blocks(key, &payload.body)?
        } else {
            payload.body.clone()
        };

        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .map_err(RelayError::payload)?;

        let metrics: Vec<Metric> = serde_json::from_slice(&json).map_err(RelayError::payload)?;
        for metric in &metrics {
            metric.validate()?;
        }
        Ok(metrics)
    }
}

/// OAEP can only encrypt modulus − overhead bytes at a time, so the
/// compressed payload is split into blocks and the ciphertexts concatenated.
fn encrypt_blocks(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, RelayError> {
    let block_len = key.size() - OAEP_OVERHEAD;
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(data.len() + key.size());

    for block in data.chunks(block_len) {
        let ciphertext = key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), block)
            .map_err(|e| RelayError::Payload(format!("encryption failed: {e}")))?;
        out.extend_from_slice(&ciphertext);
    }
    Ok(out)
}

fn decrypt_blocks(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, RelayError> {
    let block_len = key.size();
    if data.is_empty() || data.len() % block_len != 0 {
        return Err(RelayError::Payload(format!(
            "ciphertext length {} is not a multiple of the key size",
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(data.len());
    for block in data.chunks(block_len) {
        let plaintext = key
            .decrypt(Oaep::new::<Sha256>(), block)
            .map_err(|e| RelayError::Payload(format!("decryption failed: {e}")))?;
        out.extend_from_slice(&plaintext);
    }
    Ok(out)
}

fn sign(key: &[u8], data: &[u8]) -> Result<String, RelayError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| RelayError::Payload(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify(key: &[u8], data: &[u8], signature: &str) -> Result<(), RelayError> {
    let raw = hex::decode(signature)
        .map_err(|e| RelayError::Payload(format!("malformed signature: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| RelayError::Payload(format!("invalid signing key: {e}")))?;
    mac.update(data);
    mac.verify_slice(&raw)
        .map_err(|_| RelayError::Payload("signature mismatch".into()))
}
