//! Compression and encryption pipeline.
//!
//! Ordering is fixed and never negotiated: outbound payloads are compressed
//! and then encrypted; inbound payloads are decrypted and then decompressed.
//! Both operations are injectable collaborators so tests can substitute
//! identity transforms.
//!
//! The defaults are zlib ([`ZlibCompressor`]) and AES-256-GCM with a random
//! nonce prepended to the ciphertext ([`AesGcmCipher`]); the cipher key is
//! provisioned pre-hashed out of band.

use std::{
    io::{Read, Write},
    sync::Arc,
};

use aes_gcm::{
    Aes256Gcm,
    Key,
    Nonce,
    aead::{Aead, KeyInit},
};
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use rand::RngCore;

use crate::error::{PipelineError, PipelineStage};

/// Length of the AES-GCM nonce prepended to each ciphertext.
const NONCE_LEN: usize = 12;

/// Compression collaborator. Output must be length-self-describing.
pub trait Compressor: Send + Sync {
    /// Compress `data`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] when the underlying codec fails.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError>;

    /// Decompress `data`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] when `data` is not a valid compressed
    /// stream.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError>;
}

/// Symmetric cipher collaborator.
pub trait Cipher: Send + Sync {
    /// Encrypt `data`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] when encryption fails.
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError>;

    /// Decrypt `data`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] when `data` is not a valid ciphertext for
    /// the provisioned key.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError>;
}

/// Zlib compressor with a configurable level.
pub struct ZlibCompressor {
    level: Compression,
}

impl ZlibCompressor {
    /// Create a compressor with the given zlib level.
    #[must_use]
    pub const fn new(level: Compression) -> Self { Self { level } }
}

impl Default for ZlibCompressor {
    fn default() -> Self { Self::new(Compression::default()) }
}

impl Compressor for ZlibCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(data)
            .map_err(|e| PipelineError::stage(PipelineStage::Compress, e))?;
        encoder
            .finish()
            .map_err(|e| PipelineError::stage(PipelineStage::Compress, e))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| PipelineError::stage(PipelineStage::Decompress, e))?;
        Ok(out)
    }
}

/// AES-256-GCM cipher prepending a fresh random nonce to each ciphertext.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Create a cipher from a pre-hashed 32-byte key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, data)
            .map_err(|e| PipelineError::stage(PipelineStage::Encrypt, e))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError> {
        if data.len() < NONCE_LEN {
            return Err(PipelineError::stage(
                PipelineStage::Decrypt,
                "ciphertext shorter than nonce",
            ));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| PipelineError::stage(PipelineStage::Decrypt, e))
    }
}

/// Identity transform implementing both collaborator traits, for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl Compressor for Identity {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError> { Ok(data.to_vec()) }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError> { Ok(data.to_vec()) }
}

impl Cipher for Identity {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError> { Ok(data.to_vec()) }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, PipelineError> { Ok(data.to_vec()) }
}

/// Fixed-order transform pair applied to every payload.
pub struct Pipeline {
    compressor: Arc<dyn Compressor>,
    cipher: Arc<dyn Cipher>,
}

impl Pipeline {
    /// Build a pipeline from collaborator implementations.
    #[must_use]
    pub fn new(compressor: Arc<dyn Compressor>, cipher: Arc<dyn Cipher>) -> Self {
        Self { compressor, cipher }
    }

    /// Pipeline with identity transforms at both stages, for tests.
    #[must_use]
    pub fn identity() -> Self { Self::new(Arc::new(Identity), Arc::new(Identity)) }

    /// Transform an outbound plaintext: compress, then encrypt.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure. An empty result from either stage is
    /// [`PipelineError::EmptyOutput`].
    pub fn outbound(&self, plaintext: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let compressed = self.compressor.compress(plaintext)?;
        if compressed.is_empty() {
            return Err(PipelineError::EmptyOutput {
                stage: PipelineStage::Compress,
            });
        }
        let sealed = self.cipher.encrypt(&compressed)?;
        if sealed.is_empty() {
            return Err(PipelineError::EmptyOutput {
                stage: PipelineStage::Encrypt,
            });
        }
        Ok(sealed)
    }

    /// Transform an inbound payload: decrypt, then decompress.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure. An empty result from either stage is
    /// [`PipelineError::EmptyOutput`].
    pub fn inbound(&self, payload: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let compressed = self.cipher.decrypt(payload)?;
        if compressed.is_empty() {
            return Err(PipelineError::EmptyOutput {
                stage: PipelineStage::Decrypt,
            });
        }
        let plaintext = self.compressor.decompress(&compressed)?;
        if plaintext.is_empty() {
            return Err(PipelineError::EmptyOutput {
                stage: PipelineStage::Decompress,
            });
        }
        Ok(plaintext)
    }
}
