//! Client-side chunk encryption.
//!
//! Content is encrypted with AES-256-CBC. Block and append blobs are PKCS7
//! padded; page blobs are not, so their payload has to stay 16-byte aligned.
//! Both stages are incremental: `update` emits every complete cipher block
//! and keeps the remainder, `finalize` flushes it.

use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};

use crate::{BlobError, BlobResult};

/// AES block size in bytes
pub const CIPHER_BLOCK_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Content encryption key and initialization vector
#[derive(Clone, PartialEq, Eq)]
pub struct ContentEncryption {
    pub key: [u8; 32],
    pub iv: [u8; 16],
}

impl ContentEncryption {
    pub fn new(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }
}

impl std::fmt::Debug for ContentEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentEncryption")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

/// An incremental byte transform
pub trait Transform: Send {
    /// Transform as much of `data` as possible, buffering the rest
    fn update(&mut self, data: &[u8]) -> Vec<u8>;

    /// Flush buffered bytes. The transform must not be used afterwards.
    fn finalize(&mut self) -> BlobResult<Vec<u8>>;
}

/// PKCS7 padder
#[derive(Debug, Default)]
pub struct Pkcs7Padder {
    buffer: Vec<u8>,
}

impl Pkcs7Padder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for Pkcs7Padder {
    fn update(&mut self, data: &[u8]) -> Vec<u8> {
        self.buffer.extend_from_slice(data);
        let complete = self.buffer.len() / CIPHER_BLOCK_SIZE * CIPHER_BLOCK_SIZE;
        self.buffer.drain(..complete).collect()
    }

    fn finalize(&mut self) -> BlobResult<Vec<u8>> {
        // Always 1..=16 bytes of padding, a full block when already aligned
        let pad = CIPHER_BLOCK_SIZE - self.buffer.len();
        let mut out = std::mem::take(&mut self.buffer);
        out.resize(CIPHER_BLOCK_SIZE, pad as u8);
        Ok(out)
    }
}

/// AES-256-CBC encryptor
pub struct AesCbcEncryptor {
    cipher: Aes256CbcEnc,
    buffer: Vec<u8>,
}

impl AesCbcEncryptor {
    pub fn new(encryption: &ContentEncryption) -> Self {
        Self {
            cipher: Aes256CbcEnc::new(&encryption.key.into(), &encryption.iv.into()),
            buffer: Vec::new(),
        }
    }
}

impl Transform for AesCbcEncryptor {
    fn update(&mut self, data: &[u8]) -> Vec<u8> {
        self.buffer.extend_from_slice(data);
        let complete = self.buffer.len() / CIPHER_BLOCK_SIZE * CIPHER_BLOCK_SIZE;

        let mut out = Vec::with_capacity(complete);
        for plain in self.buffer[..complete].chunks_exact(CIPHER_BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(plain);
            self.cipher.encrypt_block_mut(&mut block);
            out.extend_from_slice(&block);
        }
        self.buffer.drain(..complete);
        out
    }

    fn finalize(&mut self) -> BlobResult<Vec<u8>> {
        if !self.buffer.is_empty() {
            return Err(BlobError::invalid(format!(
                "unpadded encrypted content must be a multiple of {} bytes ({} trailing bytes)",
                CIPHER_BLOCK_SIZE,
                self.buffer.len()
            )));
        }
        Ok(Vec::new())
    }
}

/// Padder followed by encryptor, either stage optional
#[derive(Default)]
pub struct ChunkEncoder {
    padder: Option<Pkcs7Padder>,
    encryptor: Option<AesCbcEncryptor>,
}

impl ChunkEncoder {
    /// Build the encoder for a session. Without encryption there is no padding either.
    pub fn new(encryption: Option<&ContentEncryption>, should_pad: bool) -> Self {
        match encryption {
            Some(encryption) => Self {
                padder: should_pad.then(Pkcs7Padder::new),
                encryptor: Some(AesCbcEncryptor::new(encryption)),
            },
            None => Self::default(),
        }
    }

    /// True when chunks pass through unchanged
    pub fn is_identity(&self) -> bool {
        self.padder.is_none() && self.encryptor.is_none()
    }

    /// Encode a chunk that is not the last one
    pub fn update(&mut self, data: Vec<u8>) -> Vec<u8> {
        let mut data = data;
        if let Some(padder) = self.padder.as_mut() {
            data = padder.update(&data);
        }
        if let Some(encryptor) = self.encryptor.as_mut() {
            data = encryptor.update(&data);
        }
        data
    }

    /// Encode the last chunk and flush both stages
    pub fn finish(&mut self, data: Vec<u8>) -> BlobResult<Vec<u8>> {
        let mut data = data;
        if let Some(padder) = self.padder.as_mut() {
            data = padder.update(&data);
            data.extend(padder.finalize()?);
        }
        if let Some(encryptor) = self.encryptor.as_mut() {
            data = encryptor.update(&data);
            data.extend(encryptor.finalize()?);
        }
        Ok(data)
    }
}
