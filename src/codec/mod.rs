use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod ordered;

pub use ordered::OrderedMap;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("content cannot be empty")]
    EmptyContent,

    #[error("content length is not a multiple of AES block size")]
    InvalidBlockSize,

    #[error("failed to unpad")]
    UnpadFailed,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("msgpack encode failed: {0}")]
    EncodeFailed(String),

    #[error("msgpack decode failed: {0}")]
    DecodeFailed(String)
}

/// Transport codec for the game servers: MessagePack body, PKCS#7 padding,
/// AES-CBC with a fixed key and IV.
///
/// The IV is reused for every message. That is the wire contract with the
/// upstream servers and must not be changed.
#[derive(Debug, Clone)]
pub struct Codec {
    key: Vec<u8>,
    iv: [u8; BLOCK_SIZE]
}

impl Codec {
    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self, CodecError> {
        let key = hex::decode(key_hex)
            .map_err(|err| CodecError::InvalidKey(format!("invalid aes key hex: {err}")))?;

        let iv = hex::decode(iv_hex)
            .map_err(|err| CodecError::InvalidKey(format!("invalid aes iv hex: {err}")))?;

        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(CodecError::InvalidKey(format!("invalid key length: got {}", key.len())));
        }

        let iv: [u8; BLOCK_SIZE] = iv.try_into()
            .map_err(|iv: Vec<u8>| CodecError::InvalidKey(format!("invalid iv length: got {}, want {BLOCK_SIZE}", iv.len())))?;

        Ok(Self {
            key,
            iv
        })
    }

    /// MessagePack-encode a value, then pad and encrypt it.
    pub fn pack<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let raw = rmp_serde::to_vec_named(value)
            .map_err(|err| CodecError::EncodeFailed(err.to_string()))?;

        self.pack_raw(&raw)
    }

    /// Pad and encrypt bytes that are already in their wire form
    /// (pre-serialized MessagePack, usually a login payload).
    pub fn pack_raw(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        if raw.is_empty() {
            return Err(CodecError::EmptyContent);
        }

        let encrypted = match self.key.len() {
            16 => Aes128CbcEnc::new_from_slices(&self.key, &self.iv)
                .map_err(|err| CodecError::InvalidKey(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(raw),

            24 => Aes192CbcEnc::new_from_slices(&self.key, &self.iv)
                .map_err(|err| CodecError::InvalidKey(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(raw),

            _ => Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
                .map_err(|err| CodecError::InvalidKey(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(raw)
        };

        Ok(encrypted)
    }

    fn decrypt(&self, content: &[u8]) -> Result<Vec<u8>, CodecError> {
        if content.is_empty() {
            return Err(CodecError::EmptyContent);
        }

        if content.len() % BLOCK_SIZE != 0 {
            return Err(CodecError::InvalidBlockSize);
        }

        let decrypted = match self.key.len() {
            16 => Aes128CbcDec::new_from_slices(&self.key, &self.iv)
                .map_err(|err| CodecError::InvalidKey(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(content),

            24 => Aes192CbcDec::new_from_slices(&self.key, &self.iv)
                .map_err(|err| CodecError::InvalidKey(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(content),

            _ => Aes256CbcDec::new_from_slices(&self.key, &self.iv)
                .map_err(|err| CodecError::InvalidKey(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(content)
        };

        decrypted.map_err(|_| CodecError::UnpadFailed)
    }

    /// Decrypt and decode into a concrete type.
    pub fn unpack<T: DeserializeOwned>(&self, content: &[u8]) -> Result<T, CodecError> {
        let raw = self.decrypt(content)?;

        rmp_serde::from_slice(&raw)
            .map_err(|err| CodecError::DecodeFailed(err.to_string()))
    }

    /// Decrypt and decode into an ordered map, preserving the key order
    /// the server put on the wire. All nested maps are likewise ordered.
    pub fn unpack_ordered(&self, content: &[u8]) -> Result<OrderedMap, CodecError> {
        let raw = self.decrypt(content)?;

        ordered::from_msgpack(&raw)
    }
}
