//! Stored credential decryption.
//!
//! Passwords are stored as Fernet tokens:
//!
//! ```text
//! 0x80 | timestamp (u64 BE) | IV (16) | AES-128-CBC ciphertext | HMAC-SHA256 (32)
//! ```
//!
//! encoded with url-safe base64. The 32-byte key is the HMAC signing key
//! followed by the AES encryption key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const VERSION: u8 = 0x80;
const HEADER_LEN: usize = 1 + 8 + 16;
const MAC_LEN: usize = 32;

/// Environment variable holding a url-safe base64 Fernet key.
pub const ENCRYPTION_KEY_ENV: &str = "QUERYHUB_ENCRYPTION_KEY";
/// Secret the key is derived from when no explicit key is configured.
pub const JWT_SECRET_ENV: &str = "JWT_SECRET_KEY";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("decryption key is not available")]
    KeyUnavailable,

    #[error("stored secret is malformed")]
    MalformedCiphertext,

    #[error("stored secret failed signature verification")]
    InvalidSignature,

    #[error("decrypted secret is not valid UTF-8")]
    InvalidPlaintext,
}

/// Turns a stored secret into a usable plaintext credential.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, encrypted: &str) -> Result<SecretString, CredentialError>;
}

/// A 32-byte Fernet key.
#[derive(Clone)]
pub struct FernetKey {
    signing: [u8; 16],
    encryption: [u8; 16],
}

impl FernetKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let mut signing = [0u8; 16];
        let mut encryption = [0u8; 16];
        signing.copy_from_slice(&bytes[..16]);
        encryption.copy_from_slice(&bytes[16..]);
        Self {
            signing,
            encryption,
        }
    }

    /// Parse a url-safe base64 key (the format `Fernet.generate_key()` emits).
    pub fn from_base64(encoded: &str) -> Result<Self, CredentialError> {
        let raw = decode_url_safe(encoded.trim()).ok_or(CredentialError::KeyUnavailable)?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CredentialError::KeyUnavailable)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Derive a key from an application secret.
    ///
    /// Takes the first 32 characters of the secret as UTF-8, right-padded
    /// with ASCII `'0'`. Fails if those characters encode to more than 32
    /// bytes, since that is not a valid Fernet key.
    pub fn derive_from_secret(secret: &str) -> Result<Self, CredentialError> {
        if secret.is_empty() {
            return Err(CredentialError::KeyUnavailable);
        }
        let head = match secret.char_indices().nth(32) {
            Some((end, _)) => &secret[..end],
            None => secret,
        };
        if head.len() > 32 {
            return Err(CredentialError::KeyUnavailable);
        }
        let mut bytes = [b'0'; 32];
        bytes[..head.len()].copy_from_slice(head.as_bytes());
        Ok(Self::from_bytes(&bytes))
    }

    /// Load the key from `QUERYHUB_ENCRYPTION_KEY`, falling back to
    /// deriving it from `JWT_SECRET_KEY`.
    pub fn from_env() -> Result<Self, CredentialError> {
        if let Ok(encoded) = std::env::var(ENCRYPTION_KEY_ENV) {
            return Self::from_base64(&encoded);
        }
        match std::env::var(JWT_SECRET_ENV) {
            Ok(secret) => Self::derive_from_secret(&secret),
            Err(_) => Err(CredentialError::KeyUnavailable),
        }
    }

    pub fn to_base64(&self) -> String {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&self.signing);
        bytes[16..].copy_from_slice(&self.encryption);
        URL_SAFE.encode(bytes)
    }
}

/// Fernet-backed resolver.
///
/// Constructed without a key when none is configured; every resolution
/// then fails with `KeyUnavailable` instead of at startup.
#[derive(Clone)]
pub struct FernetResolver {
    key: Option<FernetKey>,
}

impl FernetResolver {
    pub fn new(key: FernetKey) -> Self {
        Self { key: Some(key) }
    }

    pub fn without_key() -> Self {
        Self { key: None }
    }

    pub fn from_env() -> Self {
        Self {
            key: FernetKey::from_env().ok(),
        }
    }

    /// Encrypt a plaintext secret for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        let key = self.key.as_ref().ok_or(CredentialError::KeyUnavailable)?;
        let iv: [u8; 16] = rand::thread_rng().gen();
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        Ok(encrypt_with(key, plaintext.as_bytes(), iv, timestamp))
    }
}

impl CredentialResolver for FernetResolver {
    fn resolve(&self, encrypted: &str) -> Result<SecretString, CredentialError> {
        let key = self.key.as_ref().ok_or(CredentialError::KeyUnavailable)?;
        let plaintext = decrypt_with(key, encrypted)?;
        let plaintext = String::from_utf8(plaintext).map_err(|_| CredentialError::InvalidPlaintext)?;
        Ok(SecretString::from(plaintext))
    }
}

fn encrypt_with(key: &FernetKey, plaintext: &[u8], iv: [u8; 16], timestamp: u64) -> String {
    let ciphertext =
        Aes128CbcEnc::new(&key.encryption.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len() + MAC_LEN);
    token.push(VERSION);
    token.extend_from_slice(&timestamp.to_be_bytes());
    token.extend_from_slice(&iv);
    token.extend_from_slice(&ciphertext);

    let mut mac = HmacSha256::new_from_slice(&key.signing).expect("HMAC can take key of any size");
    mac.update(&token);
    token.extend_from_slice(&mac.finalize().into_bytes());

    URL_SAFE.encode(token)
}

fn decrypt_with(key: &FernetKey, token: &str) -> Result<Vec<u8>, CredentialError> {
    let raw = decode_url_safe(token.trim()).ok_or(CredentialError::MalformedCiphertext)?;

    if raw.len() < HEADER_LEN + MAC_LEN || raw[0] != VERSION {
        return Err(CredentialError::MalformedCiphertext);
    }

    let (signed, tag) = raw.split_at(raw.len() - MAC_LEN);
    let mut mac = HmacSha256::new_from_slice(&key.signing).expect("HMAC can take key of any size");
    mac.update(signed);
    mac.verify_slice(tag)
        .map_err(|_| CredentialError::InvalidSignature)?;

    let iv = &signed[9..HEADER_LEN];
    let ciphertext = &signed[HEADER_LEN..];
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CredentialError::MalformedCiphertext);
    }

    Aes128CbcDec::new_from_slices(&key.encryption, iv)
        .map_err(|_| CredentialError::MalformedCiphertext)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CredentialError::MalformedCiphertext)
}

/// Tokens are produced padded, but tolerate stores that stripped the padding.
fn decode_url_safe(encoded: &str) -> Option<Vec<u8>> {
    URL_SAFE
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')))
        .ok()
}

/// Replace every occurrence of the plaintext secret in a driver message.
pub fn redact(message: &str, secret: &SecretString) -> String {
    let plaintext: &str = secret.expose_secret();
    if plaintext.is_empty() {
        return message.to_string();
    }
    message.replace(plaintext, "****")
}
