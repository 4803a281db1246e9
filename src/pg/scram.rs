//! SCRAM-SHA-256 client for PostgreSQL authentication.
//!
//! RFC 5802 (SCRAM) with the SHA-256 profile from RFC 7677. Channel binding
//! is not offered (`n,,` GS2 header).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const MECHANISM: &str = "SCRAM-SHA-256";

/// Base64 of the `n,,` GS2 header, echoed back in the final message.
const CHANNEL_BINDING: &str = "biws";

/// Keys derived once the server's salt and iteration count are known.
struct Exchange {
    auth_message: String,
    salted_password: [u8; 32],
}

/// SCRAM-SHA-256 client state machine.
pub struct ScramClient {
    username: String,
    password: SecretString,
    client_nonce: String,
    exchange: Option<Exchange>,
}

impl ScramClient {
    /// Start an exchange with a fresh random nonce.
    pub fn new(username: &str, password: &str) -> Self {
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self::with_nonce(username, password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        Self {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            client_nonce,
            exchange: None,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", escape_username(&self.username), self.client_nonce)
    }

    /// `n,,n=<username>,r=<client-nonce>`
    pub fn client_first_message(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    /// Consume `r=<nonce>,s=<salt>,i=<iterations>` and produce the client proof.
    pub fn process_server_first(&mut self, server_msg: &[u8]) -> Result<Vec<u8>, ScramError> {
        let server_first =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            match part.split_once('=') {
                Some(("r", value)) => nonce = Some(value),
                Some(("s", value)) => {
                    salt = Some(BASE64.decode(value).map_err(|_| ScramError::InvalidSalt)?)
                }
                Some(("i", value)) => {
                    iterations = Some(value.parse::<u32>().map_err(|_| ScramError::InvalidIterations)?)
                }
                _ => {}
            }
        }

        let nonce = nonce.ok_or(ScramError::Missing("nonce"))?;
        let salt = salt.ok_or(ScramError::Missing("salt"))?;
        let iterations = iterations.ok_or(ScramError::Missing("iterations"))?;
        if iterations == 0 {
            return Err(ScramError::InvalidIterations);
        }
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(ScramError::NonceMismatch);
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.expose_secret().as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        )
        .map_err(|_| ScramError::InvalidState)?;

        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let without_proof = format!("c={},r={}", CHANNEL_BINDING, nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare(), server_first, without_proof);

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.exchange = Some(Exchange {
            auth_message,
            salted_password,
        });
        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)).into_bytes())
    }

    /// Check the server signature in `v=<verifier>`.
    pub fn verify_server_final(&self, server_msg: &[u8]) -> Result<(), ScramError> {
        let exchange = self.exchange.as_ref().ok_or(ScramError::InvalidState)?;
        let server_final =
            std::str::from_utf8(server_msg).map_err(|_| ScramError::InvalidServerMessage)?;

        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerRejected(error.to_string()));
        }
        let signature = server_final
            .strip_prefix("v=")
            .and_then(|v| BASE64.decode(v).ok())
            .ok_or(ScramError::InvalidServerMessage)?;

        let server_key = hmac_sha256(&exchange.salted_password, b"Server Key");
        let mut mac = keyed(&server_key);
        mac.update(exchange.auth_message.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ScramError::ServerSignatureMismatch)
    }
}

/// SCRAM authentication errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScramError {
    InvalidServerMessage,
    InvalidSalt,
    InvalidIterations,
    Missing(&'static str),
    NonceMismatch,
    ServerRejected(String),
    ServerSignatureMismatch,
    InvalidState,
}

impl std::fmt::Display for ScramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidServerMessage => write!(f, "Invalid SCRAM server message"),
            Self::InvalidSalt => write!(f, "Invalid salt encoding"),
            Self::InvalidIterations => write!(f, "Invalid iteration count"),
            Self::Missing(field) => write!(f, "Missing {} in server message", field),
            Self::NonceMismatch => write!(f, "Server nonce does not extend client nonce"),
            Self::ServerRejected(reason) => write!(f, "Server rejected SCRAM exchange: {}", reason),
            Self::ServerSignatureMismatch => write!(f, "Server signature verification failed"),
            Self::InvalidState => write!(f, "SCRAM final message before server-first"),
        }
    }
}

impl std::error::Error for ScramError {}

fn keyed(key: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length
    match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = keyed(key);
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// `=` and `,` are reserved in SCRAM attribute values.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}
