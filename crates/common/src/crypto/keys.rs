use std::fmt;
use std::ops::Deref;

use iroh::{PublicKey as PPublicKey, SecretKey as SSecretKey};
use serde::{Deserialize, Serialize};

/// Size of Ed25519 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

const PEM_TAG: &str = "PRIVATE KEY";

/// Errors that can occur while parsing or loading keys
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid key size, expected {expected}, got {actual}")]
    Size { expected: usize, actual: usize },
    #[error("invalid public key: {0}")]
    InvalidPoint(String),
    #[error("invalid PEM: {0}")]
    Pem(String),
}

/// Public key naming a drive or a peer
///
/// A thin wrapper around Iroh's `PublicKey`. For drives this is the
/// [`DriveIdentity`]; for peers it is the node id they dial each other by.
///
/// # Examples
///
/// ```ignore
/// let secret_key = SecretKey::generate();
/// let public_key = secret_key.public();
///
/// let hex = public_key.to_hex();
/// let recovered = PublicKey::from_hex(&hex)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Copy)]
pub struct PublicKey(PPublicKey);

/// The fixed-length identifier of one drive
pub type DriveIdentity = PublicKey;

impl Deref for PublicKey {
    type Target = PPublicKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<PPublicKey> for PublicKey {
    fn from(key: PPublicKey) -> Self {
        PublicKey(key)
    }
}

impl From<PublicKey> for PPublicKey {
    fn from(key: PublicKey) -> Self {
        key.0
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(KeyError::Size {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        let key =
            PPublicKey::from_bytes(&buff).map_err(|e| KeyError::InvalidPoint(e.to_string()))?;
        Ok(PublicKey(key))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl PublicKey {
    /// Parse a public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex)?;
        Self::try_from(bytes.as_slice())
    }

    /// Convert public key to raw bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.0.as_bytes()
    }

    /// Convert public key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify an Ed25519 signature on a message.
    pub fn verify(
        &self,
        msg: &[u8],
        signature: &ed25519_dalek::Signature,
    ) -> Result<(), ed25519_dalek::SignatureError> {
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&self.to_bytes())?;
        verifying_key.verify_strict(msg, signature)
    }
}

/// A drive key as handed to us by a caller, before normalization
///
/// Command lines hand us hex, embedding programs hand us raw bytes.
/// Either way the value is normalized exactly once, via
/// `DriveIdentity::try_from`, into a canonical 32 byte key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    Hex(String),
    Bytes(Vec<u8>),
}

impl From<&str> for KeyInput {
    fn from(hex: &str) -> Self {
        KeyInput::Hex(hex.to_string())
    }
}

impl From<String> for KeyInput {
    fn from(hex: String) -> Self {
        KeyInput::Hex(hex)
    }
}

impl From<Vec<u8>> for KeyInput {
    fn from(bytes: Vec<u8>) -> Self {
        KeyInput::Bytes(bytes)
    }
}

impl From<PublicKey> for KeyInput {
    fn from(key: PublicKey) -> Self {
        KeyInput::Bytes(key.to_bytes().to_vec())
    }
}

impl TryFrom<KeyInput> for PublicKey {
    type Error = KeyError;
    fn try_from(input: KeyInput) -> Result<Self, Self::Error> {
        match input {
            KeyInput::Hex(hex) => PublicKey::from_hex(&hex),
            KeyInput::Bytes(bytes) => PublicKey::try_from(bytes.as_slice()),
        }
    }
}

/// Secret key that makes a drive writable
///
/// A thin wrapper around Iroh's `SecretKey`. The corestore keeps its
/// primary secret on disk in PEM form next to the drive logs.
///
/// # Examples
///
/// ```ignore
/// let secret_key = SecretKey::generate();
/// let pem = secret_key.to_pem();
/// let recovered = SecretKey::from_pem(&pem)?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretKey(pub SSecretKey);

impl From<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    fn from(secret: [u8; PRIVATE_KEY_SIZE]) -> Self {
        Self(SSecretKey::from_bytes(&secret))
    }
}

impl Deref for SecretKey {
    type Target = SSecretKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SecretKey {
    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex)?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(KeyError::Size {
                expected: PRIVATE_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buff = [0u8; PRIVATE_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(Self::from(buff))
    }

    /// Generate a new random secret key using a cryptographically secure RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
        Self::from(bytes)
    }

    /// Derive the public key from this secret key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public())
    }

    /// Convert secret key to raw bytes
    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Convert secret key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Encode secret key in PEM format for storage
    pub fn to_pem(&self) -> String {
        let pem = pem::Pem::new(PEM_TAG, self.to_bytes());
        pem::encode(&pem)
    }

    /// Parse a secret key from PEM format
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM string is malformed, the tag is not
    /// "PRIVATE KEY", or the key size is incorrect.
    pub fn from_pem(pem_str: &str) -> Result<Self, KeyError> {
        let pem = pem::parse(pem_str).map_err(|e| KeyError::Pem(e.to_string()))?;
        if pem.tag() != PEM_TAG {
            return Err(KeyError::Pem(format!(
                "invalid PEM tag, expected {}, got {}",
                PEM_TAG,
                pem.tag()
            )));
        }
        Self::from_slice(pem.contents())
    }

    /// Sign a message with this secret key using Ed25519.
    pub fn sign(&self, msg: &[u8]) -> ed25519_dalek::Signature {
        // iroh uses a different version of ed25519_dalek, so we need to convert
        // the signature via bytes (both versions have the same 64-byte representation)
        let sig = self.0.sign(msg);
        ed25519_dalek::Signature::from_bytes(&sig.to_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_keypair_hex() {
        let private_key = SecretKey::generate();
        let public_key = private_key.public();

        let private_hex = private_key.to_hex();
        let recovered_private = SecretKey::from_hex(&private_hex).unwrap();
        assert_eq!(private_key.to_bytes(), recovered_private.to_bytes());

        let public_hex = public_key.to_hex();
        let recovered_public = PublicKey::from_hex(&format!("0x{}", public_hex)).unwrap();
        assert_eq!(public_key, recovered_public);
        assert_eq!(public_key.to_string(), public_hex);
    }

    #[test]
    fn test_pem_serialization() {
        let private_key = SecretKey::generate();

        let pem = private_key.to_pem();
        let recovered_private = SecretKey::from_pem(&pem).unwrap();
        assert_eq!(private_key.public(), recovered_private.public());

        let wrong_tag = pem::encode(&pem::Pem::new("PUBLIC KEY", private_key.to_bytes()));
        assert!(matches!(
            SecretKey::from_pem(&wrong_tag),
            Err(KeyError::Pem(_))
        ));
    }

    #[test]
    fn test_key_input_normalizes_both_shapes() {
        let public_key = SecretKey::generate().public();

        let from_hex = PublicKey::try_from(KeyInput::from(public_key.to_hex())).unwrap();
        let from_bytes = PublicKey::try_from(KeyInput::from(public_key.to_bytes().to_vec())).unwrap();
        assert_eq!(from_hex, public_key);
        assert_eq!(from_bytes, public_key);
    }

    #[test]
    fn test_key_input_rejects_malformed() {
        assert!(matches!(
            PublicKey::try_from(KeyInput::from("not hex at all")),
            Err(KeyError::Hex(_))
        ));
        assert!(matches!(
            PublicKey::try_from(KeyInput::from("abcd")),
            Err(KeyError::Size {
                expected: PUBLIC_KEY_SIZE,
                actual: 2
            })
        ));
        assert!(matches!(
            PublicKey::try_from(KeyInput::Bytes(vec![1; 31])),
            Err(KeyError::Size { .. })
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let secret_key = SecretKey::generate();
        let public_key = secret_key.public();
        let message = b"hello, drive!";

        let signature = secret_key.sign(message);
        assert!(public_key.verify(message, &signature).is_ok());
        assert!(public_key.verify(b"hello, drive?", &signature).is_err());

        let other_key = SecretKey::generate().public();
        assert!(other_key.verify(message, &signature).is_err());
    }
}
