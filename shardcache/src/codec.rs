//! At-rest value encryption
//!
//! Values are sealed with AES-256-GCM under a fresh random 16-byte IV and
//! stored as the self-describing text envelope
//! `enc:<ivHex>:<tagHex>:<cipherHex>`. Anything without the `enc:` marker is
//! plaintext, so stores holding a mix of both can be read during a migration.

use crate::error::{CacheError, Result};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use std::fmt;

/// AES-256-GCM with a 16-byte nonce
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Envelope marker prefix
pub const ENVELOPE_PREFIX: &str = "enc";
/// IV length in bytes
pub const IV_LEN: usize = 16;
/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;
/// Key length in bytes
pub const KEY_LEN: usize = 32;

/// A stored value, either plaintext or sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Plain(Vec<u8>),
    Encrypted {
        iv: [u8; IV_LEN],
        tag: [u8; TAG_LEN],
        ciphertext: Vec<u8>,
    },
}

impl Envelope {
    /// Parse a raw stored value
    ///
    /// Values without the `enc:` marker are `Plain`. A marked value must have
    /// exactly four `:`-separated parts with hex IV and tag of the right size.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if !is_sealed(raw) {
            return Ok(Self::Plain(raw.to_vec()));
        }

        let text = std::str::from_utf8(raw)
            .map_err(|_| CacheError::Decryption("envelope is not valid UTF-8".to_string()))?;
        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() != 4 {
            return Err(CacheError::Decryption(format!(
                "expected 4 envelope parts, got {}",
                parts.len()
            )));
        }

        let iv = decode_fixed::<IV_LEN>(parts[1], "iv")?;
        let tag = decode_fixed::<TAG_LEN>(parts[2], "tag")?;
        let ciphertext = hex::decode(parts[3])
            .map_err(|e| CacheError::Decryption(format!("invalid ciphertext hex: {}", e)))?;

        Ok(Self::Encrypted {
            iv,
            tag,
            ciphertext,
        })
    }

    /// Serialize to the stored wire form
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::Plain(data) => data.clone(),
            Self::Encrypted {
                iv,
                tag,
                ciphertext,
            } => format!(
                "{}:{}:{}:{}",
                ENVELOPE_PREFIX,
                hex::encode(iv),
                hex::encode(tag),
                hex::encode(ciphertext)
            )
            .into_bytes(),
        }
    }
}

fn is_sealed(raw: &[u8]) -> bool {
    raw.len() > ENVELOPE_PREFIX.len()
        && raw.starts_with(ENVELOPE_PREFIX.as_bytes())
        && raw[ENVELOPE_PREFIX.len()] == b':'
}

fn decode_fixed<const N: usize>(hex_str: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| CacheError::Decryption(format!("invalid {} hex: {}", what, e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        CacheError::Decryption(format!(
            "{} must be {} bytes, got {}",
            what,
            N,
            bytes.len()
        ))
    })
}

/// Optional authenticated encryption of cached values
///
/// Without a key both directions are passthrough.
#[derive(Clone)]
pub struct EncryptionCodec {
    cipher: Option<Aes256Gcm16>,
}

impl EncryptionCodec {
    /// Create a codec from an optional raw 32-byte key
    pub fn new(key: Option<[u8; KEY_LEN]>) -> Self {
        let cipher = key.map(|key| Aes256Gcm16::new(GenericArray::from_slice(&key)));
        Self { cipher }
    }

    /// Create a codec from an optional 64-hex-character key
    pub fn from_hex(key: Option<&str>) -> Result<Self> {
        match key {
            None => Ok(Self::new(None)),
            Some(hex_key) => Ok(Self::new(Some(parse_key(hex_key)?))),
        }
    }

    /// Whether values are sealed on write
    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seal a value; every call uses a fresh IV
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let Some(cipher) = &self.cipher else {
            return Ok(plaintext.to_vec());
        };

        let nonce = Aes256Gcm16::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(seal_error)?;

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&nonce);
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);

        Ok(Envelope::Encrypted {
            iv,
            tag: tag_bytes,
            ciphertext: buffer,
        }
        .to_wire())
    }

    /// Open a stored value
    ///
    /// Plaintext passes through unchanged. A sealed value whose envelope is
    /// malformed or whose tag does not verify fails with
    /// [`CacheError::Decryption`].
    pub fn decrypt(&self, stored: &[u8]) -> Result<Vec<u8>> {
        let Some(cipher) = &self.cipher else {
            return Ok(stored.to_vec());
        };

        match Envelope::parse(stored)? {
            Envelope::Plain(data) => Ok(data),
            Envelope::Encrypted {
                iv,
                tag,
                mut ciphertext,
            } => {
                cipher
                    .decrypt_in_place_detached(
                        GenericArray::from_slice(&iv),
                        b"",
                        &mut ciphertext,
                        GenericArray::from_slice(&tag),
                    )
                    .map_err(|_| {
                        CacheError::Decryption("authentication tag mismatch".to_string())
                    })?;
                Ok(ciphertext)
            }
        }
    }
}

fn seal_error(_: aes_gcm::Error) -> CacheError {
    CacheError::Encryption("value could not be sealed".to_string())
}

impl fmt::Debug for EncryptionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionCodec")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Parse a 64-hex-character key into raw bytes
pub fn parse_key(hex_key: &str) -> Result<[u8; KEY_LEN]> {
    if hex_key.len() != KEY_LEN * 2 {
        return Err(CacheError::Config(format!(
            "encryption key must be {} hex characters, got {}",
            KEY_LEN * 2,
            hex_key.len()
        )));
    }
    let bytes = hex::decode(hex_key)
        .map_err(|e| CacheError::Config(format!("encryption key is not valid hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| CacheError::Config("encryption key must be 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn codec() -> EncryptionCodec {
        EncryptionCodec::from_hex(Some(KEY)).unwrap()
    }

    #[test]
    fn test_seal_failure_is_a_write_error() {
        let err = seal_error(aes_gcm::Error);
        assert!(matches!(err, CacheError::Encryption(_)));
        assert!(err.to_string().starts_with("Encryption error"));
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        for value in [&b""[..], b"alice", b"token-value", "ünïcødé".as_bytes()] {
            let sealed = codec.encrypt(value).unwrap();
            assert!(sealed.starts_with(b"enc:"));
            assert_eq!(codec.decrypt(&sealed).unwrap(), value);
        }
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let codec = codec();
        let a = codec.encrypt(b"same").unwrap();
        let b = codec.encrypt(b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(codec.decrypt(&a).unwrap(), b"same");
        assert_eq!(codec.decrypt(&b).unwrap(), b"same");
    }

    #[test]
    fn test_wire_layout() {
        let sealed = codec().encrypt(b"hello").unwrap();
        let text = String::from_utf8(sealed).unwrap();
        let parts: Vec<&str> = text.split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "enc");
        assert_eq!(parts[1].len(), 32);
        assert_eq!(parts[2].len(), 32);
        assert_eq!(parts[3].len(), 10);
    }

    #[test]
    fn test_passthrough_without_key() {
        let codec = EncryptionCodec::new(None);
        assert!(!codec.is_enabled());
        assert_eq!(codec.encrypt(b"plain").unwrap(), b"plain");
        assert_eq!(codec.decrypt(b"plain").unwrap(), b"plain");
        assert_eq!(codec.decrypt(b"enc:aa:bb:cc").unwrap(), b"enc:aa:bb:cc");
    }

    #[test]
    fn test_plaintext_read_with_key() {
        assert_eq!(codec().decrypt(b"legacy value").unwrap(), b"legacy value");
        assert_eq!(codec().decrypt(b"encore").unwrap(), b"encore");
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let codec = codec();
        let mut sealed = codec.encrypt(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] = if sealed[last] == b'0' { b'1' } else { b'0' };
        assert!(matches!(
            codec.decrypt(&sealed),
            Err(CacheError::Decryption(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = codec().encrypt(b"secret").unwrap();
        let other = EncryptionCodec::new(Some([7u8; KEY_LEN]));
        assert!(matches!(
            other.decrypt(&sealed),
            Err(CacheError::Decryption(_))
        ));
    }

    #[test]
    fn test_malformed_envelopes_fail() {
        let codec = codec();
        let iv = "00".repeat(16);
        let cases = [
            "enc:".to_string(),
            "enc:abc".to_string(),
            format!("enc:{}:{}", iv, iv),
            format!("enc:{}:{}:00:00", iv, iv),
            format!("enc:{}:{}:zz", iv, iv),
            format!("enc:0011:{}:00", iv),
        ];
        for case in cases {
            assert!(
                matches!(codec.decrypt(case.as_bytes()), Err(CacheError::Decryption(_))),
                "expected decryption error for {}",
                case
            );
        }
    }

    #[test]
    fn test_envelope_parse() {
        assert_eq!(
            Envelope::parse(b"hello").unwrap(),
            Envelope::Plain(b"hello".to_vec())
        );

        let iv = [1u8; IV_LEN];
        let tag = [2u8; TAG_LEN];
        let envelope = Envelope::Encrypted {
            iv,
            tag,
            ciphertext: vec![0xab, 0xcd],
        };
        let wire = envelope.to_wire();
        assert_eq!(Envelope::parse(&wire).unwrap(), envelope);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            EncryptionCodec::from_hex(Some("abcd")),
            Err(CacheError::Config(_))
        ));
        assert!(matches!(
            EncryptionCodec::from_hex(Some(&"zz".repeat(32))),
            Err(CacheError::Config(_))
        ));
        assert!(!EncryptionCodec::from_hex(None).unwrap().is_enabled());
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", codec());
        assert!(debug.contains("enabled: true"));
        assert!(!debug.contains("0001020304"));
    }
}
