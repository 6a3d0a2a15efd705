//! Authenticated encryption for individual text fields at rest.
//!
//! Sealed values use the envelope `<nonce-hex>:<tag-hex>:<ciphertext-hex>`
//! with AES-256-GCM, a fresh 96-bit nonce per call and a detached 128-bit
//! tag. Values without exactly two `:` separators are treated as legacy
//! plaintext rows and returned unchanged by [`FieldCodec::open`]; anything
//! with two separators must decode as an envelope.

use std::fmt;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;

/// Environment variable holding the 32-byte key as 64 hex characters.
pub const KEY_ENV_VAR: &str = "PARLEY_ENCRYPTION_KEY";

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encryption key is not configured; set {KEY_ENV_VAR}")]
    MissingKey,
    #[error("encryption key must be {expected} bytes, got {found}")]
    InvalidKeyLength { expected: usize, found: usize },
    #[error("encryption key is not valid hex")]
    InvalidKeyEncoding,
    #[error("sealed field failed authentication")]
    Authentication,
    #[error("sealed field has a malformed {segment} segment")]
    MalformedEnvelope { segment: &'static str },
    #[error("field encryption failed")]
    Encryption,
    #[error("decrypted field is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Clone)]
enum KeyState {
    Ready(Box<Aes256Gcm>),
    Unusable(CodecError),
}

/// Seals and opens text fields with one process-wide key.
///
/// A missing or malformed key does not prevent construction; every later
/// [`seal`](Self::seal) or [`open`](Self::open) reports the key problem.
#[derive(Clone)]
pub struct FieldCodec {
    key: KeyState,
}

impl fmt::Debug for FieldCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.key {
            KeyState::Ready(_) => "ready",
            KeyState::Unusable(_) => "unusable",
        };
        f.debug_struct("FieldCodec").field("key", &state).finish()
    }
}

impl FieldCodec {
    /// Build a codec from raw key bytes.
    #[must_use]
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self {
            key: KeyState::Ready(Box::new(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))),
        }
    }

    /// Build a codec from a hex-encoded key. Surrounding whitespace is ignored
    /// and an absent or blank value yields a codec that reports
    /// [`CodecError::MissingKey`].
    #[must_use]
    pub fn from_hex_key(key: Option<&str>) -> Self {
        let key = match key.map(str::trim).filter(|value| !value.is_empty()) {
            Some(key) => key,
            None => return Self::unusable(CodecError::MissingKey),
        };

        let bytes = match hex::decode(key) {
            Ok(bytes) => bytes,
            Err(_) => return Self::unusable(CodecError::InvalidKeyEncoding),
        };
        match <[u8; KEY_LEN]>::try_from(bytes.as_slice()) {
            Ok(key) => Self::from_key(&key),
            Err(_) => Self::unusable(CodecError::InvalidKeyLength {
                expected: KEY_LEN,
                found: bytes.len(),
            }),
        }
    }

    /// Build a codec from [`KEY_ENV_VAR`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_hex_key(std::env::var(KEY_ENV_VAR).ok().as_deref())
    }

    fn unusable(error: CodecError) -> Self {
        Self {
            key: KeyState::Unusable(error),
        }
    }

    /// Returns the key problem, if any, without touching data.
    pub fn check_key(&self) -> Result<(), CodecError> {
        self.cipher().map(|_| ())
    }

    fn cipher(&self) -> Result<&Aes256Gcm, CodecError> {
        match &self.key {
            KeyState::Ready(cipher) => Ok(cipher),
            KeyState::Unusable(error) => Err(error.clone()),
        }
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String, CodecError> {
        let cipher = self.cipher()?;

        let mut nonce = [0_u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| CodecError::Encryption)?;

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(buffer)
        ))
    }

    /// Decrypt an envelope, or return legacy plaintext unchanged.
    pub fn open(&self, stored: &str) -> Result<String, CodecError> {
        let cipher = self.cipher()?;

        let Some(envelope) = Envelope::parse(stored)? else {
            return Ok(stored.to_owned());
        };

        let mut buffer = envelope.ciphertext;
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&envelope.nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&envelope.tag),
            )
            .map_err(|_| CodecError::Authentication)?;

        String::from_utf8(buffer).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn seal_optional(&self, plaintext: Option<&str>) -> Result<Option<String>, CodecError> {
        plaintext.map(|value| self.seal(value)).transpose()
    }

    pub fn open_optional(&self, stored: Option<&str>) -> Result<Option<String>, CodecError> {
        stored.map(|value| self.open(value)).transpose()
    }
}

/// Returns true when `stored` is a well-formed sealed envelope.
#[must_use]
pub fn is_envelope(stored: &str) -> bool {
    matches!(Envelope::parse(stored), Ok(Some(_)))
}

struct Envelope {
    nonce: [u8; NONCE_LEN],
    tag: [u8; TAG_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// `Ok(None)` for legacy plaintext, an error for a damaged envelope.
    fn parse(stored: &str) -> Result<Option<Self>, CodecError> {
        let parts: Vec<&str> = stored.split(':').collect();
        let [nonce, tag, ciphertext] = parts.as_slice() else {
            return Ok(None);
        };

        Ok(Some(Self {
            nonce: decode_fixed(nonce, "nonce")?,
            tag: decode_fixed(tag, "tag")?,
            ciphertext: hex::decode(ciphertext)
                .map_err(|_| CodecError::MalformedEnvelope { segment: "ciphertext" })?,
        }))
    }
}

fn decode_fixed<const N: usize>(segment: &str, name: &'static str) -> Result<[u8; N], CodecError> {
    let malformed = || CodecError::MalformedEnvelope { segment: name };
    let bytes = hex::decode(segment).map_err(|_| malformed())?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn codec() -> FieldCodec {
        FieldCodec::from_hex_key(Some(KEY))
    }

    #[test]
    fn sealed_text_opens_to_original() {
        let codec = codec();
        for plaintext in ["", "hello", "multi\nline: with colons", "caf\u{e9} \u{1f980}"] {
            let sealed = codec.seal(plaintext).expect("seal");
            assert!(is_envelope(&sealed));
            assert_eq!(codec.open(&sealed).expect("open"), plaintext);
        }
    }

    #[test]
    fn sealing_twice_uses_fresh_nonces() {
        let codec = codec();
        let first = codec.seal("same").expect("seal");
        let second = codec.seal("same").expect("seal");
        assert_ne!(first, second);
        assert_ne!(first.split(':').next(), second.split(':').next());
    }

    #[test]
    fn envelope_has_three_hex_segments_of_expected_width() {
        let sealed = codec().seal("abc").expect("seal");
        let parts: Vec<_> = sealed.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), NONCE_LEN * 2);
        assert_eq!(parts[1].len(), TAG_LEN * 2);
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let codec = codec();
        for legacy in [
            "plain legacy row",
            "",
            "a:b",
            "one:two:three:four",
            "ratio 1:2:3:4 in prose",
        ] {
            assert_eq!(codec.open(legacy).expect("legacy"), legacy);
        }
    }

    #[test]
    fn two_separators_must_decode_as_an_envelope() {
        let codec = codec();
        assert_eq!(
            codec.open("zz:yy:xx"),
            Err(CodecError::MalformedEnvelope { segment: "nonce" })
        );
        assert_eq!(
            codec.open("ratio 1:2:3 in prose"),
            Err(CodecError::MalformedEnvelope { segment: "nonce" })
        );
        assert!(!is_envelope("zz:yy:xx"));
    }

    #[test]
    fn truncated_segments_are_rejected_not_passed_through() {
        let codec = codec();
        let sealed = codec.seal("secret").expect("seal");
        let parts: Vec<&str> = sealed.split(':').collect();

        let short_tag = format!("{}:{}:{}", parts[0], &parts[1][1..], parts[2]);
        assert_eq!(
            codec.open(&short_tag),
            Err(CodecError::MalformedEnvelope { segment: "tag" })
        );

        let short_nonce = format!("{}:{}:{}", &parts[0][2..], parts[1], parts[2]);
        assert_eq!(
            codec.open(&short_nonce),
            Err(CodecError::MalformedEnvelope { segment: "nonce" })
        );

        let odd_ciphertext = format!("{}:{}:{}", parts[0], parts[1], &parts[2][1..]);
        assert_eq!(
            codec.open(&odd_ciphertext),
            Err(CodecError::MalformedEnvelope {
                segment: "ciphertext"
            })
        );
    }

    #[test]
    fn tampered_tag_fails_authentication() {
        let codec = codec();
        let sealed = codec.seal("secret").expect("seal");
        let mut parts: Vec<String> = sealed.split(':').map(str::to_owned).collect();
        let first = parts[1].remove(0);
        let replacement = if first == '0' { '1' } else { '0' };
        parts[1].insert(0, replacement);

        assert_eq!(
            codec.open(&parts.join(":")),
            Err(CodecError::Authentication)
        );
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let codec = codec();
        let sealed = codec.seal("secret").expect("seal");
        let mut tampered = sealed.clone();
        let last = tampered.pop().expect("non-empty");
        tampered.push(if last == 'a' { 'b' } else { 'a' });

        assert_eq!(codec.open(&tampered), Err(CodecError::Authentication));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = codec().seal("secret").expect("seal");
        let other = FieldCodec::from_key(&[7_u8; KEY_LEN]);
        assert_eq!(other.open(&sealed), Err(CodecError::Authentication));
    }

    #[test]
    fn missing_key_fails_seal_and_open() {
        for codec in [FieldCodec::from_hex_key(None), FieldCodec::from_hex_key(Some("  "))] {
            assert_eq!(codec.seal("x"), Err(CodecError::MissingKey));
            assert_eq!(codec.open("legacy"), Err(CodecError::MissingKey));
        }
    }

    #[test]
    fn wrong_length_key_is_reported_with_sizes() {
        let codec = FieldCodec::from_hex_key(Some("00112233"));
        assert_eq!(
            codec.seal("x"),
            Err(CodecError::InvalidKeyLength {
                expected: 32,
                found: 4
            })
        );
        assert_eq!(
            FieldCodec::from_hex_key(Some("not-hex")).check_key(),
            Err(CodecError::InvalidKeyEncoding)
        );
    }

    #[test]
    fn optional_helpers_skip_none() {
        let codec = codec();
        assert_eq!(codec.seal_optional(None), Ok(None));
        let sealed = codec.seal_optional(Some("t")).expect("seal").expect("some");
        assert_eq!(codec.open_optional(Some(&sealed)), Ok(Some("t".to_string())));
    }

    #[test]
    fn debug_output_never_contains_key_material() {
        let rendered = format!("{:?}", codec());
        assert!(!rendered.contains("0001020304"));
        assert!(rendered.contains("ready"));
    }
}
