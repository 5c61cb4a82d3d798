//! Deployment keys: bearer tokens issued by the hub that let automation
//! clone or push a template's repository without a user password.
//!
//! Layout before hex encoding is `HMAC-SHA1(20) || AES-256-CBC(N x 16)`, the
//! plaintext being `userId|subject` zero-padded to the block size. Issued
//! keys may carry a trailing `|` after the subject; both forms decode alike.

use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::fmt::{Display, Formatter};
use tracing::warn;

type HmacSha1 = Hmac<Sha1>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK_LEN: usize = 16;
const MAC_LEN: usize = 20;
pub const MIN_HEX_LEN: usize = 2 * (3 * BLOCK_LEN + MAC_LEN);
pub const MAX_HEX_LEN: usize = MIN_HEX_LEN + 2 * BLOCK_LEN;

const IV: &[u8; BLOCK_LEN] = b"gah4ixaXuuShe4qu";
const SALT: &[u8] = b"Git";
const PBKDF2_ROUNDS: u32 = 4096;
const SEPARATOR: u8 = b'|';
const SUBJECT_PREFIX: &str = "git:";

pub const UNMATCHABLE_USER_ID: &str = "user-id-that-wont-match-anything";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentKey {
    pub user_id: String,
    pub subject: Option<String>,
}

impl DeploymentKey {
    pub fn new(user_id: &str, subject: Option<&str>) -> Self {
        Self {
            user_id: user_id.to_string(),
            subject: subject.map(str::to_string),
        }
    }

    pub fn unmatchable() -> Self {
        Self::new(UNMATCHABLE_USER_ID, None)
    }

    /// Template the key is restricted to, when the subject reads `git:<templateId>`.
    /// `Some("")` means a subject is present but restricts to nothing.
    pub fn template_id(&self) -> Option<&str> {
        self.subject
            .as_deref()
            .map(|s| s.strip_prefix(SUBJECT_PREFIX).unwrap_or(""))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenError {
    NotInitialized,
    BadLength(usize),
    BadHex(String),
    /// Carries the identity decrypted regardless, for diagnostics only.
    BadMac(Option<String>),
    DecryptionError(String),
    BadPlaintext(String),
}

impl TokenError {
    /// The identity to use after a failed decode.
    pub fn key(&self) -> DeploymentKey {
        DeploymentKey::unmatchable()
    }
}

impl Display for TokenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::NotInitialized => write!(f, "deployment key decoding not initialized"),
            TokenError::BadLength(len) => write!(f, "bad deployment key length {}", len),
            TokenError::BadHex(msg) => write!(f, "bad deployment key encoding: {}", msg),
            TokenError::BadMac(Some(user)) => write!(f, "bad MAC (claims user `{}`)", user),
            TokenError::BadMac(None) => write!(f, "bad MAC"),
            TokenError::DecryptionError(msg) => write!(f, "decryption failed: {}", msg),
            TokenError::BadPlaintext(msg) => write!(f, "bad deployment key content: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

#[derive(Clone)]
struct KeyMaterial {
    secret: Vec<u8>,
    key: [u8; 32],
}

/// Codec for deployment keys, bound to the hub and git API secrets.
#[derive(Clone)]
pub struct DeploymentKeys {
    material: Option<KeyMaterial>,
}

impl DeploymentKeys {
    pub fn from_secrets(hub_secret: Option<&str>, git_secret: Option<&str>) -> Self {
        let material = match (hub_secret, git_secret) {
            (Some(hub), Some(git)) => {
                let secret = format!("{}|{}", hub, git).into_bytes();
                let mut key = [0u8; 32];
                pbkdf2::pbkdf2_hmac::<Sha1>(&secret, SALT, PBKDF2_ROUNDS, &mut key);
                Some(KeyMaterial { secret, key })
            }
            _ => {
                warn!("Either Git or Hub API secret is not set, deployment keys won't work");
                None
            }
        };
        Self { material }
    }

    pub fn disabled() -> Self {
        Self { material: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.material.is_some()
    }

    pub fn decode(&self, token: &str) -> Result<DeploymentKey, TokenError> {
        let hex_len = token.len();
        if !(MIN_HEX_LEN..=MAX_HEX_LEN).contains(&hex_len)
            || (hex_len - 2 * MAC_LEN) % (2 * BLOCK_LEN) != 0
        {
            return Err(TokenError::BadLength(hex_len));
        }
        let raw = hex::decode(token).map_err(|e| TokenError::BadHex(e.to_string()))?;
        let material = self.material.as_ref().ok_or(TokenError::NotInitialized)?;

        let (mac, ciphertext) = raw.split_at(MAC_LEN);
        let mut hmac = <HmacSha1 as Mac>::new_from_slice(&material.secret)
            .map_err(|e| TokenError::DecryptionError(e.to_string()))?;
        hmac.update(ciphertext);
        let mac_ok = hmac.verify_slice(mac).is_ok();

        let mut buf = ciphertext.to_vec();
        let plaintext = Aes256CbcDec::new_from_slices(&material.key, IV)
            .map_err(|e| TokenError::DecryptionError(e.to_string()))?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|e| TokenError::DecryptionError(e.to_string()))?;

        let parsed = parse_plaintext(plaintext);
        if !mac_ok {
            return Err(TokenError::BadMac(parsed.ok().map(|k| k.user_id)));
        }
        parsed
    }

    pub fn encode(&self, key: &DeploymentKey) -> Result<String, TokenError> {
        let material = self.material.as_ref().ok_or(TokenError::NotInitialized)?;
        if key.user_id.is_empty() || key.user_id.as_bytes().contains(&SEPARATOR) {
            return Err(TokenError::BadPlaintext(format!("user id `{}`", key.user_id)));
        }
        let subject = key.subject.as_deref().unwrap_or("");
        if subject.as_bytes().contains(&SEPARATOR) {
            return Err(TokenError::BadPlaintext(format!("subject `{}`", subject)));
        }

        let mut buf = format!("{}|{}|", key.user_id, subject).into_bytes();
        let padded_len = buf.len().div_ceil(BLOCK_LEN).max(3) * BLOCK_LEN;
        if padded_len > 4 * BLOCK_LEN {
            return Err(TokenError::BadLength(2 * (padded_len + MAC_LEN)));
        }
        buf.resize(padded_len, 0);
        let ciphertext = Aes256CbcEnc::new_from_slices(&material.key, IV)
            .map_err(|e| TokenError::DecryptionError(e.to_string()))?
            .encrypt_padded_mut::<NoPadding>(&mut buf, padded_len)
            .map_err(|e| TokenError::DecryptionError(e.to_string()))?;

        let mut hmac = <HmacSha1 as Mac>::new_from_slice(&material.secret)
            .map_err(|e| TokenError::DecryptionError(e.to_string()))?;
        hmac.update(ciphertext);
        let mut token = hmac.finalize().into_bytes().to_vec();
        token.extend_from_slice(ciphertext);
        Ok(hex::encode(token))
    }
}

/// Ends a plaintext field: the separator, zero fill or PKCS#7 padding.
fn is_terminator(b: u8) -> bool {
    b == SEPARATOR || b < 0x20
}

fn parse_plaintext(plaintext: &[u8]) -> Result<DeploymentKey, TokenError> {
    let first = match plaintext.iter().position(|b| *b == SEPARATOR) {
        Some(i) if i > 0 => i,
        _ => return Err(TokenError::BadPlaintext("no user id".to_string())),
    };
    let user_id = String::from_utf8(plaintext[..first].to_vec())
        .map_err(|e| TokenError::BadPlaintext(e.to_string()))?;
    let rest = &plaintext[first + 1..];
    let end = rest.iter().position(|b| is_terminator(*b)).unwrap_or(rest.len());
    let subject = match end {
        0 => None,
        _ => Some(
            String::from_utf8(rest[..end].to_vec())
                .map_err(|e| TokenError::BadPlaintext(e.to_string()))?,
        ),
    };
    Ok(DeploymentKey { user_id, subject })
}
