use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A client public key in the two forms the directory is queried with.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SshKey {
    /// Standard base64 of the SSH wire encoding.
    pub base64: String,
    /// `SHA256:` followed by unpadded base64 of the digest, as `ssh-keygen -l` prints it.
    pub fingerprint: String,
}

impl SshKey {
    pub fn from_wire(blob: &[u8]) -> Self {
        let digest = Sha256::digest(blob);
        Self {
            base64: STANDARD.encode(blob),
            fingerprint: format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)),
        }
    }
}
