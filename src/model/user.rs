use serde::{Deserialize, Serialize};

/// Identity returned by the auth service after a username/password sign-in.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct LoginUser {
    pub uid: String,
    pub organization: String,
    pub groups: Vec<String>,
}
