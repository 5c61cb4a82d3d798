use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TeamAccess {
    pub team_id: String,
    pub team_name: String,
    pub can_write: bool,
}

/// Ownership record of a stack template. The owner always has write access.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Template {
    pub owner_user_id: String,
    pub teams: Vec<TeamAccess>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub show_source: bool,
}
