//! Presence channel membership.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PusherError;

/// Opaque per-user info attached to a presence member.
pub type UserInfo = serde_json::Map<String, serde_json::Value>;

/// A user present on a presence channel.
///
/// The same shape is used for the local user's identity, which is serialized
/// as the `channel_data` of presence subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(deserialize_with = "deserialize_user_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
}

impl Member {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_info: None,
        }
    }

    pub fn with_info(mut self, info: UserInfo) -> Self {
        self.user_info = Some(info);
        self
    }
}

/// Membership snapshot delivered when a presence subscription succeeds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Members {
    pub count: usize,
    /// Members in the order the server listed them.
    pub members: Vec<Member>,
    /// The local user, if one was configured and is listed.
    pub me: Option<Member>,
}

impl Members {
    pub fn get(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }
}

/// Servers differ on whether user ids are strings or numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum UserId {
    Str(String),
    Num(serde_json::Number),
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        match id {
            UserId::Str(s) => s,
            UserId::Num(n) => n.to_string(),
        }
    }
}

fn deserialize_user_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    UserId::deserialize(deserializer).map(String::from)
}

#[derive(Deserialize)]
struct RawMembers {
    presence: RawPresence,
}

#[derive(Deserialize)]
struct RawPresence {
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    ids: Vec<UserId>,
    #[serde(default)]
    hash: HashMap<String, Option<UserInfo>>,
}

/// Build [`Members`] from a `pusher_internal:subscription_succeeded` payload.
///
/// `my_id` selects the `me` entry; no match leaves it empty.
pub fn parse_members(data: &str, my_id: Option<&str>) -> Result<Members, PusherError> {
    let raw = serde_json::from_str::<RawMembers>(data)
        .map_err(|e| PusherError::DecodeError(format!("presence snapshot: {}", e)))?;
    let RawPresence { count, ids, mut hash } = raw.presence;

    let members: Vec<Member> = ids
        .into_iter()
        .map(String::from)
        .map(|user_id| {
            let user_info = hash.remove(&user_id).flatten();
            Member { user_id, user_info }
        })
        .collect();

    let me = my_id.and_then(|id| members.iter().find(|m| m.user_id == id).cloned());

    Ok(Members {
        count: count.unwrap_or(members.len()),
        members,
        me,
    })
}

/// Parse a single-member payload (`member_added` / `member_removed`).
pub fn parse_member(data: &str) -> Result<Member, PusherError> {
    serde_json::from_str(data).map_err(|e| PusherError::DecodeError(format!("member: {}", e)))
}
