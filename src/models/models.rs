use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Pending friendship requests, from the point of view of the record's owner.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FriendRequests {
    #[serde(default)]
    pub sent: BTreeSet<String>,
    #[serde(default)]
    pub received: BTreeSet<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub created_at: i64,
    #[serde(default)]
    pub friends: BTreeSet<String>,
    #[serde(default)]
    pub friend_requests: FriendRequests,
}

impl User {
    pub fn new(uid: &str, username: &str, created_at: i64) -> Self {
        User {
            uid: uid.to_string(),
            username: username.to_string(),
            email: None,
            avatar_url: None,
            bio: None,
            role: Role::User,
            created_at,
            friends: BTreeSet::new(),
            friend_requests: FriendRequests::default(),
        }
    }

    pub fn is_friend(&self, other: &str) -> bool {
        self.friends.contains(other)
    }

    pub fn has_sent(&self, other: &str) -> bool {
        self.friend_requests.sent.contains(other)
    }

    pub fn has_received(&self, other: &str) -> bool {
        self.friend_requests.received.contains(other)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Friends,
    Private,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_uid: String,
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub privacy: Privacy,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    #[serde(default)]
    pub comment_count: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_uid: String,
    pub username: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub uid: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub uid: String,
    pub username: String,
    pub password_hash: String,
}

/// How `other` relates to the viewing user.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Myself,
    Friends,
    RequestSent,
    RequestReceived,
    None,
}
