use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::config::*;
use crate::core::errors::{SocialError, SocialResult};
use crate::core::helpers::{default_avatar_url, sanitize_text};
use crate::core::store::{DocumentStore, FieldOp, JsonDocuments, Query};
use crate::models::models::{Role, User};

/// What other users get to see of a user record.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
    pub created_at: i64,
    pub friend_count: usize,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Profile {
            uid: user.uid.clone(),
            username: user.username.clone(),
            avatar_url: user.avatar_url.clone(),
            bio: user.bio.clone(),
            role: user.role,
            created_at: user.created_at,
            friend_count: user.friends.len(),
        }
    }
}

#[derive(Serialize, Debug, Default)]
pub struct PendingRequests {
    pub sent: Vec<Profile>,
    pub received: Vec<Profile>,
}

#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

pub fn load_user<S>(store: &S, uid: &str) -> SocialResult<User>
where
    S: DocumentStore + ?Sized,
{
    store
        .get_json::<User>(USERS, uid)?
        .ok_or_else(|| SocialError::not_found(format!("user {}", uid)))
}

pub fn find_by_username<S>(store: &S, username: &str) -> SocialResult<Option<User>>
where
    S: DocumentStore + ?Sized,
{
    let hits = store.find_by_field(USERS, "username", Value::from(username.trim()))?;
    match hits.into_iter().next() {
        Some((_, doc)) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

fn validate_username(username: &str) -> SocialResult<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(SocialError::validation("Username is required"));
    }
    let len = username.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        return Err(SocialError::validation(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    let clean = sanitize_text(username);
    if clean != username {
        return Err(SocialError::validation("Username contains markup"));
    }
    Ok(clean)
}

/// Creates the user record for a freshly issued identity, with empty relation sets.
pub fn register<S>(
    store: &S,
    uid: &str,
    username: &str,
    email: Option<&str>,
    created_at: i64,
) -> SocialResult<User>
where
    S: DocumentStore + ?Sized,
{
    if uid.trim().is_empty() {
        return Err(SocialError::validation("uid required"));
    }
    let username = validate_username(username)?;

    if store.get(USERS, uid)?.is_some() {
        return Err(SocialError::Conflict(format!("user {} already registered", uid)));
    }
    if find_by_username(store, &username)?.is_some() {
        return Err(SocialError::Conflict("Username exists".to_string()));
    }

    let mut user = User::new(uid, &username, created_at);
    user.email = email.map(str::to_string);
    user.avatar_url = Some(default_avatar_url(&username));
    store.set_json(USERS, uid, &user)?;

    info!("registered {} as {}", uid, username);
    Ok(user)
}

/// Edits profile fields in place. Relation fields are never touched, so a concurrent
/// ledger operation on the same record survives.
pub fn update_profile<S>(store: &S, uid: &str, update: ProfileUpdate) -> SocialResult<User>
where
    S: DocumentStore + ?Sized,
{
    let mut ops = Vec::new();

    if let Some(bio) = update.bio {
        if bio.chars().count() > MAX_BIO_LENGTH {
            return Err(SocialError::validation(format!(
                "Bio too long (max {} chars)",
                MAX_BIO_LENGTH
            )));
        }
        let bio = sanitize_text(bio.trim());
        ops.push(FieldOp::set(
            "bio",
            if bio.is_empty() { Value::Null } else { Value::from(bio) },
        ));
    }
    if let Some(url) = update.avatar_url {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(SocialError::validation("Avatar must be an http(s) URL"));
        }
        ops.push(FieldOp::set("avatarUrl", url));
    }

    if !ops.is_empty() {
        store.update(USERS, uid, &ops)?;
    }
    load_user(store, uid)
}

/// People to suggest as friends.
///
/// Scans one fixed-size batch of users, so a user outside that batch is never suggested.
/// There is no fairness or completeness guarantee.
pub fn suggestions<S>(store: &S, uid: &str) -> SocialResult<Vec<Profile>>
where
    S: DocumentStore + ?Sized,
{
    let me = load_user(store, uid)?;
    let batch: Vec<User> = store.query_json(USERS, &Query::new().limit(SUGGESTION_BATCH))?;

    Ok(batch
        .iter()
        .filter(|u| {
            u.uid != me.uid
                && !me.is_friend(&u.uid)
                && !me.has_sent(&u.uid)
                && !me.has_received(&u.uid)
        })
        .take(SUGGESTION_LIMIT)
        .map(Profile::from)
        .collect())
}

fn profiles<'a, S, I>(store: &S, uids: I) -> SocialResult<Vec<Profile>>
where
    S: DocumentStore + ?Sized,
    I: IntoIterator<Item = &'a String>,
{
    let mut out = Vec::new();
    for uid in uids {
        match store.get_json::<User>(USERS, uid)? {
            Some(user) => out.push(Profile::from(&user)),
            None => warn!("dangling reference to missing user {}", uid),
        }
    }
    Ok(out)
}

pub fn friends_of<S>(store: &S, uid: &str) -> SocialResult<Vec<Profile>>
where
    S: DocumentStore + ?Sized,
{
    let me = load_user(store, uid)?;
    profiles(store, &me.friends)
}

pub fn pending_requests<S>(store: &S, uid: &str) -> SocialResult<PendingRequests>
where
    S: DocumentStore + ?Sized,
{
    let me = load_user(store, uid)?;
    Ok(PendingRequests {
        sent: profiles(store, &me.friend_requests.sent)?,
        received: profiles(store, &me.friend_requests.received)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;
    use crate::ledger;

    fn seeded(names: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for (i, name) in names.iter().enumerate() {
            register(&store, &format!("uid-{}", name), name, None, i as i64).unwrap();
        }
        store
    }

    #[test]
    fn register_starts_with_empty_relations_and_default_avatar() {
        let store = MemoryStore::new();
        let user = register(&store, "u1", "  pipster ", Some("p@fx.io"), 5).unwrap();
        assert_eq!(user.username, "pipster");
        assert!(user.friends.is_empty());
        assert!(user.friend_requests.sent.is_empty() && user.friend_requests.received.is_empty());
        assert_eq!(user.role, Role::User);
        assert!(user.avatar_url.unwrap().contains("name=pipster"));
        assert_eq!(load_user(&store, "u1").unwrap().email.as_deref(), Some("p@fx.io"));
    }

    #[test]
    fn register_rejects_bad_and_duplicate_usernames() {
        let store = seeded(&["alice"]);
        assert!(matches!(register(&store, "u2", "", None, 0), Err(SocialError::Validation(_))));
        assert!(matches!(register(&store, "u2", "ab", None, 0), Err(SocialError::Validation(_))));
        assert!(matches!(register(&store, "u2", "<b>bold</b>", None, 0), Err(SocialError::Validation(_))));
        assert!(matches!(register(&store, "u2", "alice", None, 0), Err(SocialError::Conflict(_))));
        assert!(matches!(register(&store, "uid-alice", "other", None, 0), Err(SocialError::Conflict(_))));
    }

    #[test]
    fn find_by_username_matches_exactly() {
        let store = seeded(&["alice", "bob"]);
        assert_eq!(find_by_username(&store, "bob").unwrap().unwrap().uid, "uid-bob");
        assert!(find_by_username(&store, "carol").unwrap().is_none());
    }

    #[test]
    fn profile_update_keeps_relations() {
        let store = seeded(&["alice", "bob"]);
        ledger::send_request(&store, "uid-alice", "uid-bob").unwrap();

        let updated = update_profile(
            &store,
            "uid-alice",
            ProfileUpdate {
                bio: Some("Scalping <i>majors</i>".to_string()),
                avatar_url: None,
            },
        )
        .unwrap();
        assert_eq!(updated.bio.as_deref(), Some("Scalping majors"));
        assert!(updated.has_sent("uid-bob"));

        let cleared = update_profile(
            &store,
            "uid-alice",
            ProfileUpdate { bio: Some("   ".to_string()), avatar_url: None },
        )
        .unwrap();
        assert_eq!(cleared.bio, None);
    }

    #[test]
    fn profile_update_validates_input() {
        let store = seeded(&["alice"]);
        let long = ProfileUpdate { bio: Some("x".repeat(MAX_BIO_LENGTH + 1)), avatar_url: None };
        assert!(matches!(update_profile(&store, "uid-alice", long), Err(SocialError::Validation(_))));
        let bad_url = ProfileUpdate { bio: None, avatar_url: Some("javascript:alert(1)".to_string()) };
        assert!(matches!(update_profile(&store, "uid-alice", bad_url), Err(SocialError::Validation(_))));
    }

    #[test]
    fn suggestions_skip_self_friends_and_pending() {
        let store = seeded(&["alice", "bob", "carol", "dave", "erin"]);
        ledger::send_request(&store, "uid-alice", "uid-bob").unwrap();
        ledger::send_request(&store, "uid-carol", "uid-alice").unwrap();
        ledger::send_request(&store, "uid-alice", "uid-dave").unwrap();
        ledger::accept_request(&store, "uid-dave", "uid-alice").unwrap();

        let names: Vec<String> = suggestions(&store, "uid-alice")
            .unwrap()
            .into_iter()
            .map(|p| p.username)
            .collect();
        assert_eq!(names, vec!["erin"]);
    }

    #[test]
    fn suggestions_are_capped() {
        let names: Vec<String> = (0..9).map(|i| format!("trader{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let store = seeded(&refs);
        assert_eq!(suggestions(&store, "uid-trader0").unwrap().len(), SUGGESTION_LIMIT);
    }

    #[test]
    fn friend_and_request_listings_resolve_profiles() {
        let store = seeded(&["alice", "bob", "carol"]);
        ledger::send_request(&store, "uid-bob", "uid-alice").unwrap();
        ledger::accept_request(&store, "uid-alice", "uid-bob").unwrap();
        ledger::send_request(&store, "uid-carol", "uid-alice").unwrap();

        let friends = friends_of(&store, "uid-alice").unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].username, "bob");
        assert_eq!(friends[0].friend_count, 1);

        let pending = pending_requests(&store, "uid-alice").unwrap();
        assert!(pending.sent.is_empty());
        assert_eq!(pending.received[0].username, "carol");
    }
}
