use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::config::*;
use crate::core::errors::{SocialError, SocialResult};
use crate::core::helpers::{hash_password, new_id, now_iso, verify_password};
use crate::core::store::{DocumentStore, JsonDocuments};
use crate::models::models::{Credential, Session, User};
use crate::users;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    SignedIn { uid: String },
    SignedOut { uid: String },
}

/// Fan-out of sign-in state changes to whoever is listening.
#[derive(Clone, Default)]
pub struct IdentityEvents {
    subscribers: Arc<Mutex<Vec<Sender<IdentityEvent>>>>,
}

impl IdentityEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<IdentityEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    fn emit(&self, event: IdentityEvent) {
        debug!("identity event {:?}", event);
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct SignedIn {
    pub token: String,
    pub uid: String,
}

/// Creates the credential and the user record for a new account.
pub fn sign_up<S>(
    store: &S,
    username: &str,
    email: Option<&str>,
    password: &str,
) -> SocialResult<User>
where
    S: DocumentStore + ?Sized,
{
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(SocialError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let uid = new_id();
    let created_at = Utc::now().timestamp_millis();
    let user = users::register(store, &uid, username, email, created_at)?;

    let credential = Credential {
        uid: uid.clone(),
        username: user.username.clone(),
        password_hash: hash_password(password)?,
    };
    if let Err(e) = store.set_json(CREDENTIALS, &uid, &credential) {
        // Without a credential the account can never sign in; free the username again.
        warn!("credential write for {} failed, removing user record: {}", uid, e);
        store.delete(USERS, &uid)?;
        return Err(e);
    }

    info!("signed up {} ({})", user.username, uid);
    Ok(user)
}

pub fn sign_in<S>(
    store: &S,
    events: &IdentityEvents,
    username: &str,
    password: &str,
) -> SocialResult<SignedIn>
where
    S: DocumentStore + ?Sized,
{
    let hit = store
        .find_by_field(CREDENTIALS, "username", Value::from(username.trim()))?
        .into_iter()
        .next();
    let credential: Credential = match hit {
        Some((_, doc)) => serde_json::from_value(doc)?,
        None => return Err(SocialError::Unauthorized),
    };
    if !verify_password(password, &credential.password_hash) {
        return Err(SocialError::Unauthorized);
    }

    let token = new_id();
    let session = Session {
        uid: credential.uid.clone(),
        created_at: now_iso(),
    };
    store.set_json(SESSIONS, &token, &session)?;

    events.emit(IdentityEvent::SignedIn { uid: credential.uid.clone() });
    Ok(SignedIn { token, uid: credential.uid })
}

/// Ends a session. Unknown tokens are ignored.
pub fn sign_out<S>(store: &S, events: &IdentityEvents, token: &str) -> SocialResult<()>
where
    S: DocumentStore + ?Sized,
{
    if let Some(session) = store.get_json::<Session>(SESSIONS, token)? {
        store.delete(SESSIONS, token)?;
        events.emit(IdentityEvent::SignedOut { uid: session.uid });
    }
    Ok(())
}

/// The uid behind a live session, if the token is known, not expired and its user
/// still exists.
pub fn validate_token<S>(store: &S, token: &str) -> SocialResult<Option<String>>
where
    S: DocumentStore + ?Sized,
{
    validate_token_at(store, token, Utc::now())
}

pub fn validate_token_at<S>(store: &S, token: &str, now: DateTime<Utc>) -> SocialResult<Option<String>>
where
    S: DocumentStore + ?Sized,
{
    if token.is_empty() {
        return Ok(None);
    }
    let Some(session) = store.get_json::<Session>(SESSIONS, token)? else {
        return Ok(None);
    };

    let created = match DateTime::parse_from_rfc3339(&session.created_at) {
        Ok(created) => created.with_timezone(&Utc),
        Err(_) => return Ok(None),
    };
    if (now - created).num_hours() >= token_expiration_hours() {
        return Ok(None);
    }

    if store.get(USERS, &session.uid)?.is_none() {
        return Ok(None);
    }
    Ok(Some(session.uid))
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;
    use chrono::Duration;

    #[test]
    fn sign_up_then_sign_in() {
        let store = MemoryStore::new();
        let events = IdentityEvents::new();
        let rx = events.subscribe();

        let user = sign_up(&store, "alice", Some("a@fx.io"), "secret1").unwrap();
        let signed = sign_in(&store, &events, "alice", "secret1").unwrap();
        assert_eq!(signed.uid, user.uid);
        assert_eq!(validate_token(&store, &signed.token).unwrap(), Some(user.uid.clone()));
        assert_eq!(rx.try_recv().unwrap(), IdentityEvent::SignedIn { uid: user.uid.clone() });

        sign_out(&store, &events, &signed.token).unwrap();
        assert_eq!(validate_token(&store, &signed.token).unwrap(), None);
        assert_eq!(rx.try_recv().unwrap(), IdentityEvent::SignedOut { uid: user.uid });
    }

    #[test]
    fn wrong_password_and_unknown_user_are_unauthorized() {
        let store = MemoryStore::new();
        let events = IdentityEvents::new();
        sign_up(&store, "alice", None, "secret1").unwrap();

        assert!(matches!(sign_in(&store, &events, "alice", "nope"), Err(SocialError::Unauthorized)));
        assert!(matches!(sign_in(&store, &events, "mallory", "secret1"), Err(SocialError::Unauthorized)));
    }

    #[test]
    fn sign_up_validates() {
        let store = MemoryStore::new();
        assert!(matches!(sign_up(&store, "alice", None, "123"), Err(SocialError::Validation(_))));
        sign_up(&store, "alice", None, "secret1").unwrap();
        assert!(matches!(sign_up(&store, "alice", None, "secret2"), Err(SocialError::Conflict(_))));
    }

    #[test]
    fn failed_credential_write_releases_username() {
        let store = MemoryStore::new();
        store.fail_next_write(CREDENTIALS, "*");
        assert!(sign_up(&store, "alice", None, "secret1").unwrap_err().is_retryable());
        assert!(users::find_by_username(&store, "alice").unwrap().is_none());

        sign_up(&store, "alice", None, "secret1").unwrap();
    }

    #[test]
    fn tokens_expire() {
        let store = MemoryStore::new();
        let events = IdentityEvents::new();
        sign_up(&store, "alice", None, "secret1").unwrap();
        let signed = sign_in(&store, &events, "alice", "secret1").unwrap();

        let later = Utc::now() + Duration::hours(token_expiration_hours() + 1);
        assert_eq!(validate_token_at(&store, &signed.token, later).unwrap(), None);
        assert!(validate_token_at(&store, &signed.token, Utc::now()).unwrap().is_some());
    }

    #[test]
    fn sessions_of_deleted_users_are_rejected() {
        let store = MemoryStore::new();
        let events = IdentityEvents::new();
        let user = sign_up(&store, "alice", None, "secret1").unwrap();
        let signed = sign_in(&store, &events, "alice", "secret1").unwrap();

        store.delete(USERS, &user.uid).unwrap();
        assert_eq!(validate_token(&store, &signed.token).unwrap(), None);
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }
}
