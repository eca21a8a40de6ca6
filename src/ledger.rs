//! Friendship ledger.
//!
//! Every operation touches two user documents with no transaction spanning them. Each
//! half is a set-add/set-remove merge, so re-running an operation after a failed second
//! write finishes the job instead of duplicating it.

use log::{info, warn};

use crate::config::USERS;
use crate::core::errors::{SocialError, SocialResult};
use crate::core::store::{DocumentStore, FieldOp};
use crate::models::models::{Relationship, User};
use crate::users::load_user;

const FRIENDS: &str = "friends";
const SENT: &str = "friendRequests.sent";
const RECEIVED: &str = "friendRequests.received";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Requested,
    /// The target had already asked us, so the two requests became a friendship.
    AutoAccepted,
}

fn validate_pair(self_uid: &str, other_uid: &str) -> SocialResult<()> {
    if self_uid.trim().is_empty() || other_uid.trim().is_empty() {
        return Err(SocialError::validation("user id required"));
    }
    if self_uid == other_uid {
        return Err(SocialError::validation("cannot target yourself"));
    }
    Ok(())
}

fn load_pair<S>(store: &S, self_uid: &str, other_uid: &str) -> SocialResult<(User, User)>
where
    S: DocumentStore + ?Sized,
{
    validate_pair(self_uid, other_uid)?;
    Ok((load_user(store, self_uid)?, load_user(store, other_uid)?))
}

/// Applies `first` to `first_uid`, then `second` to `second_uid`.
fn paired_write<S>(
    store: &S,
    op: &'static str,
    first_uid: &str,
    first: &[FieldOp],
    second_uid: &str,
    second: &[FieldOp],
) -> SocialResult<()>
where
    S: DocumentStore + ?Sized,
{
    store.update(USERS, first_uid, first)?;
    store.update(USERS, second_uid, second).map_err(|e| {
        warn!("{}: {} updated, {} not: {}", op, first_uid, second_uid, e);
        SocialError::PartialWrite {
            op,
            applied: format!("{}/{}", USERS, first_uid),
            pending: format!("{}/{}", USERS, second_uid),
            source: Box::new(e),
        }
    })
}

/// Ops that make `other` a friend of the document's owner and clear anything pending
/// between the two.
fn befriend(other: &str) -> Vec<FieldOp> {
    vec![
        FieldOp::remove(SENT, other),
        FieldOp::remove(RECEIVED, other),
        FieldOp::union(FRIENDS, other),
    ]
}

pub fn send_request<S>(store: &S, from_uid: &str, to_uid: &str) -> SocialResult<SendOutcome>
where
    S: DocumentStore + ?Sized,
{
    let (me, them) = load_pair(store, from_uid, to_uid)?;

    // Checked first so that retrying a half-applied auto-accept finishes it.
    if me.has_received(to_uid) || them.has_sent(from_uid) {
        accept_request(store, from_uid, to_uid)?;
        info!("{} and {} requested each other, now friends", from_uid, to_uid);
        return Ok(SendOutcome::AutoAccepted);
    }
    // Either record listing the other as friend counts, so a half-applied remove
    // never gains a pending request on top of the stale friend entry.
    if me.is_friend(to_uid) || them.is_friend(from_uid) {
        return Err(SocialError::precondition("already friends"));
    }
    // A sent entry without the matching received entry is a retry of a half-done send.
    if me.has_sent(to_uid) && them.has_received(from_uid) {
        return Err(SocialError::precondition("request already pending"));
    }

    paired_write(
        store,
        "send_request",
        from_uid,
        &[FieldOp::union(SENT, to_uid)],
        to_uid,
        &[FieldOp::union(RECEIVED, from_uid)],
    )?;
    info!("{} sent a friend request to {}", from_uid, to_uid);
    Ok(SendOutcome::Requested)
}

pub fn accept_request<S>(store: &S, self_uid: &str, requester_uid: &str) -> SocialResult<()>
where
    S: DocumentStore + ?Sized,
{
    let (me, them) = load_pair(store, self_uid, requester_uid)?;

    // The requester's sent entry is enough: it also covers an accept whose second
    // write never landed.
    let pending = me.has_received(requester_uid) || them.has_sent(self_uid);
    if !pending {
        return Err(SocialError::precondition(if me.is_friend(requester_uid) {
            "already friends"
        } else {
            "no pending request"
        }));
    }

    paired_write(
        store,
        "accept_request",
        self_uid,
        &befriend(requester_uid),
        requester_uid,
        &befriend(self_uid),
    )?;
    info!("{} accepted the friend request from {}", self_uid, requester_uid);
    Ok(())
}

pub fn reject_request<S>(store: &S, self_uid: &str, requester_uid: &str) -> SocialResult<()>
where
    S: DocumentStore + ?Sized,
{
    let (me, them) = load_pair(store, self_uid, requester_uid)?;

    if !me.has_received(requester_uid) && !them.has_sent(self_uid) {
        return Err(SocialError::precondition("no pending request"));
    }

    paired_write(
        store,
        "reject_request",
        self_uid,
        &[FieldOp::remove(RECEIVED, requester_uid)],
        requester_uid,
        &[FieldOp::remove(SENT, self_uid)],
    )?;
    info!("{} rejected the friend request from {}", self_uid, requester_uid);
    Ok(())
}

/// Withdraws a request `self_uid` sent earlier.
pub fn cancel_request<S>(store: &S, self_uid: &str, target_uid: &str) -> SocialResult<()>
where
    S: DocumentStore + ?Sized,
{
    let (me, them) = load_pair(store, self_uid, target_uid)?;

    if !me.has_sent(target_uid) && !them.has_received(self_uid) {
        return Err(SocialError::precondition("no pending request"));
    }

    paired_write(
        store,
        "cancel_request",
        self_uid,
        &[FieldOp::remove(SENT, target_uid)],
        target_uid,
        &[FieldOp::remove(RECEIVED, self_uid)],
    )?;
    info!("{} withdrew the friend request to {}", self_uid, target_uid);
    Ok(())
}

pub fn remove_friend<S>(store: &S, self_uid: &str, other_uid: &str) -> SocialResult<()>
where
    S: DocumentStore + ?Sized,
{
    let (me, them) = load_pair(store, self_uid, other_uid)?;

    if !me.is_friend(other_uid) && !them.is_friend(self_uid) {
        return Err(SocialError::precondition("not friends"));
    }

    paired_write(
        store,
        "remove_friend",
        self_uid,
        &[FieldOp::remove(FRIENDS, other_uid)],
        other_uid,
        &[FieldOp::remove(FRIENDS, self_uid)],
    )?;
    info!("{} removed {} from friends", self_uid, other_uid);
    Ok(())
}

/// How `other` looks from `me`'s record.
pub fn relationship_between(me: &User, other: &str) -> Relationship {
    if me.uid == other {
        Relationship::Myself
    } else if me.is_friend(other) {
        Relationship::Friends
    } else if me.has_sent(other) {
        Relationship::RequestSent
    } else if me.has_received(other) {
        Relationship::RequestReceived
    } else {
        Relationship::None
    }
}

pub fn relationship<S>(store: &S, self_uid: &str, other_uid: &str) -> SocialResult<Relationship>
where
    S: DocumentStore + ?Sized,
{
    let me = load_user(store, self_uid)?;
    Ok(relationship_between(&me, other_uid))
}

/// Target state for a pair whose records may disagree after an abandoned operation.
///
/// A friend entry on either side wins, so a half-applied remove reverts to friends
/// and has to be issued again. Otherwise a request shown on either side is restored on
/// both. Requests in both directions settle as friends, the same as a crossed send.
fn settle(a: &User, b: &User) -> (Vec<FieldOp>, Vec<FieldOp>, Relationship) {
    let (a_uid, b_uid) = (a.uid.as_str(), b.uid.as_str());

    let a_asked = a.has_sent(b_uid) || b.has_received(a_uid);
    let b_asked = b.has_sent(a_uid) || a.has_received(b_uid);
    if a.is_friend(b_uid) || b.is_friend(a_uid) || (a_asked && b_asked) {
        return (befriend(b_uid), befriend(a_uid), Relationship::Friends);
    }

    let mut a_ops = vec![FieldOp::remove(FRIENDS, b_uid)];
    let mut b_ops = vec![FieldOp::remove(FRIENDS, a_uid)];
    let relation = if a_asked {
        a_ops.extend([FieldOp::remove(RECEIVED, b_uid), FieldOp::union(SENT, b_uid)]);
        b_ops.extend([FieldOp::remove(SENT, a_uid), FieldOp::union(RECEIVED, a_uid)]);
        Relationship::RequestSent
    } else if b_asked {
        a_ops.extend([FieldOp::remove(SENT, b_uid), FieldOp::union(RECEIVED, b_uid)]);
        b_ops.extend([FieldOp::remove(RECEIVED, a_uid), FieldOp::union(SENT, a_uid)]);
        Relationship::RequestReceived
    } else {
        a_ops.extend([FieldOp::remove(SENT, b_uid), FieldOp::remove(RECEIVED, b_uid)]);
        b_ops.extend([FieldOp::remove(SENT, a_uid), FieldOp::remove(RECEIVED, a_uid)]);
        Relationship::None
    };
    (a_ops, b_ops, relation)
}

/// Repairs the pair `a`/`b` after an operation was abandoned half way. Returns the
/// settled relationship as seen from `a`.
pub fn reconcile<S>(store: &S, a_uid: &str, b_uid: &str) -> SocialResult<Relationship>
where
    S: DocumentStore + ?Sized,
{
    let (a, b) = load_pair(store, a_uid, b_uid)?;
    let (a_ops, b_ops, relation) = settle(&a, &b);

    paired_write(store, "reconcile", a_uid, &a_ops, b_uid, &b_ops)?;
    info!("reconciled {} and {}: {:?}", a_uid, b_uid, relation);
    Ok(relation)
}
