//! Who may see a post.
//!
//! [`is_visible`] is the only place privacy is decided. The feed, single-post reads,
//! likes and comments all go through it, so guessing a post id gets nobody past it.

use crate::models::models::{Post, Privacy, User};

/// Answers whether `viewer` is in `author`'s friend set.
pub trait FriendshipLookup {
    fn are_friends(&self, viewer: &str, author: &str) -> bool;
}

impl<F> FriendshipLookup for F
where
    F: Fn(&str, &str) -> bool,
{
    fn are_friends(&self, viewer: &str, author: &str) -> bool {
        self(viewer, author)
    }
}

/// The viewer's own user record. Friendship is symmetric, so the viewer's friend list
/// answers for the author's.
impl FriendshipLookup for User {
    fn are_friends(&self, viewer: &str, author: &str) -> bool {
        self.uid == viewer && self.is_friend(author)
    }
}

/// Lookup for viewers without a user record.
pub struct NoFriends;

impl FriendshipLookup for NoFriends {
    fn are_friends(&self, _viewer: &str, _author: &str) -> bool {
        false
    }
}

pub fn is_visible<L>(viewer: Option<&str>, post: &Post, lookup: &L) -> bool
where
    L: FriendshipLookup + ?Sized,
{
    if viewer == Some(post.author_uid.as_str()) {
        return true;
    }
    match (post.privacy, viewer) {
        (Privacy::Public, _) => true,
        (Privacy::Friends, Some(viewer)) => lookup.are_friends(viewer, &post.author_uid),
        (Privacy::Friends, None) | (Privacy::Private, _) => false,
    }
}
