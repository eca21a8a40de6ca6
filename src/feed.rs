//! Posts, the per-viewer feed, likes and comments.
//!
//! Reads are projections: the feed is recomputed from the post set and the viewer's
//! friend list on every call, nothing is cached.

use log::{info, warn};

use crate::blobs::BlobHost;
use crate::config::*;
use crate::core::errors::{SocialError, SocialResult};
use crate::core::helpers::{new_id, render_post_content, sanitize_text};
use crate::core::store::{ChangeEvent, DocumentStore, FieldOp, JsonDocuments, Query, Subscription};
use crate::models::models::{Comment, Post, Privacy, User};
use crate::visibility::{is_visible, FriendshipLookup};

pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub struct PostDraft {
    pub content: String,
    pub image: Option<ImageUpload>,
    pub privacy: Privacy,
}

/// The identity a read or interaction is made as, with its friend list loaded.
pub struct Viewer {
    uid: Option<String>,
    record: Option<User>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Viewer { uid: None, record: None }
    }

    pub fn load<S>(store: &S, uid: Option<&str>) -> SocialResult<Self>
    where
        S: DocumentStore + ?Sized,
    {
        let Some(uid) = uid else {
            return Ok(Self::anonymous());
        };
        Ok(Viewer {
            uid: Some(uid.to_string()),
            record: store.get_json::<User>(USERS, uid)?,
        })
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    pub fn sees(&self, post: &Post) -> bool {
        is_visible(self.uid(), post, self)
    }

    fn require_uid(&self) -> SocialResult<&str> {
        self.uid().ok_or(SocialError::Unauthorized)
    }
}

impl FriendshipLookup for Viewer {
    fn are_friends(&self, viewer: &str, author: &str) -> bool {
        self.record
            .as_ref()
            .map_or(false, |user| user.are_friends(viewer, author))
    }
}

/// Visible posts, newest first, ties broken by id.
pub fn compose_feed<I, L>(viewer: Option<&str>, posts: I, lookup: &L) -> Vec<Post>
where
    I: IntoIterator<Item = Post>,
    L: FriendshipLookup + ?Sized,
{
    let mut feed: Vec<Post> = posts
        .into_iter()
        .filter(|post| is_visible(viewer, post, lookup))
        .collect();
    feed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    feed
}

pub fn feed<S>(store: &S, viewer: Option<&str>) -> SocialResult<Vec<Post>>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    let posts: Vec<Post> = store.query_json(POSTS, &Query::new())?;
    Ok(compose_feed(viewer.uid(), posts, &viewer))
}

/// One page (1-based) of the viewer's feed.
pub fn feed_page<S>(store: &S, viewer: Option<&str>, page: usize) -> SocialResult<Vec<Post>>
where
    S: DocumentStore + ?Sized,
{
    let start = page.max(1).saturating_sub(1).saturating_mul(POSTS_PER_PAGE);
    Ok(feed(store, viewer)?
        .into_iter()
        .skip(start)
        .take(POSTS_PER_PAGE)
        .collect())
}

/// An author's timeline as `viewer` may see it.
pub fn user_posts<S>(store: &S, viewer: Option<&str>, author_uid: &str) -> SocialResult<Vec<Post>>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    let posts: Vec<Post> =
        store.query_json(POSTS, &Query::new().where_eq("authorUid", author_uid))?;
    Ok(compose_feed(viewer.uid(), posts, &viewer))
}

fn visible_post<S>(store: &S, viewer: &Viewer, post_id: &str) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
{
    match store.get_json::<Post>(POSTS, post_id)? {
        Some(post) if viewer.sees(&post) => Ok(post),
        // Hidden and missing posts are indistinguishable.
        _ => Err(SocialError::not_found(format!("post {}", post_id))),
    }
}

pub fn get_post<S>(store: &S, viewer: Option<&str>, post_id: &str) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    visible_post(store, &viewer, post_id)
}

fn next_created_at<S>(store: &S, author_uid: &str, now: i64) -> SocialResult<i64>
where
    S: DocumentStore + ?Sized,
{
    let latest: Vec<Post> = store.query_json(
        POSTS,
        &Query::new()
            .where_eq("authorUid", author_uid)
            .order_by("createdAt", true)
            .limit(1),
    )?;
    Ok(match latest.first() {
        Some(prev) if prev.created_at >= now => prev.created_at + 1,
        _ => now,
    })
}

pub fn create_post<S, B>(
    store: &S,
    blobs: &B,
    author_uid: &str,
    draft: PostDraft,
    now: i64,
) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    if store.get(USERS, author_uid)?.is_none() {
        return Err(SocialError::Unauthorized);
    }
    let content = draft.content.trim();
    if content.is_empty() && draft.image.is_none() {
        return Err(SocialError::validation("Post is empty"));
    }
    if content.chars().count() > MAX_POST_LENGTH {
        return Err(SocialError::validation(format!(
            "Post longer than {} characters",
            MAX_POST_LENGTH
        )));
    }

    let id = new_id();
    let image = match draft.image {
        Some(upload) => Some(blobs.put(
            &format!("{}/{}", POSTS, id),
            &upload.bytes,
            &upload.content_type,
        )?),
        None => None,
    };

    let post = Post {
        id: id.clone(),
        author_uid: author_uid.to_string(),
        content: render_post_content(content),
        image,
        privacy: draft.privacy,
        created_at: next_created_at(store, author_uid, now)?,
        likes: Default::default(),
        comment_count: 0,
    };
    store.set_json(POSTS, &id, &post)?;

    info!("{} posted {} ({:?})", author_uid, id, post.privacy);
    Ok(post)
}

fn owned_post<S>(store: &S, viewer: &Viewer, post_id: &str) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
{
    let uid = viewer.require_uid()?;
    let post = visible_post(store, viewer, post_id)?;
    if post.author_uid != uid {
        return Err(SocialError::PermissionDenied);
    }
    Ok(post)
}

/// Deletes a post and its comments. Only the author may do this.
pub fn delete_post<S>(store: &S, viewer: Option<&str>, post_id: &str) -> SocialResult<()>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    owned_post(store, &viewer, post_id)?;

    // Post first: once it is gone its comments are unreachable even if cleanup stops.
    store.delete(POSTS, post_id)?;
    let comments = comments_collection(post_id);
    for (id, _) in store.query(&comments, &Query::new())? {
        store.delete(&comments, &id)?;
    }

    info!("deleted post {}", post_id);
    Ok(())
}

pub fn set_privacy<S>(
    store: &S,
    viewer: Option<&str>,
    post_id: &str,
    privacy: Privacy,
) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    let mut post = owned_post(store, &viewer, post_id)?;
    store.update(POSTS, post_id, &[FieldOp::set("privacy", serde_json::to_value(privacy)?)])?;
    post.privacy = privacy;
    Ok(post)
}

fn interact<S>(store: &S, viewer: Option<&str>, post_id: &str, op: FieldOp) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    viewer.require_uid()?;
    visible_post(store, &viewer, post_id)?;
    store.update(POSTS, post_id, &[op])?;
    visible_post(store, &viewer, post_id)
}

pub fn like<S>(store: &S, viewer: Option<&str>, post_id: &str) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
{
    let uid = viewer.ok_or(SocialError::Unauthorized)?;
    interact(store, viewer, post_id, FieldOp::union("likes", uid))
}

pub fn unlike<S>(store: &S, viewer: Option<&str>, post_id: &str) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
{
    let uid = viewer.ok_or(SocialError::Unauthorized)?;
    interact(store, viewer, post_id, FieldOp::remove("likes", uid))
}

/// Likes the post if the viewer has not, unlikes it otherwise.
pub fn toggle_like<S>(store: &S, viewer: Option<&str>, post_id: &str) -> SocialResult<Post>
where
    S: DocumentStore + ?Sized,
{
    let current = get_post(store, viewer, post_id)?;
    match viewer {
        Some(uid) if current.likes.contains(uid) => unlike(store, viewer, post_id),
        _ => like(store, viewer, post_id),
    }
}

pub fn add_comment<S>(
    store: &S,
    viewer: Option<&str>,
    post_id: &str,
    content: &str,
    now: i64,
) -> SocialResult<Comment>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    let uid = viewer.require_uid()?;
    visible_post(store, &viewer, post_id)?;

    let content = content.trim();
    if content.is_empty() {
        return Err(SocialError::validation("Comment is empty"));
    }
    if content.chars().count() > MAX_COMMENT_LENGTH {
        return Err(SocialError::validation(format!(
            "Comment longer than {} characters",
            MAX_COMMENT_LENGTH
        )));
    }

    let comment = Comment {
        id: new_id(),
        post_id: post_id.to_string(),
        author_uid: uid.to_string(),
        username: viewer
            .record
            .as_ref()
            .map_or_else(|| "User".to_string(), |u| u.username.clone()),
        content: sanitize_text(content),
        created_at: now,
    };
    store.set_json(&comments_collection(post_id), &comment.id, &comment)?;

    // The comment list is authoritative; the counter is only a display hint.
    if let Err(e) = store.update(POSTS, post_id, &[FieldOp::increment("commentCount", 1)]) {
        warn!("comment {} saved but count on {} not bumped: {}", comment.id, post_id, e);
    }
    Ok(comment)
}

/// Comments on a visible post, oldest first.
pub fn list_comments<S>(store: &S, viewer: Option<&str>, post_id: &str) -> SocialResult<Vec<Comment>>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    visible_post(store, &viewer, post_id)?;
    store.query_json(
        &comments_collection(post_id),
        &Query::new().order_by("createdAt", false),
    )
}

/// Live comment stream for a post the viewer can see.
pub fn watch_comments<S>(store: &S, viewer: Option<&str>, post_id: &str) -> SocialResult<Subscription>
where
    S: DocumentStore + ?Sized,
{
    let viewer = Viewer::load(store, viewer)?;
    visible_post(store, &viewer, post_id)?;
    let comments = comments_collection(post_id);
    Ok(store.watch(&[comments.as_str()]))
}

/// Recomposes a viewer's feed whenever posts or the viewer's own friend list change.
///
/// Each change batch triggers a full recompute rather than an incremental patch.
pub struct FeedWatcher<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    viewer: Option<String>,
    changes: Subscription,
}

impl<'a, S: DocumentStore + ?Sized> FeedWatcher<'a, S> {
    pub fn new(store: &'a S, viewer: Option<&str>) -> Self {
        FeedWatcher {
            store,
            viewer: viewer.map(str::to_string),
            changes: store.watch(&[POSTS, USERS]),
        }
    }

    pub fn current(&self) -> SocialResult<Vec<Post>> {
        feed(self.store, self.viewer.as_deref())
    }

    fn affects_feed(&self, event: &ChangeEvent) -> bool {
        event.collection == POSTS
            || (event.collection == USERS && self.viewer.as_deref() == Some(event.id.as_str()))
    }

    /// Blocks until a relevant change arrives and returns the recomposed feed. `None`
    /// once the store stops publishing.
    pub fn next_feed(&self) -> Option<SocialResult<Vec<Post>>> {
        loop {
            let batch = self.changes.next_batch()?;
            if batch.iter().any(|event| self.affects_feed(event)) {
                return Some(self.current());
            }
        }
    }

    /// Recomposes only if something relevant is already queued.
    pub fn poll(&self) -> Option<SocialResult<Vec<Post>>> {
        let batch = self.changes.pending();
        if batch.iter().any(|event| self.affects_feed(event)) {
            Some(self.current())
        } else {
            None
        }
    }

    /// A watcher for the same viewer that ignores everything queued so far.
    pub fn restart(&self) -> Self {
        FeedWatcher {
            store: self.store,
            viewer: self.viewer.clone(),
            changes: self.changes.restart(),
        }
    }
}

impl<'a, S: DocumentStore + ?Sized> Iterator for FeedWatcher<'a, S> {
    type Item = SocialResult<Vec<Post>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_feed()
    }
}
