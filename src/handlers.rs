use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use spin_sdk::http::{Request, Response};

use crate::auth::{self, bearer_token, IdentityEvents};
use crate::blobs::{decode_data_url, BlobHost};
use crate::core::errors::ApiError;
use crate::core::helpers::now_millis;
use crate::core::query_params::{get_page, parse_query_params};
use crate::core::store::DocumentStore;
use crate::feed::{self, ImageUpload, PostDraft};
use crate::ledger::{self, SendOutcome};
use crate::models::models::{Post, Privacy, Relationship};
use crate::users::{self, Profile, ProfileUpdate};

type HandlerResult = Result<Response, ApiError>;

/// What every handler works against.
pub struct Services<'a, S: ?Sized, B: ?Sized> {
    pub store: &'a S,
    pub blobs: &'a B,
    pub identity: &'a IdentityEvents,
}

impl<'a, S, B> Services<'a, S, B>
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    fn token<'r>(&self, req: &'r Request) -> Option<&'r str> {
        bearer_token(req.header("Authorization").and_then(|h| h.as_str()))
    }

    /// The signed-in uid, or `None` for anonymous requests. A stale token counts as
    /// anonymous.
    fn viewer(&self, req: &Request) -> Result<Option<String>, ApiError> {
        match self.token(req) {
            Some(token) => Ok(auth::validate_token(self.store, token)?),
            None => Ok(None),
        }
    }

    fn require_user(&self, req: &Request) -> Result<String, ApiError> {
        self.viewer(req)?.ok_or(ApiError::Unauthorized)
    }
}

fn json<T: Serialize>(status: u16, value: &T) -> HandlerResult {
    let body = serde_json::to_vec(value).map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .build())
}

fn parse_body<T: DeserializeOwned>(req: &Request) -> Result<T, ApiError> {
    serde_json::from_slice(req.body()).map_err(|e| ApiError::BadRequest(format!("Invalid body: {}", e)))
}

#[derive(Deserialize)]
struct SignUpBody {
    username: String,
    password: String,
    email: Option<String>,
}

pub fn sign_up<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let body: SignUpBody = parse_body(req)?;
    let user = auth::sign_up(svc.store, &body.username, body.email.as_deref(), &body.password)?;
    json(201, &Profile::from(&user))
}

#[derive(Deserialize)]
struct SignInBody {
    username: String,
    password: String,
}

pub fn sign_in<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let body: SignInBody = parse_body(req)?;
    let signed = auth::sign_in(svc.store, svc.identity, &body.username, &body.password)?;
    json(200, &signed)
}

pub fn sign_out<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let token = svc.token(req).ok_or(ApiError::Unauthorized)?;
    auth::sign_out(svc.store, svc.identity, token)?;
    json(200, &serde_json::json!({ "message": "Logged out successfully" }))
}

pub fn get_profile<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    let me = users::load_user(svc.store, &uid)?;
    json(200, &Profile::from(&me))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileBody {
    bio: Option<String>,
    avatar_url: Option<String>,
}

pub fn update_profile<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    let body: ProfileBody = parse_body(req)?;
    let user = users::update_profile(
        svc.store,
        &uid,
        ProfileUpdate { bio: body.bio, avatar_url: body.avatar_url },
    )?;
    json(200, &Profile::from(&user))
}

#[derive(Serialize)]
struct UserPage {
    profile: Profile,
    relationship: Option<Relationship>,
    posts: Vec<Post>,
}

fn user_page<S, B>(svc: &Services<S, B>, req: &Request, uid: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let viewer = svc.viewer(req)?;
    let user = users::load_user(svc.store, uid)?;
    let relationship = match viewer.as_deref() {
        Some(me) => Some(ledger::relationship(svc.store, me, uid)?),
        None => None,
    };
    let posts = feed::user_posts(svc.store, viewer.as_deref(), uid)?;
    json(200, &UserPage { profile: Profile::from(&user), relationship, posts })
}

pub fn get_user<S, B>(svc: &Services<S, B>, req: &Request, uid: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    user_page(svc, req, uid)
}

pub fn get_user_by_name<S, B>(svc: &Services<S, B>, req: &Request, username: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let username = urlencoding::decode(username)
        .map_err(|_| ApiError::BadRequest("Invalid username".to_string()))?;
    let user = users::find_by_username(svc.store, &username)?
        .ok_or_else(|| ApiError::NotFound(format!("user {}", username)))?;
    user_page(svc, req, &user.uid)
}

pub fn suggestions<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    json(200, &users::suggestions(svc.store, &uid)?)
}

#[derive(Deserialize)]
struct FriendRequestBody {
    target_uid: String,
}

pub fn send_friend_request<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    let body: FriendRequestBody = parse_body(req)?;
    let status = match ledger::send_request(svc.store, &uid, &body.target_uid)? {
        SendOutcome::Requested => "requested",
        SendOutcome::AutoAccepted => "friends",
    };
    json(200, &serde_json::json!({ "status": status }))
}

pub fn accept_friend_request<S, B>(svc: &Services<S, B>, req: &Request, requester: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    ledger::accept_request(svc.store, &uid, requester)?;
    json(200, &serde_json::json!({ "status": "friends" }))
}

pub fn reject_friend_request<S, B>(svc: &Services<S, B>, req: &Request, requester: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    ledger::reject_request(svc.store, &uid, requester)?;
    json(200, &serde_json::json!({ "status": "rejected" }))
}

pub fn cancel_friend_request<S, B>(svc: &Services<S, B>, req: &Request, target: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    ledger::cancel_request(svc.store, &uid, target)?;
    json(200, &serde_json::json!({ "status": "cancelled" }))
}

pub fn remove_friend<S, B>(svc: &Services<S, B>, req: &Request, other: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    ledger::remove_friend(svc.store, &uid, other)?;
    json(200, &serde_json::json!({ "status": "removed" }))
}

pub fn list_friends<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    json(200, &users::friends_of(svc.store, &uid)?)
}

pub fn list_friend_requests<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    json(200, &users::pending_requests(svc.store, &uid)?)
}

#[derive(Deserialize)]
struct PostBody {
    #[serde(default)]
    content: String,
    #[serde(default)]
    privacy: Privacy,
    /// `data:image/...;base64,...`
    image: Option<String>,
}

pub fn create_post<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    let body: PostBody = parse_body(req)?;

    let image = match body.image.as_deref().filter(|s| !s.is_empty()) {
        Some(data_url) => {
            let blob = decode_data_url(data_url)?;
            Some(ImageUpload {
                bytes: blob.bytes,
                content_type: blob.content_type,
            })
        }
        None => None,
    };

    let post = feed::create_post(
        svc.store,
        svc.blobs,
        &uid,
        PostDraft { content: body.content, image, privacy: body.privacy },
        now_millis(),
    )?;
    json(201, &post)
}

pub fn get_feed<S, B>(svc: &Services<S, B>, req: &Request) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let viewer = svc.viewer(req)?;
    let page = get_page(&parse_query_params(req.uri()));
    json(200, &feed::feed_page(svc.store, viewer.as_deref(), page)?)
}

pub fn get_post<S, B>(svc: &Services<S, B>, req: &Request, post_id: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let viewer = svc.viewer(req)?;
    json(200, &feed::get_post(svc.store, viewer.as_deref(), post_id)?)
}

pub fn delete_post<S, B>(svc: &Services<S, B>, req: &Request, post_id: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    feed::delete_post(svc.store, Some(&uid), post_id)?;
    Ok(Response::builder().status(204).body(Vec::new()).build())
}

#[derive(Deserialize)]
struct PrivacyBody {
    privacy: Privacy,
}

pub fn set_privacy<S, B>(svc: &Services<S, B>, req: &Request, post_id: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    let body: PrivacyBody = parse_body(req)?;
    json(200, &feed::set_privacy(svc.store, Some(&uid), post_id, body.privacy)?)
}

pub fn like_post<S, B>(svc: &Services<S, B>, req: &Request, post_id: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    json(200, &feed::like(svc.store, Some(&uid), post_id)?)
}

pub fn unlike_post<S, B>(svc: &Services<S, B>, req: &Request, post_id: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    json(200, &feed::unlike(svc.store, Some(&uid), post_id)?)
}

pub fn list_comments<S, B>(svc: &Services<S, B>, req: &Request, post_id: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let viewer = svc.viewer(req)?;
    json(200, &feed::list_comments(svc.store, viewer.as_deref(), post_id)?)
}

#[derive(Deserialize)]
struct CommentBody {
    content: String,
}

pub fn add_comment<S, B>(svc: &Services<S, B>, req: &Request, post_id: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let uid = svc.require_user(req)?;
    let body: CommentBody = parse_body(req)?;
    let comment = feed::add_comment(svc.store, Some(&uid), post_id, &body.content, now_millis())?;
    json(201, &comment)
}

pub fn get_blob<S, B>(svc: &Services<S, B>, path: &str) -> HandlerResult
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let blob = svc
        .blobs
        .get(path)?
        .ok_or_else(|| ApiError::NotFound(format!("blob {}", path)))?;
    Ok(Response::builder()
        .status(200)
        .header("Content-Type", blob.content_type)
        .body(blob.bytes)
        .build())
}
