use log::{debug, error};
use spin_sdk::http::{Method, Request, Response};

use crate::blobs::BlobHost;
use crate::core::errors::ApiError;
use crate::core::store::DocumentStore;
use crate::handlers::{self as h, Services};

/// Dispatches one request. Never fails: errors become JSON error responses.
pub fn route<S, B>(svc: &Services<S, B>, req: &Request) -> Response
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    let path = req.path().trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    debug!("{:?} {}", req.method(), path);

    let result = match (req.method(), segments.as_slice()) {
        (Method::Post, ["users"]) => h::sign_up(svc, req),
        (Method::Post, ["login"]) => h::sign_in(svc, req),
        (Method::Post, ["logout"]) => h::sign_out(svc, req),
        (Method::Get, ["profile"]) => h::get_profile(svc, req),
        (Method::Put, ["profile"]) => h::update_profile(svc, req),
        (Method::Get, ["users", uid]) => h::get_user(svc, req, uid),
        (Method::Get, ["u", username]) => h::get_user_by_name(svc, req, username),
        (Method::Get, ["suggestions"]) => h::suggestions(svc, req),

        (Method::Get, ["friends"]) => h::list_friends(svc, req),
        // Not a friend uid.
        (Method::Delete, ["friends", "requests"]) => {
            Err(ApiError::NotFound("No route found".to_string()))
        }
        (Method::Delete, ["friends", uid]) => h::remove_friend(svc, req, uid),
        (Method::Get, ["friends", "requests"]) => h::list_friend_requests(svc, req),
        (Method::Post, ["friends", "requests"]) => h::send_friend_request(svc, req),
        (Method::Delete, ["friends", "requests", uid]) => h::cancel_friend_request(svc, req, uid),
        (Method::Post, ["friends", "requests", uid, "accept"]) => {
            h::accept_friend_request(svc, req, uid)
        }
        (Method::Post, ["friends", "requests", uid, "reject"]) => {
            h::reject_friend_request(svc, req, uid)
        }

        (Method::Post, ["posts"]) => h::create_post(svc, req),
        (Method::Get, ["feed"]) => h::get_feed(svc, req),
        (Method::Get, ["posts", id]) => h::get_post(svc, req, id),
        (Method::Delete, ["posts", id]) => h::delete_post(svc, req, id),
        (Method::Put, ["posts", id, "privacy"]) => h::set_privacy(svc, req, id),
        (Method::Post, ["posts", id, "like"]) => h::like_post(svc, req, id),
        (Method::Delete, ["posts", id, "like"]) => h::unlike_post(svc, req, id),
        (Method::Get, ["posts", id, "comments"]) => h::list_comments(svc, req, id),
        (Method::Post, ["posts", id, "comments"]) => h::add_comment(svc, req, id),

        (Method::Get, ["blobs", rest @ ..]) if !rest.is_empty() => {
            h::get_blob(svc, &rest.join("/"))
        }

        _ => Err(ApiError::NotFound("No route found".to_string())),
    };

    result.unwrap_or_else(|err| {
        if let ApiError::Unavailable(_) | ApiError::InternalError(_) = err {
            error!("{:?} {} failed: {}", req.method(), path, err);
        }
        err.into()
    })
}
