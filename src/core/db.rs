use log::info;

use crate::auth;
use crate::blobs::BlobHost;
use crate::core::errors::SocialResult;
use crate::core::helpers::now_millis;
use crate::core::store::DocumentStore;
use crate::feed::{self, PostDraft};
use crate::ledger;
use crate::models::models::Privacy;
use crate::users;

const DEMO_USERS: [(&str, &str); 3] = [
    ("alice", "Swing trading the majors."),
    ("bob", "Gold and indices, mostly."),
    ("carol", "Price action only."),
];

const DEMO_POSTS: [(&str, &str, Privacy); 4] = [
    ("alice", "EURUSD holding above the weekly pivot.", Privacy::Public),
    ("alice", "Sizing down before NFP, details for friends.", Privacy::Friends),
    ("bob", "XAUUSD breakout watch https://www.tradingview.com", Privacy::Public),
    ("carol", "Journal: three losses in a row, stepping back.", Privacy::Private),
];

/// Fills an empty store with a few demo accounts (password `<name>123`), posts and one
/// friendship. Does nothing if the demo accounts already exist.
pub fn seed_demo_data<S, B>(store: &S, blobs: &B) -> SocialResult<()>
where
    S: DocumentStore + ?Sized,
    B: BlobHost + ?Sized,
{
    if users::find_by_username(store, DEMO_USERS[0].0)?.is_some() {
        return Ok(());
    }

    let mut uids = Vec::new();
    for (name, bio) in DEMO_USERS {
        let user = auth::sign_up(store, name, None, &format!("{}123", name))?;
        users::update_profile(
            store,
            &user.uid,
            users::ProfileUpdate { bio: Some(bio.to_string()), avatar_url: None },
        )?;
        uids.push((name, user.uid));
    }
    let uid_of = |name: &str| {
        uids.iter()
            .find(|(n, _)| *n == name)
            .map(|(_, uid)| uid.clone())
            .unwrap_or_default()
    };

    let now = now_millis();
    for (i, (author, content, privacy)) in DEMO_POSTS.into_iter().enumerate() {
        feed::create_post(
            store,
            blobs,
            &uid_of(author),
            PostDraft { content: content.to_string(), image: None, privacy },
            now + i as i64,
        )?;
    }

    ledger::send_request(store, &uid_of("carol"), &uid_of("alice"))?;
    ledger::accept_request(store, &uid_of("alice"), &uid_of("carol"))?;

    info!("seeded {} demo users", DEMO_USERS.len());
    Ok(())
}
