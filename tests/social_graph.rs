use std::collections::BTreeSet;

use volcano::blobs::MemoryBlobHost;
use volcano::core::errors::SocialError;
use volcano::core::store::{DocumentStore, MemoryStore};
use volcano::feed::{self, FeedWatcher, PostDraft};
use volcano::ledger::{self, SendOutcome};
use volcano::models::models::{Post, Privacy, Relationship, User};
use volcano::users;
use volcano::visibility::is_visible;

fn community(names: &[&str]) -> MemoryStore {
    let store = MemoryStore::new();
    for (i, name) in names.iter().enumerate() {
        users::register(&store, name, name, None, i as i64).unwrap();
    }
    store
}

fn user(store: &MemoryStore, uid: &str) -> User {
    users::load_user(store, uid).unwrap()
}

fn post(id: &str, author: &str, privacy: Privacy, created_at: i64) -> Post {
    Post {
        id: id.to_string(),
        author_uid: author.to_string(),
        content: format!("{} by {}", id, author),
        image: None,
        privacy,
        created_at,
        likes: BTreeSet::new(),
        comment_count: 0,
    }
}

fn draft(content: &str, privacy: Privacy) -> PostDraft {
    PostDraft { content: content.to_string(), image: None, privacy }
}

#[test]
fn accepted_request_is_symmetric_and_clears_pending() {
    let store = community(&["alice", "bob"]);
    ledger::send_request(&store, "alice", "bob").unwrap();
    ledger::accept_request(&store, "bob", "alice").unwrap();

    let (a, b) = (user(&store, "alice"), user(&store, "bob"));
    assert!(a.is_friend("bob") && b.is_friend("alice"));
    assert!(!a.has_sent("bob") && !a.has_received("bob"));
    assert!(!b.has_sent("alice") && !b.has_received("alice"));
}

#[test]
fn rejected_request_leaves_no_trace() {
    let store = community(&["alice", "bob"]);
    ledger::send_request(&store, "alice", "bob").unwrap();
    ledger::reject_request(&store, "bob", "alice").unwrap();

    assert_eq!(ledger::relationship(&store, "alice", "bob").unwrap(), Relationship::None);
    assert_eq!(ledger::relationship(&store, "bob", "alice").unwrap(), Relationship::None);
    for uid in ["alice", "bob"] {
        let u = user(&store, uid);
        assert!(u.friends.is_empty());
        assert!(u.friend_requests.sent.is_empty() && u.friend_requests.received.is_empty());
    }
}

#[test]
fn removing_a_friend_twice_matches_removing_once() {
    let store = community(&["alice", "bob"]);
    ledger::send_request(&store, "alice", "bob").unwrap();
    ledger::accept_request(&store, "bob", "alice").unwrap();

    ledger::remove_friend(&store, "alice", "bob").unwrap();
    let once = (user(&store, "alice"), user(&store, "bob"));
    assert!(matches!(
        ledger::remove_friend(&store, "alice", "bob"),
        Err(SocialError::PreconditionFailed(_))
    ));
    assert_eq!((user(&store, "alice"), user(&store, "bob")), once);
}

#[test]
fn crossed_requests_become_a_friendship() {
    let store = community(&["alice", "bob"]);
    assert_eq!(ledger::send_request(&store, "alice", "bob").unwrap(), SendOutcome::Requested);
    assert_eq!(ledger::send_request(&store, "bob", "alice").unwrap(), SendOutcome::AutoAccepted);
    assert_eq!(ledger::relationship(&store, "alice", "bob").unwrap(), Relationship::Friends);
}

#[test]
fn abandoned_accept_converges_on_retry() {
    let store = community(&["alice", "bob"]);
    ledger::send_request(&store, "bob", "alice").unwrap();

    store.fail_next_write("users", "bob");
    let err = ledger::accept_request(&store, "alice", "bob").unwrap_err();
    assert!(err.is_retryable());
    assert!(user(&store, "alice").is_friend("bob"));
    assert!(!user(&store, "bob").is_friend("alice"));

    ledger::accept_request(&store, "alice", "bob").unwrap();
    assert!(user(&store, "bob").is_friend("alice"));
    assert!(!user(&store, "bob").has_sent("alice"));
}

#[test]
fn abandoned_send_is_repaired_by_reconcile() {
    let store = community(&["alice", "bob"]);
    store.fail_next_write("users", "bob");
    assert!(ledger::send_request(&store, "alice", "bob").is_err());

    assert_eq!(ledger::reconcile(&store, "alice", "bob").unwrap(), Relationship::RequestSent);
    assert_eq!(ledger::relationship(&store, "alice", "bob").unwrap(), Relationship::RequestSent);
    assert_eq!(ledger::relationship(&store, "bob", "alice").unwrap(), Relationship::RequestReceived);
}

#[derive(Clone, Copy, Debug)]
enum LedgerOp {
    Send,
    Accept,
    Reject,
    Cancel,
    Remove,
}

#[derive(Clone, Copy, Debug)]
enum Fault {
    None,
    /// The actor's own record.
    First,
    /// The counterpart's record.
    Second,
}

fn run_op(store: &MemoryStore, op: LedgerOp, actor: &str, other: &str) -> Result<(), SocialError> {
    match op {
        LedgerOp::Send => ledger::send_request(store, actor, other).map(|_| ()),
        LedgerOp::Accept => ledger::accept_request(store, actor, other),
        LedgerOp::Reject => ledger::reject_request(store, actor, other),
        LedgerOp::Cancel => ledger::cancel_request(store, actor, other),
        LedgerOp::Remove => ledger::remove_friend(store, actor, other),
    }
}

/// No counterpart sits in more than one of friends/sent/received on either record.
fn assert_exclusive(store: &MemoryStore, trail: &[(LedgerOp, &str, Fault)]) {
    for (me, other) in [("alice", "bob"), ("bob", "alice")] {
        let u = user(store, me);
        let slots = [u.is_friend(other), u.has_sent(other), u.has_received(other)];
        assert!(
            slots.iter().filter(|s| **s).count() <= 1,
            "{} lists {} in {:?} after {:?}",
            me,
            other,
            slots,
            trail
        );
    }
}

#[test]
fn relation_sets_stay_exclusive_under_injected_failures() {
    let ops = [LedgerOp::Send, LedgerOp::Accept, LedgerOp::Reject, LedgerOp::Cancel, LedgerOp::Remove];
    let mut steps = Vec::new();
    for op in ops {
        for actor in ["alice", "bob"] {
            for fault in [Fault::None, Fault::First, Fault::Second] {
                steps.push((op, actor, fault));
            }
        }
    }

    for &first in &steps {
        for &second in &steps {
            for &third in &steps {
                let trail = [first, second, third];
                let store = community(&["alice", "bob"]);
                for &(op, actor, fault) in &trail {
                    let other = if actor == "alice" { "bob" } else { "alice" };
                    match fault {
                        Fault::None => {}
                        Fault::First => store.fail_next_write("users", actor),
                        Fault::Second => store.fail_next_write("users", other),
                    }
                    let _ = run_op(&store, op, actor, other);
                    store.clear_failures();
                    assert_exclusive(&store, &trail);
                }

                let settled = ledger::reconcile(&store, "alice", "bob").unwrap();
                assert_exclusive(&store, &trail);
                let mirrored = match settled {
                    Relationship::RequestSent => Relationship::RequestReceived,
                    Relationship::RequestReceived => Relationship::RequestSent,
                    other => other,
                };
                assert_eq!(ledger::relationship(&store, "bob", "alice").unwrap(), mirrored, "{:?}", trail);
                assert_eq!(ledger::reconcile(&store, "alice", "bob").unwrap(), settled, "{:?}", trail);
            }
        }
    }
}

#[test]
fn retrying_each_failed_write_converges_to_a_mirrored_pair() {
    let setups: [&[(LedgerOp, &str)]; 3] = [
        &[],
        &[(LedgerOp::Send, "alice")],
        &[(LedgerOp::Send, "alice"), (LedgerOp::Accept, "bob")],
    ];
    let ops = [LedgerOp::Send, LedgerOp::Accept, LedgerOp::Reject, LedgerOp::Cancel, LedgerOp::Remove];

    for setup in setups {
        for op in ops {
            for actor in ["alice", "bob"] {
                for fault in [Fault::First, Fault::Second] {
                    let store = community(&["alice", "bob"]);
                    for &(prep, by) in setup {
                        let to = if by == "alice" { "bob" } else { "alice" };
                        run_op(&store, prep, by, to).unwrap();
                    }
                    let other = if actor == "alice" { "bob" } else { "alice" };
                    let target = match fault {
                        Fault::First | Fault::None => actor,
                        Fault::Second => other,
                    };
                    store.fail_next_write("users", target);
                    let trail = [(op, actor, fault)];
                    if let Err(e) = run_op(&store, op, actor, other) {
                        store.clear_failures();
                        if e.is_retryable() {
                            run_op(&store, op, actor, other).unwrap();
                        }
                    }
                    assert_exclusive(&store, &trail);

                    let here = ledger::relationship(&store, "alice", "bob").unwrap();
                    let there = ledger::relationship(&store, "bob", "alice").unwrap();
                    let mirrored = match here {
                        Relationship::RequestSent => Relationship::RequestReceived,
                        Relationship::RequestReceived => Relationship::RequestSent,
                        other => other,
                    };
                    assert_eq!(there, mirrored, "{:?} after {:?}", trail, setup);
                }
            }
        }
    }
}

#[test]
fn visibility_rules_hold_for_every_privacy_level() {
    let friends = |v: &str, a: &str| v == "bob" && a == "alice";
    let strangers = |_: &str, _: &str| false;

    let private = post("p", "alice", Privacy::Private, 1);
    for viewer in [Some("bob"), Some("carol"), None] {
        assert!(!is_visible(viewer, &private, &friends));
    }
    assert!(is_visible(Some("alice"), &private, &strangers));

    let public = post("q", "alice", Privacy::Public, 1);
    for viewer in [Some("bob"), Some("carol"), None] {
        assert!(is_visible(viewer, &public, &strangers));
    }

    let friends_only = post("r", "alice", Privacy::Friends, 1);
    assert!(is_visible(Some("bob"), &friends_only, &friends));
    assert!(!is_visible(Some("carol"), &friends_only, &friends));
    assert!(!is_visible(None, &friends_only, &friends));
    assert!(is_visible(Some("alice"), &friends_only, &strangers));
}

#[test]
fn feed_order_is_independent_of_input_order() {
    let posts = vec![
        post("d", "x", Privacy::Public, 50),
        post("b", "x", Privacy::Public, 200),
        post("a", "x", Privacy::Public, 200),
        post("c", "x", Privacy::Public, 100),
    ];
    let anyone = |_: &str, _: &str| true;
    let expected = vec!["a", "b", "c", "d"];

    for rotation in 0..posts.len() {
        let mut input = posts.clone();
        input.rotate_left(rotation);
        let ids: Vec<String> = feed::compose_feed(Some("v"), input, &anyone)
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, expected);
    }
}

#[test]
fn friendship_opens_friends_only_posts() {
    let store = community(&["alice", "bob"]);
    let blobs = MemoryBlobHost::new("https://cdn.test");
    let p1 = feed::create_post(&store, &blobs, "alice", draft("p1", Privacy::Friends), 100).unwrap();
    let p2 = feed::create_post(&store, &blobs, "alice", draft("p2", Privacy::Public), 200).unwrap();

    let before: Vec<String> = feed::feed(&store, Some("bob")).unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(before, vec![p2.id.clone()]);

    ledger::send_request(&store, "bob", "alice").unwrap();
    ledger::accept_request(&store, "alice", "bob").unwrap();

    let after: Vec<String> = feed::feed(&store, Some("bob")).unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(after, vec![p2.id, p1.id.clone()]);

    ledger::remove_friend(&store, "bob", "alice").unwrap();
    assert!(matches!(feed::get_post(&store, Some("bob"), &p1.id), Err(SocialError::NotFound(_))));
}

#[test]
fn hidden_posts_reject_every_interaction_as_missing() {
    let store = community(&["alice", "bob"]);
    let blobs = MemoryBlobHost::new("https://cdn.test");
    let secret = feed::create_post(&store, &blobs, "alice", draft("secret", Privacy::Private), 1).unwrap();

    let missing = |r: Result<_, SocialError>| matches!(r, Err(SocialError::NotFound(_)));
    assert!(missing(feed::get_post(&store, Some("bob"), &secret.id).map(|_| ())));
    assert!(missing(feed::like(&store, Some("bob"), &secret.id).map(|_| ())));
    assert!(missing(feed::unlike(&store, Some("bob"), &secret.id).map(|_| ())));
    assert!(missing(feed::add_comment(&store, Some("bob"), &secret.id, "hi", 2).map(|_| ())));
    assert!(missing(feed::list_comments(&store, Some("bob"), &secret.id).map(|_| ())));
    assert!(missing(feed::delete_post(&store, Some("bob"), &secret.id)));

    let untouched = feed::get_post(&store, Some("alice"), &secret.id).unwrap();
    assert!(untouched.likes.is_empty());
    assert_eq!(untouched.comment_count, 0);
}

#[test]
fn live_feed_follows_the_ledger() {
    let store = community(&["alice", "bob"]);
    let blobs = MemoryBlobHost::new("https://cdn.test");
    feed::create_post(&store, &blobs, "alice", draft("friends only", Privacy::Friends), 1).unwrap();

    let watcher = FeedWatcher::new(&store, Some("bob"));
    assert!(watcher.current().unwrap().is_empty());

    ledger::send_request(&store, "alice", "bob").unwrap();
    ledger::accept_request(&store, "bob", "alice").unwrap();
    assert_eq!(watcher.next_feed().unwrap().unwrap().len(), 1);

    feed::create_post(&store, &blobs, "alice", draft("another", Privacy::Public), 2).unwrap();
    let mut watcher = watcher;
    assert_eq!(watcher.next().unwrap().unwrap().len(), 2);
}

#[test]
fn profile_edits_do_not_clobber_concurrent_ledger_writes() {
    let store = community(&["alice", "bob"]);
    let stale = user(&store, "alice");

    ledger::send_request(&store, "bob", "alice").unwrap();
    users::update_profile(
        &store,
        &stale.uid,
        users::ProfileUpdate { bio: Some("Carry trades".to_string()), avatar_url: None },
    )
    .unwrap();

    let alice = user(&store, "alice");
    assert!(alice.has_received("bob"));
    assert_eq!(alice.bio.as_deref(), Some("Carry trades"));
    assert!(store.get("users", "bob").unwrap().is_some());
}
