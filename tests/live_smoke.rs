//! Runs against a live server: `VOLCANO_BIND_ADDR=127.0.0.1:3000 cargo run`, then
//! `cargo test --test live_smoke -- --ignored`.

use serde_json::{json, Value};

const BASE_URL: &str = "http://127.0.0.1:3000";

async fn sign_up_and_login(client: &reqwest::Client, username: &str) -> (String, String) {
    let resp = client
        .post(format!("{}/users", BASE_URL))
        .json(&json!({ "username": username, "password": "smoke-test" }))
        .send()
        .await
        .expect("server reachable");
    assert_eq!(resp.status(), 201);
    let user: Value = resp.json().await.unwrap();

    let resp = client
        .post(format!("{}/login", BASE_URL))
        .json(&json!({ "username": username, "password": "smoke-test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let login: Value = resp.json().await.unwrap();

    (
        user["uid"].as_str().unwrap().to_string(),
        login["token"].as_str().unwrap().to_string(),
    )
}

#[ignore]
#[tokio::test]
async fn friends_only_post_round_trip() {
    let client = reqwest::Client::new();
    let suffix = &uuid::Uuid::new_v4().to_string()[..8];
    let (alice_uid, alice) = sign_up_and_login(&client, &format!("alice_{}", suffix)).await;
    let (bob_uid, bob) = sign_up_and_login(&client, &format!("bob_{}", suffix)).await;

    let post: Value = client
        .post(format!("{}/posts", BASE_URL))
        .bearer_auth(&alice)
        .json(&json!({ "content": "smoke", "privacy": "friends" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let post_url = format!("{}/posts/{}", BASE_URL, post["id"].as_str().unwrap());

    let hidden = client.get(&post_url).bearer_auth(&bob).send().await.unwrap();
    assert_eq!(hidden.status(), 404);

    let resp = client
        .post(format!("{}/friends/requests", BASE_URL))
        .bearer_auth(&bob)
        .json(&json!({ "target_uid": alice_uid }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .post(format!("{}/friends/requests/{}/accept", BASE_URL, bob_uid))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let visible = client.get(&post_url).bearer_auth(&bob).send().await.unwrap();
    assert_eq!(visible.status(), 200);
}
