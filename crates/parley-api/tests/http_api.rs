mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, SecondsFormat, TimeZone, Utc};
use serde_json::json;

use parley_api::scheduler::deliver_due;

use common::{TestApp, b64};

#[tokio::test]
async fn health_is_open_and_routes_need_a_token() {
    let app = TestApp::new();

    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.call(Method::GET, "/chats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "authentication");

    let forged = common::User {
        id: uuid::Uuid::new_v4(),
        token: "not.a.jwt".into(),
    };
    let (status, _) = app.get("/chats", &forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_members_are_forbidden() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let mallory = app.user("mallory");
    let chat = app.group(&alice, &[&bob]).await;

    let uri = format!("/chats/{}/messages", chat);
    let (status, body) = app.post(&uri, &mallory, json!({ "payload": b64("hi") })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "authorization");

    let (status, _) = app.get(&uri, &mallory).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            &format!("/chats/{}/batch", chat),
            &mallory,
            json!({ "messages": [{ "payload": b64("x") }] }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.get("/chats/9999/messages", &alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let chat = app.group(&alice, &[]).await;
    let uri = format!("/chats/{}/messages", chat);

    let (status, body) = app
        .post(&uri, &alice, json!({ "payload": b64("hi"), "senderId": alice.id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");

    let (status, _) = app.post(&uri, &alice, json!({ "payload": "%%%" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post(&uri, &alice, json!({ "payload": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn personal_chats_are_reused() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");

    let request = json!({ "kind": "personal", "members": [bob.id] });
    let (status, first) = app.post("/chats", &alice, request.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["created"], true);

    let (status, second) = app
        .post("/chats", &bob, json!({ "kind": "personal", "members": [alice.id] }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["created"], false);
    assert_eq!(second["chatId"], first["chatId"]);

    let carol = app.user("carol");
    let (status, _) = app
        .post("/chats", &alice, json!({ "kind": "personal", "members": [bob.id, carol.id] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, chats) = app.get("/chats", &bob).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chats.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn removed_members_lose_access() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let carol = app.user("carol");
    let chat = app.group(&alice, &[&bob, &carol]).await;

    let (status, body) = app
        .delete(&format!("/chats/{}/members/{}", chat, carol.id), &alice, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (status, _) = app
        .post(&format!("/chats/{}/messages", chat), &carol, json!({ "payload": b64("hi") }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post(&format!("/chats/{}/members", chat), &alice, json!({ "userId": carol.id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], true);
}

#[tokio::test]
async fn history_threads_and_edits() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let chat = app.group(&alice, &[&bob]).await;
    let uri = format!("/chats/{}/messages", chat);

    let (status, root) = app.post(&uri, &alice, json!({ "payload": b64("root") })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(root["senderId"], alice.id.to_string());
    assert_eq!(root["status"], "sent");
    let root_id = root["id"].as_i64().unwrap();

    let (status, reply) = app
        .post(&uri, &bob, json!({ "payload": b64("reply"), "parentId": root_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, thread) = app.get(&format!("/messages/{}/thread", root_id), &bob).await;
    let thread = thread.as_array().unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0]["id"], reply["id"]);

    let (_, history) = app.get(&uri, &bob).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["id"], reply["id"], "newest first");

    // only the sender edits or deletes
    let edit_uri = format!("/messages/{}", root_id);
    let (status, _) = app.put(&edit_uri, &bob, json!({ "payload": b64("hijack") })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, edited) = app.put(&edit_uri, &alice, json!({ "payload": b64("root v2") })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["payload"], b64("root v2"));
    assert!(edited["editedAt"].is_string());

    let (status, _) = app.delete(&edit_uri, &alice, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, history) = app.get(&uri, &alice).await;
    let deleted = history
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"].as_i64() == Some(root_id))
        .unwrap();
    assert_eq!(deleted["deleted"], true);
    assert!(deleted["payload"].is_null());

    let (status, _) = app.put(&edit_uri, &alice, json!({ "payload": b64("again") })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_never_moves_backwards() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let chat = app.group(&alice, &[&bob]).await;
    let (_, msg) = app
        .post(&format!("/chats/{}/messages", chat), &alice, json!({ "payload": b64("hi") }))
        .await;
    let uri = format!("/messages/{}/status", msg["id"]);

    let (_, body) = app.put(&uri, &bob, json!({ "status": "received" })).await;
    assert_eq!(body["changed"], true);
    assert_eq!(body["status"], "delivered");

    let (_, body) = app.put(&uri, &bob, json!({ "status": "seen" })).await;
    assert_eq!(body["changed"], true);

    let (status, body) = app.put(&uri, &bob, json!({ "status": "delivered" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn reactions_and_receipts_are_idempotent() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let chat = app.group(&alice, &[&bob]).await;
    let (_, msg) = app
        .post(&format!("/chats/{}/messages", chat), &alice, json!({ "payload": b64("hi") }))
        .await;
    let id = msg["id"].as_i64().unwrap();

    let reactions = format!("/messages/{}/reactions", id);
    for _ in 0..2 {
        let (status, _) = app.post(&reactions, &bob, json!({ "emoji": "👍" })).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, list) = app.get(&reactions, &alice).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = app.post(&reactions, &bob, json!({ "emoji": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app
        .delete(&reactions, &bob, Some(json!({ "emoji": "👍" })))
        .await;
    assert_eq!(body["removed"], true);
    let (_, body) = app
        .delete(&reactions, &bob, Some(json!({ "emoji": "👍" })))
        .await;
    assert_eq!(body["removed"], false);

    let read = format!("/messages/{}/read", id);
    for _ in 0..2 {
        let (status, _) = app.post(&read, &bob, json!({})).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, reads) = app.get(&format!("/messages/{}/reads", id), &alice).await;
    let reads = reads.as_array().unwrap();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0]["userId"], bob.id.to_string());

    let (_, history) = app.get(&format!("/chats/{}/messages", chat), &alice).await;
    assert_eq!(history[0]["status"], "seen");
}

#[tokio::test]
async fn last_seen_is_recorded_per_member() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let chat = app.group(&alice, &[&bob]).await;
    let uri = format!("/chats/{}/last-seen", chat);

    let (status, body) = app.post(&uri, &bob, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["lastSeen"].is_string());

    let (_, members) = app.get(&uri, &alice).await;
    let members = members.as_array().unwrap();
    let bob_row = members
        .iter()
        .find(|m| m["userId"] == bob.id.to_string())
        .unwrap();
    let alice_row = members
        .iter()
        .find(|m| m["userId"] == alice.id.to_string())
        .unwrap();
    assert!(bob_row["lastSeen"].is_string());
    assert!(alice_row["lastSeen"].is_null());
}

#[tokio::test]
async fn batch_then_sync_since() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let chat = app.group(&alice, &[]).await;

    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    let at = |mins: i64| (t0 + Duration::minutes(mins)).to_rfc3339_opts(SecondsFormat::Micros, true);

    let (status, body) = app
        .post(
            &format!("/chats/{}/batch", chat),
            &alice,
            json!({ "messages": [
                { "payload": b64("one"), "createdAt": at(1) },
                { "payload": b64("two"), "createdAt": at(2) },
                { "payload": b64("three"), "createdAt": at(3) },
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let ids = body["messageIds"].as_array().unwrap().clone();
    assert_eq!(ids.len(), 3);

    let (status, delta) = app
        .get(&format!("/chats/{}/since?since={}", chat, at(1)), &alice)
        .await;
    assert_eq!(status, StatusCode::OK);
    let delta = delta.as_array().unwrap();
    assert_eq!(delta.len(), 2, "strictly after the cursor");
    assert_eq!(delta[0]["id"], ids[1]);
    assert_eq!(delta[1]["id"], ids[2]);

    // same cursor with an unencoded `+01:00` offset
    let (status, shifted) = app
        .get(
            &format!("/chats/{}/since?since=2026-03-01T10:01:00+01:00", chat),
            &alice,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shifted.as_array().unwrap().len(), 2);

    let (status, _) = app
        .get(&format!("/chats/{}/since?since=yesterday", chat), &alice)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_batch_writes_nothing() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let chat = app.group(&alice, &[]).await;
    let uri = format!("/chats/{}/batch", chat);

    let (status, _) = app
        .post(
            &uri,
            &alice,
            json!({ "messages": [{ "payload": b64("ok") }, { "payload": "%%%" }] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            &uri,
            &alice,
            json!({ "messages": [{ "payload": b64("ok") }, { "payload": b64("x"), "parentId": 424242 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let too_many: Vec<_> = (0..=parley_api::sync::MAX_BATCH)
        .map(|_| json!({ "payload": b64("x") }))
        .collect();
    let (status, _) = app.post(&uri, &alice, json!({ "messages": too_many })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, history) = app.get(&format!("/chats/{}/messages", chat), &alice).await;
    assert!(history.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn key_directory() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");

    let (status, body) = app.get(&format!("/keys/{}", alice.id), &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = app.put("/keys", &alice, json!({ "publicKey": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.put("/keys", &alice, json!({ "publicKey": "pk-1" })).await;
    let (status, _) = app.put("/keys", &alice, json!({ "publicKey": "pk-2" })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get(&format!("/keys/{}", alice.id), &bob).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["publicKey"], "pk-2");
}

#[tokio::test]
async fn scheduled_messages_deliver_once_and_cancel() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let chat = app.group(&alice, &[&bob]).await;
    let uri = format!("/chats/{}/scheduled", chat);

    let past = (Utc::now() - Duration::minutes(1)).to_rfc3339();
    let future = (Utc::now() + Duration::days(1)).to_rfc3339();

    let (status, due) = app
        .post(&uri, &alice, json!({ "payload": b64("later"), "scheduledFor": past }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, pending) = app
        .post(&uri, &alice, json!({ "payload": b64("much later"), "scheduledFor": future }))
        .await;

    let (_, list) = app.get("/scheduled", &alice).await;
    assert_eq!(list.as_array().unwrap().len(), 2);

    assert_eq!(deliver_due(&app.state).await.unwrap(), 1);
    assert_eq!(deliver_due(&app.state).await.unwrap(), 0);

    let (_, history) = app.get(&format!("/chats/{}/messages", chat), &bob).await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["payload"], b64("later"));

    let (_, list) = app.get("/scheduled", &alice).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = app.delete(&format!("/scheduled/{}", due["id"]), &alice, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.delete(&format!("/scheduled/{}", pending["id"]), &bob, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete(&format!("/scheduled/{}", pending["id"]), &alice, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, list) = app.get("/scheduled", &alice).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn scheduled_messages_of_removed_members_are_not_delivered() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let carol = app.user("carol");
    let chat = app.group(&alice, &[&carol]).await;

    let past = (Utc::now() - Duration::minutes(1)).to_rfc3339();
    let (status, _) = app
        .post(
            &format!("/chats/{}/scheduled", chat),
            &carol,
            json!({ "payload": b64("ghost"), "scheduledFor": past }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.delete(&format!("/chats/{}/members/{}", chat, carol.id), &alice, None)
        .await;

    assert_eq!(deliver_due(&app.state).await.unwrap(), 0);
    let (_, history) = app.get(&format!("/chats/{}/messages", chat), &alice).await;
    assert!(history.as_array().unwrap().is_empty());
    let (_, pending) = app.get("/scheduled", &carol).await;
    assert!(pending.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn call_history_is_kept_per_chat_and_per_user() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let mallory = app.user("mallory");
    let chat = app.group(&alice, &[&bob]).await;

    let (status, call) = app
        .post(
            &format!("/chats/{}/calls", chat),
            &alice,
            json!({ "kind": "video", "participants": [bob.id, mallory.id] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(call["kind"], "video");
    assert_eq!(call["startedBy"], alice.id.to_string());
    assert_eq!(call["participants"], json!([alice.id, bob.id]));
    assert!(call["endedAt"].is_null());

    let (status, _) = app
        .post(&format!("/chats/{}/calls", chat), &mallory, json!({ "kind": "voice" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .post(&format!("/chats/{}/calls", chat), &alice, json!({ "kind": "fax" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let end = format!("/calls/{}/end", call["id"]);
    let (status, _) = app.put(&end, &mallory, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, ended) = app.put(&end, &bob, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ended["endedAt"].is_string());
    let (_, again) = app.put(&end, &alice, json!({})).await;
    assert_eq!(again["endedAt"], ended["endedAt"]);
    let (status, _) = app.put("/calls/9999/end", &alice, json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, second) = app
        .post(&format!("/chats/{}/calls", chat), &alice, json!({ "kind": "screen" }))
        .await;
    let (_, history) = app.get(&format!("/chats/{}/calls", chat), &bob).await;
    let ids: Vec<_> = history.as_array().unwrap().iter().map(|c| c["id"].clone()).collect();
    assert_eq!(ids, vec![second["id"].clone(), call["id"].clone()]);

    // bob was only invited to the first call
    let (_, mine) = app.get("/calls", &bob).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["id"], call["id"]);
    let (status, _) = app.get(&format!("/chats/{}/calls", chat), &mallory).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn mentions_are_listed_for_the_mentioned_user() {
    let app = TestApp::new();
    let alice = app.user("alice");
    let bob = app.user("bob");
    let outsider = app.user("outsider");
    let chat = app.group(&alice, &[&bob]).await;

    let (_, sent) = app
        .post(
            &format!("/chats/{}/messages", chat),
            &alice,
            json!({ "payload": b64("hey"), "mentions": [bob.id, outsider.id, alice.id] }),
        )
        .await;
    app.post(&format!("/chats/{}/messages", chat), &alice, json!({ "payload": b64("plain") }))
        .await;

    let (status, mentions) = app.get("/mentions", &bob).await;
    assert_eq!(status, StatusCode::OK);
    let mentions = mentions.as_array().unwrap();
    assert_eq!(mentions.len(), 1);
    assert_eq!(mentions[0]["id"], sent["id"]);

    let (_, own) = app.get("/mentions", &alice).await;
    assert!(own.as_array().unwrap().is_empty());
    let (_, outside) = app.get("/mentions", &outsider).await;
    assert!(outside.as_array().unwrap().is_empty());
}
