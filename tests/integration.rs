//! Integration tests for inbox-assist.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::routing::post;
use axum::Router;
use inbox_assist::drafting::{FALLBACK_REPLY, MOCK_REPLY, TEMPERATURE};
use inbox_assist::{
    start_app_with, AppOptions, CompletionProvider, CompletionRequest, DraftMode, Error,
    FetchRange, MailboxConnector, MailboxSession, MemoryStore, OpenAiClient, ReplyDrafter,
    RunningServices,
};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

const REFUND_MAIL: &str = "From: Alice Smith <alice@example.com>\r\n\
Subject: Refund request\r\n\
Date: Tue, 14 Nov 2023 10:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hello,\r\n\r\n\r\n\r\nI would like a refund for order 1234.\r\n";

const SHIPPING_MAIL: &str = "From: bob@example.com\r\n\
Subject: Where is my parcel\r\n\
Date: Wed, 15 Nov 2023 09:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
My shipping has been delayed for a week.\r\n";

struct FakeMailbox {
    raw: Vec<Vec<u8>>,
    connects: Arc<AtomicUsize>,
}

struct FakeSession {
    raw: Vec<Vec<u8>>,
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn connect(&self) -> inbox_assist::Result<Box<dyn MailboxSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            raw: self.raw.clone(),
        }))
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn open(&mut self, _name: &str) -> inbox_assist::Result<u32> {
        Ok(u32::try_from(self.raw.len()).unwrap())
    }

    async fn fetch(&mut self, range: FetchRange) -> inbox_assist::Result<Vec<Vec<u8>>> {
        let start = usize::try_from(range.start).unwrap() - 1;
        Ok(self.raw[start..].to_vec())
    }

    async fn end(&mut self) -> inbox_assist::Result<()> {
        Ok(())
    }
}

fn mock_options() -> AppOptions {
    AppOptions {
        http_port: 0,
        use_mock_ai: true,
        sync_interval: Duration::from_secs(3600),
        ..AppOptions::default()
    }
}

async fn start_without_sync(opts: AppOptions) -> RunningServices {
    start_app_with(opts, None).await.unwrap()
}

fn url(services: &RunningServices, path: &str) -> String {
    format!("http://127.0.0.1:{}{path}", services.http_addr.port())
}

async fn get_json(client: &Client, url: &str) -> (StatusCode, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

async fn post_json(client: &Client, url: &str, body: &Value) -> (StatusCode, Value) {
    let resp = client.post(url).json(body).send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn root_reports_running_and_unknown_routes_are_json() {
    let services = start_without_sync(mock_options()).await;
    let client = Client::new();

    let (status, body) = get_json(&client, &url(&services, "/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "AI Support Backend is running");

    let (status, body) = get_json(&client, &url(&services, "/no/such/route")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "API route not found");

    let (status, body) = get_json(&client, &url(&services, "/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mock_ai"], true);
    assert_eq!(body["sync_enabled"], false);

    services.stop().await;
}

#[tokio::test]
async fn knowledge_lifecycle() {
    let services = start_without_sync(mock_options()).await;
    let client = Client::new();
    let endpoint = url(&services, "/knowledge");

    let (status, body) = post_json(&client, &endpoint, &json!({ "content": "no title" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = post_json(
        &client,
        &endpoint,
        &json!({ "title": "Empty", "content": "   " }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, first) = post_json(
        &client,
        &endpoint,
        &json!({
            "title": "Refund policy",
            "content": "Refunds are issued within 30 days of purchase.",
            "filePath": "uploads/knowledge/refunds.pdf"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["knowledge"]["filePath"], "uploads/knowledge/refunds.pdf");

    post_json(
        &client,
        &endpoint,
        &json!({ "title": "Shipping", "content": "Orders ship within two business days." }),
    )
    .await;

    let (_, listed) = get_json(&client, &endpoint).await;
    let entries = listed["knowledge"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["title"], "Shipping");
    assert_eq!(entries[1]["title"], "Refund policy");

    let id = first["knowledge"]["id"].as_str().unwrap();
    let resp = client
        .delete(format!("{endpoint}/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = client
        .delete(format!("{endpoint}/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (_, listed) = get_json(&client, &endpoint).await;
    assert_eq!(listed["knowledge"].as_array().unwrap().len(), 1);

    services.stop().await;
}

#[tokio::test]
async fn replies_require_ai_reply() {
    let services = start_without_sync(mock_options()).await;
    let client = Client::new();
    let endpoint = url(&services, "/replies");

    let (status, body) = post_json(
        &client,
        &endpoint,
        &json!({ "from": "alice@example.com", "subject": "Refund" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "AI reply is required");

    let (status, body) = post_json(
        &client,
        &endpoint,
        &json!({ "aiReply": "Your refund has been processed." }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"]["aiReply"], "Your refund has been processed.");
    assert!(body["reply"]["from"].is_null());

    let (_, listed) = get_json(&client, &endpoint).await;
    assert_eq!(listed["replies"].as_array().unwrap().len(), 1);

    services.stop().await;
}

#[tokio::test]
async fn mock_mode_drafts_fixed_reply() {
    let services = start_without_sync(mock_options()).await;
    let client = Client::new();

    let (status, body) = post_json(
        &client,
        &url(&services, "/ai/generate-reply"),
        &json!({ "emailText": "I need a refund for my order" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["reply"], MOCK_REPLY);

    services.stop().await;
}

#[tokio::test]
async fn sync_without_mailbox_is_unavailable() {
    let services = start_without_sync(mock_options()).await;
    let client = Client::new();

    let resp = client
        .post(url(&services, "/emails/sync"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = get_json(&client, &url(&services, "/emails")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["emails"].as_array().unwrap().is_empty());

    services.stop().await;
}

#[tokio::test]
async fn synced_messages_are_listed_once() {
    let connects = Arc::new(AtomicUsize::new(0));
    let mailbox = FakeMailbox {
        raw: vec![REFUND_MAIL.as_bytes().to_vec(), SHIPPING_MAIL.as_bytes().to_vec()],
        connects: Arc::clone(&connects),
    };
    let services = start_app_with(mock_options(), Some(Arc::new(mailbox)))
        .await
        .unwrap();
    let client = Client::new();

    // The background loop syncs once at startup
    let mut emails = Vec::new();
    for _ in 0..50 {
        let (_, body) = get_json(&client, &url(&services, "/emails")).await;
        emails = body["emails"].as_array().unwrap().clone();
        if emails.len() == 2 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[0]["subject"], "Where is my parcel");
    assert_eq!(emails[1]["from"], "Alice Smith <alice@example.com>");
    assert_eq!(
        emails[1]["body"],
        "Hello,\n\nI would like a refund for order 1234."
    );

    // A manual run refetches the same window without duplicating rows
    let mut manual = None;
    for _ in 0..50 {
        let resp = client
            .post(url(&services, "/emails/sync"))
            .send()
            .await
            .unwrap();
        if resp.status() != StatusCode::CONFLICT {
            manual = Some((resp.status(), resp.json::<Value>().await.unwrap()));
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let (status, body) = manual.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fetched"], 2);
    assert!(connects.load(Ordering::SeqCst) >= 2);

    let (_, body) = get_json(&client, &url(&services, "/emails")).await;
    assert_eq!(body["emails"].as_array().unwrap().len(), 2);

    let id = body["emails"][0]["id"].as_str().unwrap();
    let resp = client
        .delete(url(&services, &format!("/emails/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    services.stop().await;
}

#[tokio::test]
async fn sqlite_data_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let opts = AppOptions {
        database_path: Some(dir.path().join("assist.db")),
        ..mock_options()
    };
    let client = Client::new();

    let services = start_without_sync(opts.clone()).await;
    let (status, _) = post_json(
        &client,
        &url(&services, "/replies"),
        &json!({ "subject": "Refund", "aiReply": "We have refunded your order." }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    services.stop().await;

    let services = start_without_sync(opts).await;
    let (_, listed) = get_json(&client, &url(&services, "/replies")).await;
    let replies = listed["replies"].as_array().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["subject"], "Refund");

    services.stop().await;
}

type SeenRequests = Arc<Mutex<Vec<(Option<String>, Value)>>>;

#[derive(Clone)]
struct CompletionStub {
    status: StatusCode,
    reply: Value,
    seen: SeenRequests,
}

async fn stub_completions(
    State(stub): State<CompletionStub>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> (StatusCode, axum::Json<Value>) {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    stub.seen.lock().unwrap().push((auth, body));
    (stub.status, axum::Json(stub.reply.clone()))
}

/// Serve a canned chat completions response and record every request.
async fn start_completion_stub(status: StatusCode, reply: Value) -> (String, SeenRequests) {
    let seen = SeenRequests::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(stub_completions))
        .with_state(CompletionStub {
            status,
            reply,
            seen: Arc::clone(&seen),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1/"), seen)
}

fn completion_request(prompt: &str) -> CompletionRequest<'_> {
    CompletionRequest {
        prompt,
        model: "gpt-4o-mini",
        temperature: TEMPERATURE,
    }
}

#[tokio::test]
async fn openai_client_posts_chat_completion() {
    let (base_url, seen) = start_completion_stub(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "role": "assistant", "content": "  Happy to help.  " } }] }),
    )
    .await;
    let client = OpenAiClient::new("sk-test", base_url).unwrap();

    let reply = client
        .complete(completion_request("Draft a reply"))
        .await
        .unwrap();
    assert_eq!(reply, "  Happy to help.  ");

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let (auth, body) = &seen[0];
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["temperature"].as_f64(), Some(0.3));
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "Draft a reply");
}

#[tokio::test]
async fn live_drafter_trims_model_reply() {
    let (base_url, seen) = start_completion_stub(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "content": "\n Your refund is on its way. \n" } }] }),
    )
    .await;
    let drafter = ReplyDrafter::new(
        Arc::new(MemoryStore::new()),
        DraftMode::Live {
            provider: Arc::new(OpenAiClient::new("sk-test", base_url).unwrap()),
            model: "gpt-4o-mini".into(),
        },
    );

    let reply = drafter.generate_reply("Where is my refund?").await;
    assert_eq!(reply, "Your refund is on its way.");

    let seen = seen.lock().unwrap().clone();
    let prompt = seen[0].1["messages"][0]["content"].as_str().unwrap().to_owned();
    assert!(prompt.contains("Where is my refund?"));
}

#[tokio::test]
async fn openai_error_status_becomes_fallback() {
    let (base_url, _) = start_completion_stub(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error": { "message": "model overloaded" } }),
    )
    .await;
    let client = Arc::new(OpenAiClient::new("sk-test", base_url).unwrap());

    let err = client
        .complete(completion_request("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
    assert!(err.to_string().contains("500"));

    let drafter = ReplyDrafter::new(
        Arc::new(MemoryStore::new()),
        DraftMode::Live {
            provider: client,
            model: "gpt-4o-mini".into(),
        },
    );
    assert_eq!(drafter.generate_reply("hello").await, FALLBACK_REPLY);
}

#[tokio::test]
async fn openai_reply_without_content_is_an_error() {
    let (base_url, _) = start_completion_stub(StatusCode::OK, json!({ "choices": [] })).await;
    let client = OpenAiClient::new("sk-test", base_url).unwrap();
    let err = client
        .complete(completion_request("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(_)));

    let (base_url, _) = start_completion_stub(
        StatusCode::OK,
        json!({ "choices": [{ "message": { "content": null } }] }),
    )
    .await;
    let client = OpenAiClient::new("sk-test", base_url).unwrap();
    let err = client
        .complete(completion_request("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
}
