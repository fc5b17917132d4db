//! Integration tests for the webhook HTTP surface.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

use common::{RecordingProvider, acknowledge, gateway, postmark};
use switchboard::store::InMemoryStore;
use switchboard::webhook::webhook_routes;

async fn app() -> (axum::Router, Arc<RecordingProvider>, Arc<RecordingProvider>) {
    let smtp = RecordingProvider::new("smtp", false);
    let sms = RecordingProvider::new("twilio", false);
    let gw = gateway(
        Arc::new(InMemoryStore::new()),
        &[smtp.clone()],
        &[sms.clone()],
        10,
        acknowledge(),
    )
    .await;
    (webhook_routes(gw.processor), smtp, sms)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _, _) = app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unsupported_provider_is_bad_request() {
    let (app, _, _) = app().await;
    let response = app
        .oneshot(post("/webhooks/carrier-pigeon", "application/json", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(body["error"].as_str().unwrap().contains("carrier-pigeon"));
}

#[tokio::test]
async fn postmark_json_is_processed() {
    let (app, smtp, _) = app().await;
    let payload = postmark("alice@x.com", "m-1@x.com", "Quote Request", None, "How much?");
    let response = app
        .oneshot(post("/webhooks/postmark", "application/json", payload.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "replied");
    assert_eq!(body["channel"], "email");
    assert_eq!(body["isNewConversation"], true);
    assert_eq!(smtp.sent().len(), 1);
}

#[tokio::test]
async fn twilio_form_gets_twiml() {
    let (app, _, sms) = app().await;
    let form = "From=%2B15550001111&To=%2B15550009999&Body=Hi+there&MessageSid=SM123&NumMedia=0";
    let response = app
        .oneshot(post("/webhooks/twilio", "application/x-www-form-urlencoded", form))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
    assert!(body_text(response).await.contains("<Response></Response>"));

    let sent = sms.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["+15550001111"]);
}

#[tokio::test]
async fn sendgrid_multipart_is_processed() {
    let (app, smtp, _) = app().await;
    let boundary = "xYzZY";
    let mut body = String::new();
    let headers = "Message-ID: <sg-1@y.com>\r\nDate: Sat, 5 Apr 2025 10:00:00 +0000\r\n";
    for (name, value) in [
        ("from", "Bob <bob@y.com>"),
        ("to", "support@acme.io"),
        ("subject", "Catering order"),
        ("text", "Can you cater for 40 people?"),
        ("headers", headers),
    ] {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"attachment1\"; filename=\"menu.txt\"\r\n\
         Content-Type: text/plain\r\n\r\nsoup\r\n--{boundary}--\r\n"
    ));

    let response = app
        .oneshot(post(
            "/webhooks/sendgrid",
            &format!("multipart/form-data; boundary={boundary}"),
            body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "replied");
    assert_eq!(body["provider"], "sendgrid");
    assert_eq!(body["eventId"], "sg-1@y.com");

    let sent = smtp.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["bob@y.com"]);
    assert_eq!(sent[0].subject.as_deref(), Some("Re: Catering order"));
}

#[tokio::test]
async fn malformed_payload_is_acknowledged_as_rejected() {
    let (app, smtp, _) = app().await;
    let response = app
        .oneshot(post("/webhooks/postmark", "application/json", "{not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "rejected");
    assert!(smtp.sent().is_empty());
}

#[tokio::test]
async fn raw_mime_message_is_accepted() {
    let (app, smtp, _) = app().await;
    let raw = "From: Bob <bob@y.com>\r\n\
               To: support@acme.io\r\n\
               Subject: Opening hours\r\n\
               Message-ID: <raw-1@y.com>\r\n\
               Date: Sat, 5 Apr 2025 10:00:00 +0000\r\n\
               \r\n\
               Are you open on Sunday?\r\n";
    let response = app
        .oneshot(post("/webhooks/mime", "message/rfc822", raw))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "replied");
    assert_eq!(body["eventId"], "raw-1@y.com");

    let sent = smtp.sent();
    assert_eq!(sent[0].in_reply_to.as_deref(), Some("raw-1@y.com"));
    assert_eq!(sent[0].subject.as_deref(), Some("Re: Opening hours"));
}

#[tokio::test]
async fn serves_over_tcp() {
    let (app, _, _) = app().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/webhooks/vonage"))
        .json(&serde_json::json!({
            "msisdn": "15550004444",
            "to": "15550009999",
            "messageId": "0A00000012345678",
            "text": "hello",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["provider"], "vonage");
    assert_eq!(body["channel"], "sms");
}
