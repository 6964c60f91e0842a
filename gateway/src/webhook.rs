//! Webhook authentication and WAHA event parsing.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

const SIGNATURE_HEADER: &str = "x-webhook-hmac";

/// HMAC-SHA512 over the raw body against the configured secret. An empty
/// or missing secret disables the check.
pub fn verify_hmac(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> bool {
    let secret = match secret {
        Some(secret) if !secret.is_empty() => secret,
        _ => return true,
    };

    let provided = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(signature) => signature,
        None => return false,
    };
    let provided = match hex::decode(provided) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

pub enum WebhookDecision {
    /// Publish this task message to `crm_tasks`.
    Queue(Value),
    /// Nothing to process; the reason goes back in the HTTP response.
    Ignore(&'static str),
}

/// Turn a WAHA event envelope into exactly one task message, or an ignore
/// decision for events the pipeline does not process.
pub fn parse_wa_event(payload: &Value, tenant_id: &str) -> WebhookDecision {
    let event = payload["event"].as_str().unwrap_or_default();
    if event != "message" && event != "message.any" {
        return WebhookDecision::Ignore("unhandled event type");
    }

    let session = payload["session"].as_str().unwrap_or_default();
    let data = &payload["data"];
    let body = &data["payload"];

    if body["fromMe"].as_bool().unwrap_or(false) || data["fromMe"].as_bool().unwrap_or(false) {
        return WebhookDecision::Ignore("own message");
    }

    let chat_id = data["from"]
        .as_str()
        .or_else(|| body["from"].as_str())
        .unwrap_or_default();
    if chat_id.is_empty() {
        return WebhookDecision::Ignore("missing chat id");
    }

    let message_id = data["id"]["id"]
        .as_str()
        .or_else(|| data["id"].as_str())
        .or_else(|| body["id"].as_str())
        .unwrap_or_default();

    let message_type = body["type"].as_str().unwrap_or("text");

    // Native location shares carry coordinates instead of text.
    if message_type == "location" {
        let (lat, lng) = (
            body["latitude"].as_f64().or_else(|| data["latitude"].as_f64()),
            body["longitude"].as_f64().or_else(|| data["longitude"].as_f64()),
        );
        let (Some(lat), Some(lng)) = (lat, lng) else {
            return WebhookDecision::Ignore("invalid location data");
        };
        return WebhookDecision::Queue(task_message(
            tenant_id,
            session,
            chat_id,
            "location",
            "",
            json!({
                "message_id": message_id,
                "wa_session": session,
                "phone_number": phone_from_chat(chat_id),
                "push_name": payload["data"]["pushName"].as_str(),
                "location": {"latitude": lat, "longitude": lng},
                "timestamp": data["timestamp"],
            }),
        ));
    }

    let text = body["text"]
        .as_str()
        .or_else(|| body["body"].as_str())
        .or_else(|| data["body"].as_str())
        .unwrap_or_default();
    if text.is_empty() {
        return WebhookDecision::Ignore("empty message");
    }

    WebhookDecision::Queue(task_message(
        tenant_id,
        session,
        chat_id,
        "text",
        text,
        json!({
            "message_id": message_id,
            "wa_session": session,
            "phone_number": phone_from_chat(chat_id),
            "push_name": payload["data"]["pushName"].as_str(),
            "timestamp": data["timestamp"],
        }),
    ))
}

fn task_message(
    tenant_id: &str,
    session: &str,
    chat_id: &str,
    message_type: &str,
    content: &str,
    metadata: Value,
) -> Value {
    json!({
        "type": "wa_message",
        "webhook_type": "whatsapp",
        "session": session,
        "chat_id": chat_id,
        "message_type": message_type,
        "content": content,
        "metadata": metadata,
        "tenant_id": tenant_id,
    })
}

fn phone_from_chat(chat_id: &str) -> Option<&str> {
    chat_id.split_once('@').map(|(phone, _)| phone)
}
