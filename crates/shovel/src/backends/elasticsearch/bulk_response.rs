use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::common::ItemStatus;
use crate::errors::TransportError;

// -- 📬 {"took":3,"errors":true,"items":[{"index":{"_id":"1","status":201}}, ...]}
#[derive(Debug, Deserialize)]
struct BulkResponse {
    items: Vec<HashMap<String, BulkItemResponse>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResponse {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<Value>,
}

/// 🔍 Decode a `_bulk` response body into per-item statuses, in response order.
///
/// Each item is a single-key map (`{"index": {...}}` or `{"create": {...}}`). An item with
/// an `error`, or a non-2xx status, is a rejection. Anything that doesn't parse is a
/// [`TransportError::MalformedResponse`]: if we can't read the verdicts we have none.
pub(crate) fn decode_bulk_response(body: &[u8]) -> Result<Vec<ItemStatus>, TransportError> {
    let response: BulkResponse = serde_json::from_slice(body)
        .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

    response
        .items
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            let mut entries = item.into_values();
            match (entries.next(), entries.next()) {
                (Some(result), None) => Ok(to_status(result)),
                _ => Err(TransportError::MalformedResponse(format!(
                    "item {} should hold exactly one action",
                    position
                ))),
            }
        })
        .collect()
}

fn to_status(result: BulkItemResponse) -> ItemStatus {
    match result.error {
        None if (200..300).contains(&result.status) => ItemStatus::Accepted { id: result.id },
        None => ItemStatus::Rejected {
            status: result.status,
            reason: format!("HTTP {}", result.status),
        },
        Some(error) => ItemStatus::Rejected {
            status: result.status,
            reason: describe_error(&error),
        },
    }
}

/// 🧾 `{"type":"mapper_parsing_exception","reason":"failed to parse"}` → `mapper_parsing_exception: failed to parse`.
/// Older clusters and proxies sometimes send a bare string; that goes through as is.
fn describe_error(error: &Value) -> String {
    match error {
        Value::String(reason) => reason.clone(),
        Value::Object(fields) => {
            let kind = fields.get("type").and_then(Value::as_str);
            let reason = fields.get("reason").and_then(Value::as_str);
            match (kind, reason) {
                (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
                (Some(text), None) | (None, Some(text)) => text.to_string(),
                (None, None) => error.to_string(),
            }
        }
        other => other.to_string(),
    }
}
