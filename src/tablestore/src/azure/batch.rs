//! Multipart `$batch` change sets.
//!
//! A batch is one `multipart/mixed` request holding a single change set;
//! the service applies the change set atomically and answers with a
//! multipart body containing either one response per operation or a single
//! error response for the operation that failed.

use serde_json::Value;
use url::Url;

use crate::{BatchStatus, StoreError, StoreResult};

const CRLF: &str = "\r\n";

/// Build the request body for a change set of entity deletes.
pub fn delete_body(batch_boundary: &str, changeset_boundary: &str, entity_urls: &[Url]) -> String {
    let mut body = String::new();

    body.push_str(&format!("--{batch_boundary}{CRLF}"));
    body.push_str(&format!(
        "Content-Type: multipart/mixed; boundary={changeset_boundary}{CRLF}{CRLF}"
    ));

    for url in entity_urls {
        body.push_str(&format!("--{changeset_boundary}{CRLF}"));
        body.push_str(&format!("Content-Type: application/http{CRLF}"));
        body.push_str(&format!("Content-Transfer-Encoding: binary{CRLF}{CRLF}"));
        body.push_str(&format!("DELETE {url} HTTP/1.1{CRLF}"));
        body.push_str(&format!("Accept: application/json;odata=minimalmetadata{CRLF}"));
        body.push_str(&format!("If-Match: *{CRLF}{CRLF}"));
    }

    body.push_str(&format!("--{changeset_boundary}--{CRLF}"));
    body.push_str(&format!("--{batch_boundary}--{CRLF}"));
    body
}

/// Interpret the multipart response of a change set.
pub fn parse_response(body: &str) -> StoreResult<BatchStatus> {
    let mut saw_status = false;

    for (offset, line) in line_offsets(body) {
        let Some(rest) = line.strip_prefix("HTTP/1.1 ") else {
            continue;
        };
        let status: u16 = rest
            .split_whitespace()
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| StoreError::MalformedResponse(format!("bad status line '{line}'")))?;
        saw_status = true;

        if (200..300).contains(&status) {
            continue;
        }

        let message = error_message(&body[offset..]).unwrap_or_else(|| rest.trim().to_string());
        return Ok(BatchStatus::PartialFailure {
            failed_index: failed_index(&message),
            status,
            message,
        });
    }

    if saw_status {
        Ok(BatchStatus::Deleted)
    } else {
        Err(StoreError::MalformedResponse(
            "batch response holds no operation status".to_string(),
        ))
    }
}

fn line_offsets(body: &str) -> impl Iterator<Item = (usize, &str)> {
    body.split_inclusive('\n').scan(0, |offset, line| {
        let start = *offset;
        *offset += line.len();
        Some((start, line.trim_end_matches(['\r', '\n'])))
    })
}

/// Extract `odata.error.message.value` from the first JSON document in `part`.
fn error_message(part: &str) -> Option<String> {
    let start = part.find('{')?;
    let value: Value = serde_json::Deserializer::from_str(&part[start..])
        .into_iter::<Value>()
        .next()?
        .ok()?;
    let message = value.pointer("/odata.error/message/value")?.as_str()?;
    Some(message.lines().next().unwrap_or(message).to_string())
}

/// The service prefixes batch errors with the failing operation index: `"3:…"`.
fn failed_index(message: &str) -> Option<usize> {
    message.split_once(':')?.0.trim().parse().ok()
}
