//! Bus messages, headers, and reply status.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{BusError, BusResult};

/// Well-known header names.
pub mod headers {
    pub const TRACE_ID: &str = "X-Trace-Id";
    pub const REQUEST_USER: &str = "X-Request-User";
    pub const STATUS_CODE: &str = "X-Status-Code";
    pub const STATUS_MESSAGE: &str = "X-Status-Message";
    pub const ROUTER_PATH: &str = "X-Router-Path";
    pub const REQUEST_METHOD: &str = "X-Request-Method";

    /// Every header the runtime reads back off the wire.
    pub const KNOWN: &[&str] = &[
        TRACE_ID,
        REQUEST_USER,
        STATUS_CODE,
        STATUS_MESSAGE,
        ROUTER_PATH,
        REQUEST_METHOD,
    ];
}

/// Outcome carried on a reply. `code == 0` is success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyStatus {
    pub code: i32,
    pub message: String,
}

impl ReplyStatus {
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// String headers attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusHeaders(BTreeMap<String, String>);

impl BusHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.get(headers::TRACE_ID)
    }

    pub fn request_user(&self) -> Option<&str> {
        self.get(headers::REQUEST_USER)
    }

    /// Status carried by the headers. Missing status reads as success.
    pub fn status(&self) -> ReplyStatus {
        let code = self
            .get(headers::STATUS_CODE)
            .map(|c| c.trim().parse::<i32>().unwrap_or(-1))
            .unwrap_or(0);
        let message = self.get(headers::STATUS_MESSAGE).unwrap_or_default().to_string();
        ReplyStatus { code, message }
    }

    pub fn set_status(&mut self, status: &ReplyStatus) {
        self.insert(headers::STATUS_CODE, status.code.to_string());
        self.insert(headers::STATUS_MESSAGE, status.message.clone());
    }

    /// Identity headers (`trace id`, `request user`) shared with a reply.
    pub fn identity(&self) -> BusHeaders {
        let mut out = BusHeaders::new();
        if let Some(t) = self.trace_id() {
            out.insert(headers::TRACE_ID, t);
        }
        if let Some(u) = self.request_user() {
            out.insert(headers::REQUEST_USER, u);
        }
        out
    }
}

/// A message as it travels over the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub headers: BusHeaders,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: BusHeaders::new(),
            payload: payload.into(),
        }
    }

    /// Message with a JSON-encoded payload.
    pub fn json<T: Serialize>(subject: impl Into<String>, body: &T) -> BusResult<Self> {
        Ok(Self::new(subject, serde_json::to_vec(body)?))
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn with_headers(mut self, headers: BusHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> BusResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn status(&self) -> ReplyStatus {
        self.headers.status()
    }

    /// Convert a non-zero status into [`BusError::Remote`].
    pub fn into_result(self) -> BusResult<Self> {
        let status = self.status();
        if status.is_ok() {
            Ok(self)
        } else {
            Err(BusError::Remote {
                code: status.code,
                message: status.message,
            })
        }
    }
}
