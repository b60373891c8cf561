use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::download::RawDownload;
use crate::error::Result;

/// How the body of a response is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Await the whole body and parse it as JSON.
    Json,
    /// Return headers plus an open byte stream; nothing is buffered.
    Stream,
}

/// One API call: method, path relative to the base URL, query, body and
/// how the response should be delivered.
///
/// Built per call by the resource handles and never mutated once dispatched.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<Value>,
    pub(crate) mode: ResponseMode,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            mode: ResponseMode::Json,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json_body<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Switch the descriptor to stream mode.
    pub fn streaming(mut self) -> Self {
        self.mode = ResponseMode::Stream;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }
}

/// Result of [`Client::request`](crate::Client::request), shaped by the
/// descriptor's [`ResponseMode`].
#[derive(Debug)]
pub enum ApiResponse {
    Json(Value),
    Stream(RawDownload),
}

impl ApiResponse {
    pub fn into_json(self) -> Option<Value> {
        match self {
            ApiResponse::Json(v) => Some(v),
            ApiResponse::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<RawDownload> {
        match self {
            ApiResponse::Stream(raw) => Some(raw),
            ApiResponse::Json(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_defaults_to_json_mode() {
        let d = RequestDescriptor::get("/user/org1")
            .query("search", "bob")
            .query("limit", 25);
        assert_eq!(d.mode(), ResponseMode::Json);
        assert_eq!(d.method(), &Method::GET);
        assert_eq!(
            d.query,
            vec![
                ("search".to_string(), "bob".to_string()),
                ("limit".to_string(), "25".to_string())
            ]
        );
        assert!(d.body.is_none());
    }

    #[test]
    fn streaming_and_body() {
        let d = RequestDescriptor::post("/user/org1/multi")
            .json_body(&json!([{"name": "a"}]))
            .unwrap()
            .streaming();
        assert_eq!(d.mode(), ResponseMode::Stream);
        assert_eq!(d.body, Some(json!([{"name": "a"}])));
    }
}
