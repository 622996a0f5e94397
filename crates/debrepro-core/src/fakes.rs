//! In-memory page source (testing only)
//!
//! `StaticPages` satisfies the [`PageSource`] contract from a URL map and
//! records every request.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::http::{HttpError, PageSource};

#[derive(Debug, Clone)]
enum Response {
    Body(String),
    Status(u16),
    Timeout,
}

/// URL-keyed canned responses. Unknown URLs answer HTTP 404.
#[derive(Debug, Default)]
pub struct StaticPages {
    pages: HashMap<String, Response>,
    requests: Mutex<Vec<String>>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, body: &str) -> Self {
        self.pages
            .insert(url.to_string(), Response::Body(body.to_string()));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.pages.insert(url.to_string(), Response::Status(status));
        self
    }

    pub fn with_timeout(mut self, url: &str) -> Self {
        self.pages.insert(url.to_string(), Response::Timeout);
        self
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for StaticPages {
    async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.pages.get(url) {
            Some(Response::Body(body)) => Ok(body.clone()),
            Some(Response::Status(status)) => Err(HttpError::Status {
                url: url.to_string(),
                status: *status,
            }),
            Some(Response::Timeout) => Err(HttpError::Timeout {
                url: url.to_string(),
            }),
            None => Err(HttpError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
