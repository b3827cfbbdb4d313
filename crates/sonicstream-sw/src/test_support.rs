//! In-memory network for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::error::{Result, ServiceWorkerError};
use crate::fetch::{Fetcher, Request, Response, ResponseSource};

/// Serves `body = URL` with 200 for known URLs, 404 otherwise, and fails
/// URLs marked unreachable. Records every call.
#[derive(Default)]
pub struct MockNetwork {
    known: HashSet<String>,
    statuses: HashMap<String, u16>,
    unreachable: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockNetwork {
    pub fn serving<S: AsRef<str>>(urls: &[S]) -> Self {
        Self {
            known: urls.iter().map(|u| u.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.statuses.insert(url.to_string(), status);
        self
    }

    pub fn unreachable(self, url: &str) -> Self {
        self.set_unreachable(url);
        self
    }

    /// Take `url` offline for subsequent fetches.
    pub fn set_unreachable(&self, url: &str) {
        self.unreachable.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());

        if self.unreachable.lock().unwrap().contains(&url) {
            return Err(ServiceWorkerError::Network(format!("connection refused: {url}")));
        }

        let status = match self.statuses.get(&url) {
            Some(status) => *status,
            None if self.known.contains(&url) => 200,
            None => 404,
        };

        let mut headers = HeaderMap::new();
        headers.insert("x-served-by", HeaderValue::from_static("mock"));

        Ok(Response {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: Bytes::from(url),
            url: request.url.clone(),
            source: ResponseSource::Network,
        })
    }
}
