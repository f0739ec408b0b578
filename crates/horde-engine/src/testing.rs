use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::error::{HordeError, Operation};
use crate::transport::{
    HttpRequest, HttpResponse, Method, Transport, TransportError, TransportErrorKind,
};

pub(crate) const BASE: &str = "http://horde.test/api/v2";

pub(crate) fn should_skip_httpmock() -> bool {
    if can_bind_localhost() {
        return false;
    }
    eprintln!("skipping httpmock test: sandbox forbids binding to localhost");
    true
}

fn can_bind_localhost() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(err) => panic!("failed to bind localhost for httpmock tests: {err}"),
    }
}

pub(crate) fn json_response(status: u16, body: Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status,
        body: body.to_string().into_bytes(),
    })
}

/// Scripted transport. Each `(method, url)` has a queue of replies; the last
/// reply of a queue repeats once the others are used up.
#[derive(Default)]
pub(crate) struct FakeTransport {
    replies: Mutex<HashMap<(Method, String), VecDeque<Result<HttpResponse, TransportError>>>>,
    requests: Mutex<Vec<HttpRequest>>,
    cancel_on_request: Mutex<Option<(usize, CancelToken)>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(
        &self,
        method: Method,
        url: impl Into<String>,
        reply: Result<HttpResponse, TransportError>,
    ) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry((method, url.into()))
            .or_default()
            .push_back(reply);
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.url).collect()
    }

    /// Flips `token` while the `count`-th request is in flight.
    pub(crate) fn cancel_during_request(&self, count: usize, token: CancelToken) {
        *self.cancel_on_request.lock().unwrap() = Some((count, token));
    }

    pub(crate) fn count(&self, method: Method, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method && request.url == url)
            .count()
    }
}

impl Transport for FakeTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let sent = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some((count, token)) = self.cancel_on_request.lock().unwrap().as_ref() {
            if sent == *count {
                token.cancel();
            }
        }
        let mut replies = self.replies.lock().unwrap();
        let Some(queue) = replies.get_mut(&(request.method, request.url.clone())) else {
            return Err(TransportError::new(
                TransportErrorKind::Request,
                format!("no scripted reply for {:?} {}", request.method, request.url),
            ));
        };
        if queue.len() > 1 {
            return queue.pop_front().unwrap();
        }
        queue.front().cloned().unwrap()
    }
}

/// Virtual clock: sleeping advances time instantly and is recorded.
#[derive(Default)]
pub(crate) struct FakeClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
    cancel_after_sleeps: Mutex<Option<(usize, CancelToken)>>,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    /// Flips `token` while the `count`-th sleep is in progress.
    pub(crate) fn cancel_during_sleep(&self, count: usize, token: CancelToken) {
        *self.cancel_after_sleeps.lock().unwrap() = Some((count, token));
    }
}

impl Clock for FakeClock {
    fn elapsed(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), HordeError> {
        cancel.check(Operation::Wait)?;
        let mut sleeps = self.sleeps.lock().unwrap();
        sleeps.push(duration);
        if let Some((count, token)) = self.cancel_after_sleeps.lock().unwrap().as_ref() {
            if sleeps.len() == *count {
                token.cancel();
            }
        }
        *self.now.lock().unwrap() += duration;
        cancel.check(Operation::Wait)
    }
}
