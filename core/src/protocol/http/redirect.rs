/*
 * redirect.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Poolwire, a pooled HTTP/1.1 client transport.
 *
 * Poolwire is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Poolwire is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Poolwire.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Automatic redirects.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::HttpError;
use crate::protocol::http::handler::HttpHandler;
use crate::protocol::http::request::{Method, Request};
use crate::protocol::http::response::Response;
use crate::uri;

/// Follows 301/302/303/307/308 responses that carry a usable `Location`.
///
/// The last response is returned unchanged when the hop limit is reached, when the
/// location is missing or unparseable, or when it would downgrade https to http.
pub struct RedirectHandler {
    inner: Arc<dyn HttpHandler>,
    max_redirects: usize,
}

impl RedirectHandler {
    pub fn new(inner: Arc<dyn HttpHandler>, max_redirects: usize) -> Self {
        Self { inner, max_redirects }
    }
}

fn redirect_target(request_url: &Url, response: &Response) -> Option<Url> {
    if !response.is_redirect() {
        return None;
    }
    let location = response.headers.get("Location")?;
    let target = match uri::resolve_redirect(request_url, location) {
        Some(t) => t,
        None => {
            debug!(location, "ignoring redirect to unsupported location");
            return None;
        }
    };
    if request_url.scheme() == "https" && target.scheme() == "http" {
        debug!(location = %target, "refusing redirect from https to http");
        return None;
    }
    Some(target)
}

/// 301/302 turn POST into GET; 303 turns everything but GET and HEAD into GET.
fn needs_get(method: Method, status: u16) -> bool {
    match status {
        301 | 302 => method == Method::Post,
        303 => !matches!(method, Method::Get | Method::Head),
        _ => false,
    }
}

#[async_trait]
impl HttpHandler for RedirectHandler {
    async fn send(&self, mut request: Request, cancel: &CancellationToken) -> Result<Response, HttpError> {
        let mut response = self.inner.send(request.clone(), cancel).await?;
        let mut hops = 0;
        while let Some(target) = redirect_target(&request.url, &response) {
            hops += 1;
            if hops > self.max_redirects {
                debug!(max = self.max_redirects, "too many redirects, returning last response");
                break;
            }
            debug!(status = response.status, from = %request.url, to = %target, "following redirect");
            if needs_get(request.method, response.status) {
                request.method = Method::Get;
                request.clear_content();
            }
            request.headers.remove("Authorization");
            request.url = target;
            drop(response);
            response = self.inner.send(request.clone(), cancel).await?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Answers from a script, recording every request it sees.
    struct Scripted {
        seen: Mutex<Vec<(Method, String, bool, bool)>>,
        answer: Box<dyn Fn(&Request) -> Response + Send + Sync>,
    }

    #[async_trait]
    impl HttpHandler for Scripted {
        async fn send(&self, request: Request, _cancel: &CancellationToken) -> Result<Response, HttpError> {
            self.seen.lock().unwrap().push((
                request.method,
                request.url.to_string(),
                request.body.is_some(),
                request.headers.contains("Authorization"),
            ));
            Ok((self.answer)(&request))
        }
    }

    fn redirect(status: u16, url: &Url, location: &str) -> Response {
        let mut r = Response::new(status, url.clone(), "");
        r.headers.insert("Location", location);
        r
    }

    fn scripted(answer: impl Fn(&Request) -> Response + Send + Sync + 'static) -> Arc<Scripted> {
        Arc::new(Scripted {
            seen: Mutex::new(Vec::new()),
            answer: Box::new(answer),
        })
    }

    #[tokio::test]
    async fn found_turns_post_into_get() {
        let inner = scripted(|req| match req.url.path() {
            "/form" => redirect(302, &req.url, "/done"),
            _ => Response::new(200, req.url.clone(), "done"),
        });
        let handler = RedirectHandler::new(inner.clone(), 50);
        let mut request = Request::post("http://h.test/form", "a=1").unwrap();
        request.header("Authorization", "Basic eA==");
        let response = handler.send(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, 200);
        let seen = inner.seen.lock().unwrap();
        assert_eq!(seen[0], (Method::Post, "http://h.test/form".to_string(), true, true));
        assert_eq!(seen[1], (Method::Get, "http://h.test/done".to_string(), false, false));
    }

    #[tokio::test]
    async fn temporary_redirect_keeps_method_and_body() {
        let inner = scripted(|req| match req.url.path() {
            "/a" => redirect(307, &req.url, "http://other.test/b"),
            _ => Response::new(201, req.url.clone(), ""),
        });
        let handler = RedirectHandler::new(inner.clone(), 50);
        let request = Request::post("http://h.test/a", "payload").unwrap();
        let response = handler.send(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.url.as_str(), "http://other.test/b");
        let seen = inner.seen.lock().unwrap();
        assert_eq!(seen[1], (Method::Post, "http://other.test/b".to_string(), true, false));
    }

    #[test]
    fn see_other_turns_put_into_get() {
        assert!(needs_get(Method::Put, 303));
        assert!(!needs_get(Method::Head, 303));
        assert!(!needs_get(Method::Put, 301));
        assert!(!needs_get(Method::Post, 308));
        assert!(!needs_get(Method::Post, 300));
    }

    #[tokio::test]
    async fn hop_limit_returns_last_redirect() {
        let inner = scripted(|req| redirect(302, &req.url, "/again"));
        let handler = RedirectHandler::new(inner.clone(), 3);
        let response = handler
            .send(Request::get("http://h.test/").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 302);
        assert_eq!(inner.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn https_to_http_is_not_followed() {
        let inner = scripted(|req| redirect(308, &req.url, "http://plain.test/"));
        let handler = RedirectHandler::new(inner.clone(), 50);
        let response = handler
            .send(Request::get("https://h.test/").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 308);
        assert_eq!(inner.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multiple_choices_is_not_followed() {
        let inner = scripted(|req| redirect(300, &req.url, "/choice"));
        let handler = RedirectHandler::new(inner.clone(), 50);
        let response = handler
            .send(Request::post("http://h.test/", "a=1").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 300);
        assert_eq!(inner.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fragment_is_carried_forward() {
        let inner = scripted(|req| match req.url.path() {
            "/a" => redirect(301, &req.url, "/b"),
            _ => Response::new(200, req.url.clone(), ""),
        });
        let handler = RedirectHandler::new(inner, 50);
        let response = handler
            .send(Request::get("http://h.test/a#top").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.url.as_str(), "http://h.test/b#top");
    }
}
