/*
 * mod.rs
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

//! Answering 401 and 407 challenges.
//!
//! Basic and Digest are request-level: the request is resent with an authorization header,
//! on whatever connection the pool hands out. NTLM and Negotiate authenticate a connection,
//! so their legs all run on one connection, below the retry loop.
//!
//! A challenge that cannot be answered (no credential, unsupported algorithm, failing
//! security context) is not an error: the 401/407 response is returned as is.

mod basic;
mod challenge;
mod credentials;
mod digest;
mod negotiate;

pub use challenge::AuthScheme;
pub use credentials::{Credential, CredentialCache, Credentials};
pub use negotiate::{AuthError, SecurityContext, SecurityContextProvider};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::HttpError;
use crate::protocol::http::connection::{HttpConnection, SendError};
use crate::protocol::http::handler::HttpHandler;
use crate::protocol::http::pool::{ConnectionKind, HttpConnectionPool, HttpConnectionPoolManager};
use crate::protocol::http::request::Request;
use crate::protocol::http::response::Response;
use crate::uri;

use challenge::{challenge_payload, is_challenge, repeated_challenge, select_challenge, AuthTarget};
use digest::DigestChallenge;
use negotiate::{decode_payload, encode_token, service_principal_name};

/// Stage that answers server challenges. Sits directly above the pool manager.
pub struct AuthenticationHandler {
    manager: Arc<HttpConnectionPoolManager>,
}

impl AuthenticationHandler {
    pub fn new(manager: Arc<HttpConnectionPoolManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl HttpHandler for AuthenticationHandler {
    async fn send(&self, mut request: Request, cancel: &CancellationToken) -> Result<Response, HttpError> {
        let pool = self.manager.pool_for(&request)?;
        send_with_request_auth(&pool, &mut request, cancel).await
    }
}

/// Send with origin-server authentication, if credentials are configured.
pub(crate) async fn send_with_request_auth(
    pool: &Arc<HttpConnectionPool>,
    request: &mut Request,
    cancel: &CancellationToken,
) -> Result<Response, HttpError> {
    let settings = pool.settings().clone();
    let credentials = match &settings.credentials {
        Some(c) => c.clone(),
        None => return pool.send(request, true, cancel).await,
    };
    let auth_uri = request.url.clone();
    send_with_auth(
        &ThroughProxyAuth,
        pool,
        request,
        AuthTarget::Server,
        &auth_uri,
        credentials.as_ref(),
        settings.pre_authenticate,
        true,
        cancel,
    )
    .await
}

/// Send with proxy authentication. Only called for pools that talk to a proxy with credentials.
pub(crate) async fn send_with_proxy_auth(
    pool: &Arc<HttpConnectionPool>,
    request: &mut Request,
    do_request_auth: bool,
    cancel: &CancellationToken,
) -> Result<Response, HttpError> {
    let (credentials, proxy_uri) = match (pool.proxy_credentials(), &pool.key().proxy_uri) {
        (Some(c), Some(u)) => (c.clone(), u.clone()),
        _ => return pool.send_with_retry(request, do_request_auth, cancel).await,
    };
    send_with_auth(
        &WithRetry,
        pool,
        request,
        AuthTarget::Proxy,
        &proxy_uri,
        credentials.as_ref(),
        false,
        do_request_auth,
        cancel,
    )
    .await
}

/// Sends a request for one round of a request-level challenge.
trait RequestSender: Sync {
    fn send_request<'a>(
        &'a self,
        pool: &'a Arc<HttpConnectionPool>,
        request: &'a mut Request,
        do_request_auth: bool,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<Response, HttpError>> + Send + 'a;
}

/// Server rounds go through the pool's proxy authentication.
struct ThroughProxyAuth;

impl RequestSender for ThroughProxyAuth {
    fn send_request<'a>(
        &'a self,
        pool: &'a Arc<HttpConnectionPool>,
        request: &'a mut Request,
        do_request_auth: bool,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<Response, HttpError>> + Send + 'a {
        pool.send(request, do_request_auth, cancel)
    }
}

/// Proxy rounds go straight to the retry loop.
struct WithRetry;

impl RequestSender for WithRetry {
    fn send_request<'a>(
        &'a self,
        pool: &'a Arc<HttpConnectionPool>,
        request: &'a mut Request,
        do_request_auth: bool,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<Response, HttpError>> + Send + 'a {
        pool.send_with_retry(request, do_request_auth, cancel)
    }
}

fn set_basic(request: &mut Request, target: AuthTarget, credential: &Credential) {
    request.headers.insert(
        target.authorization_header(),
        format!("Basic {}", basic::basic_token(credential)),
    );
}

fn set_digest(request: &mut Request, target: AuthTarget, credential: &Credential, challenge: &DigestChallenge) -> bool {
    let digest_uri = uri::origin_form(&request.url);
    match digest::digest_token(
        credential,
        challenge,
        request.method.as_str(),
        &digest_uri,
        request.body.as_deref(),
    ) {
        Some(token) => {
            request
                .headers
                .insert(target.authorization_header(), format!("Digest {}", token));
            true
        }
        None => {
            debug!("digest challenge cannot be answered");
            false
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_with_auth<S: RequestSender>(
    sender: &S,
    pool: &Arc<HttpConnectionPool>,
    request: &mut Request,
    target: AuthTarget,
    auth_uri: &Url,
    credentials: &dyn Credentials,
    preauthenticate: bool,
    do_request_auth: bool,
    cancel: &CancellationToken,
) -> Result<Response, HttpError> {
    let mut performed_preauth = false;
    if preauthenticate {
        let cached = pool.preauth().lookup(auth_uri, AuthScheme::Basic).cloned();
        if let Some(credential) = cached {
            set_basic(request, target, &credential);
            performed_preauth = true;
        }
    }

    let mut response = sender.send_request(pool, request, do_request_auth, cancel).await?;

    let connection_auth = pool.settings().security_context_provider.is_some();
    let challenge = match select_challenge(&response, target, auth_uri, credentials, connection_auth) {
        Some(c) => c,
        None => return Ok(response),
    };
    debug!(scheme = challenge.scheme.name(), status = response.status, "answering authentication challenge");

    match challenge.scheme {
        AuthScheme::Digest => {
            let digest = DigestChallenge::parse(&challenge.payload);
            if set_digest(request, target, &challenge.credential, &digest) {
                drop(response);
                response = sender.send_request(pool, request, do_request_auth, cancel).await?;
                if let Some(payload) = repeated_challenge(&response, target, AuthScheme::Digest) {
                    let digest = DigestChallenge::parse(&payload);
                    if digest.is_stale() && set_digest(request, target, &challenge.credential, &digest) {
                        debug!("digest nonce was stale, retrying with the new nonce");
                        drop(response);
                        response = sender.send_request(pool, request, do_request_auth, cancel).await?;
                    }
                }
            }
        }
        AuthScheme::Basic => {
            if performed_preauth {
                debug!("pre-authentication credential rejected");
                return Ok(response);
            }
            set_basic(request, target, &challenge.credential);
            drop(response);
            response = sender.send_request(pool, request, do_request_auth, cancel).await?;
            if preauthenticate && !is_challenge(&response, target) {
                pool.preauth()
                    .add(auth_uri, AuthScheme::Basic, challenge.credential.clone());
            }
        }
        // Already handled on the connection.
        AuthScheme::Negotiate | AuthScheme::Ntlm => {}
    }
    Ok(response)
}

/// Sends one leg of a connection-based handshake.
trait LegSender: Sync {
    fn send_leg<'a>(
        &'a self,
        conn: HttpConnection,
        request: &'a mut Request,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<Response, SendError>> + Send + 'a;
}

/// Straight onto the connection.
struct DirectLeg;

impl LegSender for DirectLeg {
    fn send_leg<'a>(
        &'a self,
        conn: HttpConnection,
        request: &'a mut Request,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<Response, SendError>> + Send + 'a {
        conn.send_retryable(request, cancel)
    }
}

/// Through the proxy handshake of the connection's pool, if it has one.
struct ProxyAwareLeg<'p> {
    pool: &'p Arc<HttpConnectionPool>,
}

impl LegSender for ProxyAwareLeg<'_> {
    fn send_leg<'a>(
        &'a self,
        conn: HttpConnection,
        request: &'a mut Request,
        cancel: &'a CancellationToken,
    ) -> impl Future<Output = Result<Response, SendError>> + Send + 'a {
        self.pool.send_with_nt_proxy_auth(conn, request, cancel)
    }
}

/// Run a server NTLM/Negotiate handshake on `conn` if the server asks for one.
pub(crate) async fn send_with_nt_connection_auth(
    pool: &Arc<HttpConnectionPool>,
    conn: HttpConnection,
    request: &mut Request,
    cancel: &CancellationToken,
) -> Result<Response, SendError> {
    let settings = pool.settings().clone();
    let (credentials, provider) = match (&settings.credentials, &settings.security_context_provider) {
        (Some(c), Some(p)) => (c.clone(), p.clone()),
        _ => return pool.send_with_nt_proxy_auth(conn, request, cancel).await,
    };
    let auth_uri = request.url.clone();
    let leg = ProxyAwareLeg { pool };
    nt_handshake(
        &leg,
        pool,
        conn,
        request,
        AuthTarget::Server,
        &auth_uri,
        credentials.as_ref(),
        provider.as_ref(),
        cancel,
    )
    .await
}

/// Run a proxy NTLM/Negotiate handshake on `conn` if the proxy asks for one.
pub(crate) async fn send_with_nt_proxy_auth(
    pool: &Arc<HttpConnectionPool>,
    conn: HttpConnection,
    request: &mut Request,
    cancel: &CancellationToken,
) -> Result<Response, SendError> {
    let provider = pool.settings().security_context_provider.clone();
    let (credentials, provider, proxy_uri) = match (pool.proxy_credentials(), provider, &pool.key().proxy_uri) {
        (Some(c), Some(p), Some(u)) => (c.clone(), p, u.clone()),
        _ => return conn.send_retryable(request, cancel).await,
    };
    nt_handshake(
        &DirectLeg,
        pool,
        conn,
        request,
        AuthTarget::Proxy,
        &proxy_uri,
        credentials.as_ref(),
        provider.as_ref(),
        cancel,
    )
    .await
}

fn proxy_supports_connection_auth(response: &Response) -> bool {
    response
        .headers
        .has_token("Proxy-Support", "Session-Based-Authentication")
}

/// Get the connection of `response` back for the next leg: drained if the server keeps
/// it open, replaced in the same pool slot if the server is closing it.
async fn reclaim_connection(
    pool: &Arc<HttpConnectionPool>,
    response: Response,
    user_agent: Option<&str>,
    cancel: &CancellationToken,
) -> Result<HttpConnection, HttpError> {
    if response.body.connection_will_close() {
        match response.body.detach_connection() {
            Some(old) => pool.replace_connection(old, user_agent, cancel).await,
            None => Err(HttpError::ConnectionNotReusable),
        }
    } else {
        response.body.reclaim_connection().await
    }
}

#[allow(clippy::too_many_arguments)]
async fn nt_handshake<L: LegSender>(
    leg: &L,
    pool: &Arc<HttpConnectionPool>,
    conn: HttpConnection,
    request: &mut Request,
    target: AuthTarget,
    auth_uri: &Url,
    credentials: &dyn Credentials,
    provider: &dyn SecurityContextProvider,
    cancel: &CancellationToken,
) -> Result<Response, SendError> {
    let mut response = leg.send_leg(conn, request, cancel).await?;

    if target == AuthTarget::Server
        && pool.key().kind == ConnectionKind::Proxy
        && !proxy_supports_connection_auth(&response)
    {
        return Ok(response);
    }
    let challenge = match select_challenge(&response, target, auth_uri, credentials, true) {
        Some(c) if c.scheme.is_connection_based() => c,
        _ => return Ok(response),
    };
    let spn = service_principal_name(auth_uri);
    let mut context = match provider.create_context(challenge.scheme, &challenge.credential, &spn) {
        Some(c) => c,
        None => return Ok(response),
    };
    debug!(scheme = challenge.scheme.name(), spn = %spn, "starting connection authentication");

    let user_agent = request.headers.get("User-Agent").map(str::to_string);
    let mut payload = challenge.payload.clone();
    loop {
        let token = match decode_payload(&payload).and_then(|incoming| context.next_token(incoming.as_deref())) {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(response),
            Err(e) => {
                debug!(error = %e, "security context failed, returning challenge");
                return Ok(response);
            }
        };
        let conn = reclaim_connection(pool, response, user_agent.as_deref(), cancel).await?;
        request
            .headers
            .insert(target.authorization_header(), encode_token(challenge.scheme, &token));
        response = leg
            .send_leg(conn, request, cancel)
            .await
            .map_err(|e| SendError {
                error: e.error,
                can_retry: false,
            })?;

        if context.is_complete() {
            break;
        }
        let next = match challenge_payload(&response.headers, target, challenge.scheme) {
            Some(p) => p.to_string(),
            None => break,
        };
        if !is_challenge(&response, target) {
            // Final token from the server (mutual authentication): it must validate.
            if let Err(e) = decode_payload(&next).and_then(|incoming| context.next_token(incoming.as_deref())) {
                return Err(HttpError::Authentication(e.to_string()).into());
            }
            break;
        }
        payload = next;
    }
    Ok(response)
}
