/*
 * tests.rs
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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::protocol::http::handler::HttpHandler;
use crate::protocol::http::request::Method;
use crate::protocol::http::test_server::{reply, TestServer};

fn manager(settings: HttpSettings) -> HttpConnectionPoolManager {
    HttpConnectionPoolManager::new(Arc::new(settings))
}

async fn ok_server() -> TestServer {
    TestServer::start(|_| reply(200, "OK", &[], b"ok")).await
}

async fn get(manager: &HttpConnectionPoolManager, url: url::Url) -> Result<Response, HttpError> {
    manager.send(Request::new(Method::Get, url), &CancellationToken::new()).await
}

async fn acquire_conn(pool: &Arc<HttpConnectionPool>, cancel: &CancellationToken) -> Result<HttpConnection, HttpError> {
    match pool.acquire(None, cancel).await? {
        Acquired::Connection(conn) => Ok(conn),
        Acquired::Response(r) => panic!("unexpected response {}", r.status),
    }
}

async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn pool_for(manager: &HttpConnectionPoolManager, server: &TestServer) -> Arc<HttpConnectionPool> {
    manager
        .pool_for(&Request::new(Method::Get, server.url("/")))
        .unwrap()
}

#[tokio::test]
async fn keep_alive_connection_is_reused() {
    let server = ok_server().await;
    let manager = manager(HttpSettings::default());
    for _ in 0..3 {
        let response = get(&manager, server.url("/a")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text().await.unwrap(), "ok");
    }
    assert_eq!(server.connections(), 1);
    let pool = pool_for(&manager, &server);
    assert_eq!(pool.connection_count(), 1);
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test]
async fn connection_close_is_not_pooled() {
    let server = TestServer::start(|_| reply(200, "OK", &[("Connection", "close")], b"bye")).await;
    let manager = manager(HttpSettings::default());
    for _ in 0..2 {
        let response = get(&manager, server.url("/")).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "bye");
    }
    assert_eq!(server.connections(), 2);
    assert_eq!(pool_for(&manager, &server).connection_count(), 0);
}

#[tokio::test]
async fn connection_closed_while_idle_is_replaced() {
    let server = TestServer::start_with(true, |_| reply(200, "OK", &[], b"ok")).await;
    let manager = manager(HttpSettings::default());
    let first = get(&manager, server.url("/")).await.unwrap();
    assert_eq!(first.text().await.unwrap(), "ok");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = get(&manager, server.url("/")).await.unwrap();
    assert_eq!(second.text().await.unwrap(), "ok");
    assert_eq!(server.connections(), 2);
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn expired_lifetime_is_not_reused() {
    let server = ok_server().await;
    let manager = manager(HttpSettings {
        pooled_connection_lifetime: Some(Duration::from_millis(50)),
        ..HttpSettings::default()
    });
    get(&manager, server.url("/")).await.unwrap().bytes().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    get(&manager, server.url("/")).await.unwrap().bytes().await.unwrap();
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn idle_timeout_is_not_reused() {
    let server = ok_server().await;
    let manager = manager(HttpSettings {
        pooled_connection_idle_timeout: Some(Duration::from_millis(50)),
        ..HttpSettings::default()
    });
    get(&manager, server.url("/")).await.unwrap().bytes().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    get(&manager, server.url("/")).await.unwrap().bytes().await.unwrap();
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn returned_connection_goes_to_waiters_in_order() {
    let server = ok_server().await;
    let manager = manager(HttpSettings {
        max_connections_per_server: 1,
        ..HttpSettings::default()
    });
    let pool = pool_for(&manager, &server);
    let first = acquire_conn(&pool, &CancellationToken::new()).await.unwrap();
    let id = first.id();

    let order = Arc::new(Mutex::new(Vec::new()));
    let spawn_waiter = |name: &'static str| {
        let pool = pool.clone();
        let order = order.clone();
        tokio::spawn(async move {
            let conn = acquire_conn(&pool, &CancellationToken::new()).await.unwrap();
            order.lock().unwrap().push((name, conn.id()));
            tokio::time::sleep(Duration::from_millis(20)).await;
            conn.return_to_pool();
        })
    };
    let a = spawn_waiter("a");
    wait_for(|| pool.waiter_count() == 1).await;
    let b = spawn_waiter("b");
    wait_for(|| pool.waiter_count() == 2).await;
    assert_eq!(pool.connection_count(), 1);

    first.return_to_pool();
    a.await.unwrap();
    b.await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec![("a", id), ("b", id)]);
    assert_eq!(server.connections(), 1);
    assert_eq!(pool.waiter_count(), 0);
}

#[tokio::test]
async fn cancelled_waiter_is_skipped() {
    let server = ok_server().await;
    let manager = manager(HttpSettings {
        max_connections_per_server: 1,
        ..HttpSettings::default()
    });
    let pool = pool_for(&manager, &server);
    let first = acquire_conn(&pool, &CancellationToken::new()).await.unwrap();
    let id = first.id();

    let cancel = CancellationToken::new();
    let cancelled = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { acquire_conn(&pool, &cancel).await.map(|c| c.id()) })
    };
    wait_for(|| pool.waiter_count() == 1).await;
    let patient = {
        let pool = pool.clone();
        tokio::spawn(async move { acquire_conn(&pool, &CancellationToken::new()).await.map(|c| c.id()) })
    };
    wait_for(|| pool.waiter_count() == 2).await;

    cancel.cancel();
    let err = cancelled.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(pool.waiter_count(), 1);

    first.return_to_pool();
    assert_eq!(patient.await.unwrap().unwrap(), id);
}

#[tokio::test]
async fn disposed_connection_admits_next_waiter() {
    let server = ok_server().await;
    let manager = manager(HttpSettings {
        max_connections_per_server: 1,
        ..HttpSettings::default()
    });
    let pool = pool_for(&manager, &server);
    let first = acquire_conn(&pool, &CancellationToken::new()).await.unwrap();
    let first_id = first.id();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { acquire_conn(&pool, &CancellationToken::new()).await.map(|c| c.id()) })
    };
    wait_for(|| pool.waiter_count() == 1).await;

    drop(first);
    let second_id = waiter.await.unwrap().unwrap();
    assert_ne!(second_id, first_id);
    assert_eq!(server.connections(), 2);
    assert_eq!(pool.waiter_count(), 0);
}

#[tokio::test]
async fn waiter_never_gets_a_connection_closed_by_the_server() {
    let server = TestServer::start_with(true, |_| reply(200, "OK", &[], b"ok")).await;
    let manager = manager(HttpSettings {
        max_connections_per_server: 1,
        ..HttpSettings::default()
    });
    let pool = pool_for(&manager, &server);
    let first = acquire_conn(&pool, &CancellationToken::new()).await.unwrap();
    let response = first
        .send(&Request::new(Method::Get, server.url("/")), &CancellationToken::new())
        .await
        .unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { acquire_conn(&pool, &CancellationToken::new()).await.map(|c| c.is_reused()) })
    };
    wait_for(|| pool.waiter_count() == 1).await;
    // Let the server's close reach the client before the body completes.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(response.text().await.unwrap(), "ok");
    assert!(!waiter.await.unwrap().unwrap());
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn dropped_body_within_drain_budget_keeps_the_connection() {
    let server = TestServer::start(|_| reply(200, "OK", &[], &[b'x'; 300])).await;
    let manager = manager(HttpSettings {
        max_response_drain_size: 1024,
        ..HttpSettings::default()
    });
    let pool = pool_for(&manager, &server);
    drop(get(&manager, server.url("/")).await.unwrap());
    wait_for(|| pool.idle_count() == 1).await;

    let response = get(&manager, server.url("/")).await.unwrap();
    assert_eq!(response.bytes().await.unwrap().len(), 300);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn dropped_body_over_drain_budget_closes_the_connection() {
    let server = TestServer::start(|_| reply(200, "OK", &[], &[b'x'; 64 * 1024])).await;
    let manager = manager(HttpSettings {
        max_response_drain_size: 1024,
        ..HttpSettings::default()
    });
    let pool = pool_for(&manager, &server);
    drop(get(&manager, server.url("/")).await.unwrap());
    wait_for(|| pool.connection_count() == 0).await;
    assert_eq!(pool.idle_count(), 0);

    let response = get(&manager, server.url("/")).await.unwrap();
    assert_eq!(response.bytes().await.unwrap().len(), 64 * 1024);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn request_failing_on_reused_connection_is_retried_once() {
    let answered = Arc::new(AtomicUsize::new(0));
    let server = {
        let answered = answered.clone();
        // The second request finds its connection closed without any response.
        TestServer::start(move |_| match answered.fetch_add(1, Ordering::SeqCst) {
            1 => Vec::new(),
            _ => reply(200, "OK", &[], b"ok"),
        })
        .await
    };
    let manager = manager(HttpSettings::default());
    assert_eq!(get(&manager, server.url("/")).await.unwrap().text().await.unwrap(), "ok");

    let response = get(&manager, server.url("/")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");
    assert_eq!(server.connections(), 2);
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].connection, 0);
    assert_eq!(requests[2].connection, 1);
}

#[tokio::test]
async fn fresh_connection_failure_is_not_retried() {
    let server = TestServer::start(|_| Vec::new()).await;
    let manager = manager(HttpSettings::default());
    let err = get(&manager, server.url("/")).await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn dispose_fails_waiters() {
    let server = ok_server().await;
    let manager = manager(HttpSettings {
        max_connections_per_server: 1,
        ..HttpSettings::default()
    });
    let pool = pool_for(&manager, &server);
    let first = acquire_conn(&pool, &CancellationToken::new()).await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { acquire_conn(&pool, &CancellationToken::new()).await.map(|c| c.id()) })
    };
    wait_for(|| pool.waiter_count() == 1).await;

    pool.dispose();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, HttpError::PoolDisposed));
    first.return_to_pool();
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn cancel_in_flight_releases_the_slot() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });
    let manager = manager(HttpSettings::default());
    let url = url::Url::parse(&format!("http://{}/slow", addr)).unwrap();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
    }
    let err = manager
        .send(Request::new(Method::Get, url.clone()), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    let pool = manager.pool_for(&Request::new(Method::Get, url)).unwrap();
    assert_eq!(pool.connection_count(), 0);
    silent.abort();
}

#[tokio::test]
async fn connect_failure_releases_the_slot() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let manager = manager(HttpSettings::default());
    let url = url::Url::parse(&format!("http://{}/", addr)).unwrap();
    let err = get(&manager, url.clone()).await.unwrap_err();
    assert!(matches!(err, HttpError::Connect { .. }));
    assert_eq!(manager.pool_for(&Request::new(Method::Get, url)).unwrap().connection_count(), 0);
}

#[tokio::test]
async fn equal_keys_share_a_pool() {
    let manager = manager(HttpSettings::default());
    let a = manager
        .pool_for(&Request::get("http://example.test/one").unwrap())
        .unwrap();
    let b = manager
        .pool_for(&Request::get("http://EXAMPLE.test:80/two?q").unwrap())
        .unwrap();
    let c = manager
        .pool_for(&Request::get("http://example.test:8080/").unwrap())
        .unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(manager.pool_count(), 2);
}

#[tokio::test]
async fn cleanup_keeps_pools_with_connections() {
    let server = ok_server().await;
    let manager = manager(HttpSettings::default());
    get(&manager, server.url("/")).await.unwrap().bytes().await.unwrap();
    manager.cleanup();
    manager.cleanup();
    assert_eq!(manager.pool_count(), 1);
    assert_eq!(pool_for(&manager, &server).idle_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reaper_removes_unused_pools_and_stops() {
    let manager = manager(HttpSettings {
        pooled_connection_idle_timeout: Some(Duration::from_secs(4)),
        ..HttpSettings::default()
    });
    let request = Request::get("http://idle.test/").unwrap();
    drop(manager.pool_for(&request).unwrap());
    assert!(manager.reaper_running());
    assert_eq!(manager.pool_count(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(manager.pool_count(), 0);
    assert!(!manager.reaper_running());

    drop(manager.pool_for(&request).unwrap());
    assert!(manager.reaper_running());
}
