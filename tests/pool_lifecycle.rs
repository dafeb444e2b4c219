//! End-to-end lifecycle tests against real loopback servers.

use std::time::Duration;

use bytes::Bytes;
use rpc_pool::{ConnectionManager, Endpoint, ManagerConfig, PoolError};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::sleep;

fn test_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_worker_count(2)
        .with_retry_delay(Duration::from_millis(50))
        .with_connect_timeout(Duration::from_secs(1))
}

/// Accepts connections, holds them open, and forwards every received chunk.
async fn sink_server() -> (std::net::SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let _ = tx.send(buf[..n].to_vec());
                        }
                    }
                }
            });
        }
    });
    (addr, rx)
}

async fn converge_to(manager: &ConnectionManager, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while manager.snapshot().len() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "pool did not converge to {expected} connections"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_pool_lifecycle() {
    let (addr_a, mut received_a) = sink_server().await;
    let (addr_b, _received_b) = sink_server().await;
    let endpoint_a: Endpoint = format!("127.0.0.1:{}", addr_a.port()).parse().unwrap();
    let endpoint_b: Endpoint = format!("127.0.0.1:{}", addr_b.port()).parse().unwrap();

    let manager = ConnectionManager::new(test_config());

    // A consumer blocked before any connection exists must wake on the
    // first successful registration.
    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager.wait_for_available().await;
        })
    };

    manager.connect([endpoint_a.to_string()]).unwrap();
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter did not wake after first upsert")
        .unwrap();

    let handle = manager.snapshot().remove(0);
    assert_eq!(*handle.endpoint(), endpoint_a);
    assert!(handle.is_active());
    assert_eq!(handle.remote_addr(), Some(addr_a));

    // Payloads flow through to the server untouched.
    handle.send(Bytes::from_static(b"framed-request")).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(2), received_a.recv())
        .await
        .expect("server saw no payload")
        .unwrap();
    assert_eq!(received, b"framed-request");

    // Growing the desired set adds without disturbing the existing handle.
    manager
        .reconcile([endpoint_a.to_string(), endpoint_b.to_string()])
        .unwrap();
    converge_to(&manager, 2).await;
    assert!(manager.registry().contains(&endpoint_a));
    assert!(manager.registry().contains(&endpoint_b));
    assert!(!handle.is_closed());

    // Shrinking evicts and closes exactly the dropped endpoint.
    let report = manager.reconcile([endpoint_b.to_string()]).unwrap();
    assert_eq!(report.removed, vec![endpoint_a.clone()]);
    assert!(handle.is_closed());
    converge_to(&manager, 1).await;
    assert!(manager.registry().contains(&endpoint_b));

    // An empty desired set means drop everything.
    let survivor = manager.snapshot().remove(0);
    manager.reconcile(Vec::<String>::new()).unwrap();
    assert!(manager.registry().is_empty());
    assert!(survivor.is_closed());

    manager.shutdown();
    assert!(matches!(
        manager.reconcile([endpoint_b.to_string()]),
        Err(PoolError::Shutdown)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_all_waiters_wake_on_first_connection() {
    let (addr, _received) = sink_server().await;
    let manager = ConnectionManager::new(test_config());

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager.wait_for_available().await;
                manager.snapshot().len()
            })
        })
        .collect();

    // Give the waiters time to suspend first.
    sleep(Duration::from_millis(20)).await;

    manager
        .reconcile([format!("127.0.0.1:{}", addr.port())])
        .unwrap();

    for waiter in waiters {
        let seen = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter did not wake")
            .unwrap();
        assert!(seen >= 1);
    }

    manager.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clones_share_one_pool() {
    let (addr, _received) = sink_server().await;
    let manager = ConnectionManager::new(test_config());
    let clone = manager.clone();

    manager
        .reconcile([format!("127.0.0.1:{}", addr.port())])
        .unwrap();
    converge_to(&clone, 1).await;

    clone.shutdown();
    assert!(manager.is_shut_down());
    assert!(manager.registry().is_empty());
}
