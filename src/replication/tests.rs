//! Replication Module Tests
//!
//! Validates the bounded queue semantics and end-to-end delivery against a
//! real HTTP sink bound to an ephemeral port.

#[cfg(test)]
mod tests {
    use crate::cluster::types::NodeInfo;
    use crate::replication::pipeline::{EnqueueError, ReplicationPipeline, ReplicationTask};
    use crate::replication::protocol::{ReplicatePayload, ENDPOINT_REPLICATE};
    use axum::extract::Extension;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn task(dest_addr: &str, key: &str) -> ReplicationTask {
        ReplicationTask {
            dest: NodeInfo {
                id: "dest".to_string(),
                addr: dest_addr.to_string(),
            },
            tenant: "u".to_string(),
            key: key.to_string(),
            value: b"v".to_vec(),
            ttl_secs: 0,
            timestamp: 42,
            attempt: 0,
        }
    }

    /// Spawns a sink that records every replicate payload it receives.
    async fn spawn_sink() -> (SocketAddr, Arc<Mutex<Vec<ReplicatePayload>>>) {
        let received: Arc<Mutex<Vec<ReplicatePayload>>> = Arc::new(Mutex::new(Vec::new()));

        async fn handle(
            Extension(received): Extension<Arc<Mutex<Vec<ReplicatePayload>>>>,
            Json(payload): Json<ReplicatePayload>,
        ) {
            received.lock().await.push(payload);
        }

        let app = Router::new()
            .route(ENDPOINT_REPLICATE, post(handle))
            .layer(Extension(received.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, received)
    }

    // ============================================================
    // QUEUE SEMANTICS
    // ============================================================

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // No workers started: the first task fills the queue.
        let pipeline = ReplicationPipeline::new(1, 1, Duration::from_millis(100), 0);

        assert!(pipeline.enqueue(task("127.0.0.1:1", "k1")).is_ok());
        assert!(matches!(
            pipeline.enqueue(task("127.0.0.1:1", "k2")),
            Err(EnqueueError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_stop_returns_within_deadline() {
        let pipeline = ReplicationPipeline::new(2, 10, Duration::from_millis(100), 0);
        pipeline.start();

        tokio::time::timeout(Duration::from_secs(2), pipeline.stop(Duration::from_secs(1)))
            .await
            .expect("stop must not hang");
    }

    // ============================================================
    // DELIVERY
    // ============================================================

    #[tokio::test]
    async fn test_tasks_are_delivered_to_the_sink() {
        let (addr, received) = spawn_sink().await;

        let pipeline = ReplicationPipeline::new(2, 16, Duration::from_millis(500), 1);
        pipeline.start();

        pipeline.enqueue(task(&addr.to_string(), "k1")).unwrap();
        pipeline.enqueue(task(&addr.to_string(), "k2")).unwrap();

        let mut delivered = Vec::new();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let guard = received.lock().await;
            if guard.len() >= 2 {
                delivered = guard.clone();
                break;
            }
        }

        assert_eq!(delivered.len(), 2, "both tasks must reach the sink");
        let mut keys: Vec<&str> = delivered.iter().map(|p| p.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);
        assert_eq!(delivered[0].user_id, "u");
        assert_eq!(delivered[0].value, b"v");
        assert_eq!(delivered[0].timestamp, 42);

        pipeline.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_unreachable_destination_never_blocks_producers() {
        // Nothing listens on the destination; enqueue must stay instant.
        let pipeline = ReplicationPipeline::new(1, 8, Duration::from_millis(50), 0);
        pipeline.start();

        let started = std::time::Instant::now();
        for i in 0..8 {
            let _ = pipeline.enqueue(task("127.0.0.1:9", &format!("k{}", i)));
        }
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "enqueue must be non-blocking"
        );

        pipeline.stop(Duration::from_secs(1)).await;
    }
}
