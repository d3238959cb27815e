use async_trait::async_trait;
use bridge_desktop::FsCacheStorage;
use bridge_traits::{
    error::Result as BridgeResult, HttpClient, HttpMethod, HttpRequest, HttpResponse,
    NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkType,
};
use core_cache::{CacheClass, CacheConfig, InvalidationScope};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, Receiver, SyncEvent};
use core_service::{CoreError, OfflineCore};
use core_sync::{SyncConfig, SyncRequest};
use mockall::mock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mock! {
    Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

/// Monitor with fixed connectivity that never reports changes.
struct FixedMonitor {
    connected: bool,
}

struct SilentChanges;

#[async_trait]
impl NetworkChangeStream for SilentChanges {
    async fn next(&mut self) -> Option<NetworkInfo> {
        std::future::pending().await
    }
}

#[async_trait]
impl NetworkMonitor for FixedMonitor {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(if self.connected {
            NetworkInfo::connected(NetworkType::Ethernet)
        } else {
            NetworkInfo::disconnected()
        })
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(SilentChanges))
    }
}

fn config(dir: &Path, http: MockHttp, connected: bool) -> CoreConfig {
    CoreConfig::builder()
        .database_path(dir.join("offline.db"))
        .cache_dir(dir.join("cache"))
        .http_client(Arc::new(http))
        .cache_storage(Arc::new(FsCacheStorage::new(dir.join("cache"))))
        .network_monitor(Arc::new(FixedMonitor { connected }))
        .build()
        .unwrap()
}

fn fast_retries() -> SyncConfig {
    SyncConfig::default().with_base_delay(Duration::from_millis(10))
}

async fn wait_for_sync_event<F>(events: &mut Receiver<CoreEvent>, predicate: F) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(CoreEvent::Sync(event)) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for sync event")
}

#[tokio::test]
async fn test_reads_are_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = MockHttp::new();
    http.expect_execute()
        .withf(|request| request.method == HttpMethod::Get)
        .times(1)
        .returning(|_| Ok(HttpResponse::new(200, "body{margin:0}")));

    let core = OfflineCore::bootstrap(config(dir.path(), http, true))
        .await
        .unwrap();

    for _ in 0..2 {
        let response = core
            .handle_request(HttpRequest::get("/assets/site.9c1d2e3f.css"))
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"body{margin:0}");
    }

    let stats = core.get_cache_stats(CacheClass::Static);
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.total_size, 14);

    assert_eq!(
        core.invalidate_by_type(InvalidationScope::All).await.unwrap(),
        1
    );
    assert!(core.get_all_stats().iter().all(|s| s.entry_count == 0));

    core.shutdown().await;
}

#[tokio::test]
async fn test_failing_write_is_abandoned_and_announced() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = MockHttp::new();
    http.expect_execute()
        .withf(|request| request.method == HttpMethod::Post && request.url == "/api/posts")
        .times(3)
        .returning(|_| Ok(HttpResponse::new(500, "boom")));

    let core = OfflineCore::bootstrap_with(
        config(dir.path(), http, true),
        CacheConfig::default(),
        fast_retries(),
    )
    .await
    .unwrap();
    let mut events = core.subscribe_events();

    let id = core
        .register(SyncRequest::post("/api/posts").body(r#"{"title":"Draft"}"#))
        .await
        .unwrap();

    match wait_for_sync_event(&mut events, |e| {
        matches!(e, SyncEvent::OperationAbandoned { .. })
    })
    .await
    {
        SyncEvent::OperationAbandoned { operation, error } => {
            assert_eq!(operation.id, id.to_string());
            assert_eq!(operation.retry_count, 3);
            assert_eq!(error, "HTTP 500");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    assert!(core.pending_operations().await.unwrap().is_empty());
    core.shutdown().await;
}

#[tokio::test]
async fn test_writes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    // Offline: nothing is attempted
    let mut offline_http = MockHttp::new();
    offline_http.expect_execute().never();
    let core = OfflineCore::bootstrap(config(dir.path(), offline_http, false))
        .await
        .unwrap();
    let id = core
        .register(SyncRequest::post("/api/comments").body("{}"))
        .await
        .unwrap();
    assert_eq!(core.pending_operations().await.unwrap().len(), 1);
    core.shutdown().await;
    drop(core);

    let mut online_http = MockHttp::new();
    online_http
        .expect_execute()
        .withf(|request| request.url == "/api/comments")
        .times(1)
        .returning(|_| Ok(HttpResponse::new(201, "")));
    let core = OfflineCore::bootstrap(config(dir.path(), online_http, true))
        .await
        .unwrap();
    let mut events = core.subscribe_events();

    let pending = core.pending_operations().await.unwrap();
    if !pending.is_empty() {
        assert_eq!(pending[0].id, id);
        wait_for_sync_event(&mut events, |e| {
            matches!(e, SyncEvent::OperationSucceeded { .. })
        })
        .await;
    }
    assert!(core.pending_operations().await.unwrap().is_empty());

    core.shutdown().await;
}

#[tokio::test]
async fn test_clear_all_drops_pending_writes() {
    let dir = tempfile::tempdir().unwrap();
    let mut http = MockHttp::new();
    http.expect_execute().never();

    let core = OfflineCore::bootstrap(config(dir.path(), http, false))
        .await
        .unwrap();
    core.register(SyncRequest::post("/api/a")).await.unwrap();
    core.register(SyncRequest::post("/api/b")).await.unwrap();

    assert_eq!(core.clear_all().await.unwrap(), 2);
    assert_eq!(core.retry_failed().await.unwrap(), 0);
    assert!(core.pending_operations().await.unwrap().is_empty());

    core.shutdown().await;
}

#[tokio::test]
async fn test_invalid_cache_config_fails_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let result = OfflineCore::bootstrap_with(
        config(dir.path(), MockHttp::new(), true),
        CacheConfig::default().with_eviction_percentage(0.0),
        SyncConfig::default(),
    )
    .await;

    assert!(matches!(result, Err(CoreError::Cache(_))));
}

#[test]
fn test_missing_capability_maps_to_core_error() {
    let error = CoreError::from(core_runtime::Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "not provided".to_string(),
    });
    assert!(matches!(
        error,
        CoreError::CapabilityMissing { ref capability, .. } if capability == "HttpClient"
    ));

    let error = CoreError::from(core_runtime::Error::Config("bad".to_string()));
    assert!(matches!(error, CoreError::Runtime(_)));
}
