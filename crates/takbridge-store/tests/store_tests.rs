use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use takbridge_core::FileTransferError;
use takbridge_cot::{DetailItem, Event, FileShare, Point};
use takbridge_store::{CotStore, FileFetcher, StoreOptions};

struct StaticFetcher {
    body: &'static [u8],
    calls: AtomicUsize,
}

#[async_trait]
impl FileFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<Bytes, FileTransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(self.body))
    }
}

struct FailingFetcher;

#[async_trait]
impl FileFetcher for FailingFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FileTransferError> {
        Err(FileTransferError::HttpStatus {
            url: url.to_string(),
            status: 404,
        })
    }
}

fn event(uid: &str, stale_in: ChronoDuration) -> Event {
    Event::new(uid, "a-f-G", "m-g", Point::new(10.0, 20.0), Utc::now() + stale_in)
}

fn fileshare_event(uid: &str, stale_in: ChronoDuration) -> Event {
    event(uid, stale_in).with_detail(DetailItem::FileShare(FileShare {
        filename: "photo.jpg".to_string(),
        name: Some("photo".to_string()),
        sender_url: "https://10.0.0.5:8443/Marti/sync/content?hash=abc".to_string(),
        size_in_bytes: Some(5),
        sha256: None,
        sender_uid: Some("ANDROID-1".to_string()),
        sender_callsign: Some("Alpha".to_string()),
    }))
}

#[tokio::test]
async fn test_stale_record_expires_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let store = CotStore::open(StoreOptions::new(dir.path().join("db"), dir.path().join("dl"))).unwrap();

    let put_at = Utc::now();
    store.put(&event("X", ChronoDuration::seconds(5))).await.unwrap();

    let at_30s = store.get_all_at(put_at + ChronoDuration::seconds(30)).await.unwrap();
    assert_eq!(at_30s.len(), 1);
    assert_eq!(at_30s[0].uid, "X");

    let at_70s = store.get_all_at(put_at + ChronoDuration::seconds(70)).await.unwrap();
    assert!(at_70s.is_empty());

    // Still physically present until evicted
    assert!(store.get("X").await.unwrap().is_some());
    assert_eq!(store.evict_expired_at(put_at + ChronoDuration::seconds(70)).await.unwrap(), 1);
    assert!(store.get("X").await.unwrap().is_none());
}

#[tokio::test]
async fn test_fileshare_record_survives_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let store = CotStore::open(StoreOptions::in_memory(dir.path())).unwrap();

    store.put(&fileshare_event("F", ChronoDuration::seconds(5))).await.unwrap();
    store.put(&event("P", ChronoDuration::seconds(5))).await.unwrap();

    let later = Utc::now() + ChronoDuration::minutes(10);
    assert_eq!(store.evict_expired_at(later).await.unwrap(), 1);

    let remaining = store.get_all_at(later).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].uid, "F");
}

#[tokio::test]
async fn test_fileshare_artifact_download_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StaticFetcher {
        body: b"hello",
        calls: AtomicUsize::new(0),
    });
    let store = CotStore::open(
        StoreOptions::in_memory(dir.path().join("downloads")).with_fetcher(fetcher.clone()),
    )
    .unwrap();

    store.put(&fileshare_event("F1", ChronoDuration::minutes(5))).await.unwrap();
    store.flush_transfers().await;
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    let artifact = dir.path().join("downloads").join("F1_photo.jpg");
    assert_eq!(std::fs::read(&artifact).unwrap(), b"hello");

    let file = store.get_file("F1").await.unwrap();
    assert_eq!(file.uid, "F1");
    assert_eq!(file.filename, "F1_photo.jpg");
    assert_eq!(
        base64::engine::general_purpose::STANDARD.decode(&file.content).unwrap(),
        b"hello"
    );

    assert!(store.delete("F1").await.unwrap());
    assert!(!artifact.exists());
}

#[tokio::test]
async fn test_repeated_fileshare_downloads_once() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(StaticFetcher {
        body: b"hello",
        calls: AtomicUsize::new(0),
    });
    let store = CotStore::open(
        StoreOptions::in_memory(dir.path().join("downloads")).with_fetcher(fetcher.clone()),
    )
    .unwrap();

    for _ in 0..3 {
        store.put(&fileshare_event("F3", ChronoDuration::minutes(5))).await.unwrap();
        store.flush_transfers().await;
    }

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    let downloads: Vec<_> = std::fs::read_dir(dir.path().join("downloads"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(downloads, ["F3_photo.jpg"]);
}

#[tokio::test]
async fn test_failed_download_still_stores_event() {
    let dir = tempfile::tempdir().unwrap();
    let store = CotStore::open(
        StoreOptions::in_memory(dir.path()).with_fetcher(Arc::new(FailingFetcher)),
    )
    .unwrap();

    store.put(&fileshare_event("F2", ChronoDuration::minutes(5))).await.unwrap();
    store.flush_transfers().await;

    let stored = store.get("F2").await.unwrap().unwrap();
    assert_eq!(stored.fileshare().unwrap().filename, "photo.jpg");
    assert!(store.get_file("F2").await.is_err());
}

#[tokio::test]
async fn test_records_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions::new(dir.path().join("db"), dir.path().join("dl"));
    let original = fileshare_event("P1", ChronoDuration::minutes(5));
    {
        let store = CotStore::open(options.clone()).unwrap();
        store.put(&original).await.unwrap();
    }

    let store = CotStore::open(options).unwrap();
    let restored = store.get("P1").await.unwrap().unwrap();
    assert_eq!(restored, original);
}

#[tokio::test]
async fn test_background_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let store = CotStore::open(
        StoreOptions::in_memory(dir.path()).with_stale_grace(Duration::from_millis(10)),
    )
    .unwrap();

    store.put(&event("old", ChronoDuration::seconds(-60))).await.unwrap();
    store.put(&event("new", ChronoDuration::minutes(5))).await.unwrap();

    store.start_eviction(Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(200)).await;
    store.stop_eviction();

    assert!(store.get("old").await.unwrap().is_none());
    assert!(store.get("new").await.unwrap().is_some());
}
