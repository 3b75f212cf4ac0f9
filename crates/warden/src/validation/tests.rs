//! Scenario tests for the validation service

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ini::Ini;

use crate::config::{RepairSerialization, ValidationConfig};
use crate::downloader::error::{DownloadError, Result as DownloadResult};
use crate::downloader::registry::{Downloader, DownloaderRegistry};
use crate::downloader::sources::{
    DownloadSource, ForumSource, HttpSource, ManualSource, NexusSource,
};
use crate::model::{Archive, Hash, ModList};
use crate::validation::data::{NexusKey, ValidationData, ValidationDataProvider};
use crate::validation::repair::{ArchiveUpdater, Replacement};
use crate::validation::service::{ValidationError, ValidationService};
use crate::validation::status::ArchiveStatus;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Downloader double keyed by origin tag, with a scriptable `prepare`
struct StubDownloader {
    origin: &'static str,
    prepare_ok: bool,
}

#[async_trait]
impl Downloader for StubDownloader {
    fn name(&self) -> &'static str {
        self.origin
    }

    fn owns(&self, source: &DownloadSource) -> bool {
        source.origin() == self.origin
    }

    async fn infer(&self, _meta: &Ini, _quick: bool) -> DownloadResult<Option<DownloadSource>> {
        Ok(None)
    }

    async fn prepare(&self) -> DownloadResult<()> {
        if self.prepare_ok {
            Ok(())
        } else {
            Err(DownloadError::AuthFailed {
                origin: self.origin,
                message: "credentials rejected".to_string(),
            })
        }
    }

    async fn download(&self, archive: &Archive, _dest: &Path) -> DownloadResult<()> {
        Err(DownloadError::UnsupportedSource {
            description: archive.source.describe(),
        })
    }

    async fn verify(&self, _archive: &Archive) -> DownloadResult<bool> {
        Ok(true)
    }
}

fn stub_registry(nexus_prepare_ok: bool) -> Arc<DownloaderRegistry> {
    Arc::new(
        DownloaderRegistry::new()
            .register(StubDownloader {
                origin: "nexus",
                prepare_ok: nexus_prepare_ok,
            })
            .register(StubDownloader {
                origin: "forum",
                prepare_ok: true,
            })
            .register(StubDownloader {
                origin: "http",
                prepare_ok: true,
            }),
    )
}

struct StaticProvider {
    lists: Vec<ModList>,
    data: ValidationData,
}

#[async_trait]
impl ValidationDataProvider for StaticProvider {
    async fn mod_lists(&self) -> anyhow::Result<Vec<ModList>> {
        Ok(self.lists.clone())
    }

    async fn validation_data(&self) -> anyhow::Result<ValidationData> {
        Ok(self.data.clone())
    }
}

#[derive(Clone)]
enum Script {
    Found,
    Accepted,
    NotFound,
    Fail,
}

/// Updater double that records call overlap to prove serialization
struct ScriptedUpdater {
    scripts: std::sync::Mutex<HashMap<Hash, Script>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedUpdater {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            scripts: std::sync::Mutex::new(HashMap::new()),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    fn script(&self, hash: Hash, script: Script) {
        self.scripts.lock().unwrap().insert(hash, script);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveUpdater for ScriptedUpdater {
    async fn find_replacement(&self, hash: Hash) -> anyhow::Result<Replacement> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .unwrap_or(Script::NotFound);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match script {
            Script::Found => Ok(Replacement::Found(Archive::new(
                Hash::of_bytes(b"replacement"),
                "replacement.7z",
                100,
                DownloadSource::Http(HttpSource::new("https://cdn.example.com/replacement.7z")),
            ))),
            Script::Accepted => Ok(Replacement::Accepted),
            Script::NotFound => Ok(Replacement::NotFound),
            Script::Fail => Err(anyhow::anyhow!("updater exploded")),
        }
    }
}

fn nexus_archive(name: &str, game: &str, mod_id: u64, file_id: u64) -> Archive {
    Archive::new(
        Hash::of_bytes(name.as_bytes()),
        name,
        100,
        DownloadSource::Nexus(NexusSource::new(game, mod_id, file_id)),
    )
}

fn http_archive(name: &str, url: &str) -> Archive {
    Archive::new(
        Hash::of_bytes(name.as_bytes()),
        name,
        100,
        DownloadSource::Http(HttpSource::new(url)),
    )
}

fn forum_archive(name: &str, thread_id: u64) -> Archive {
    Archive::new(
        Hash::of_bytes(name.as_bytes()),
        name,
        100,
        DownloadSource::Forum(ForumSource::new("forums.example.net", thread_id)),
    )
}

fn manual_archive(name: &str) -> Archive {
    Archive::new(
        Hash::of_bytes(name.as_bytes()),
        name,
        100,
        DownloadSource::Manual(ManualSource::new("https://example.com/get-it-yourself")),
    )
}

/// Verdict for a feed-less archive, keyed the way the service looks it up
fn set_verdict(data: &mut ValidationData, archive: &Archive, verdict: bool) {
    data.verdicts
        .insert((archive.source.primary_key(), archive.hash), verdict);
}

fn test_config() -> ValidationConfig {
    ValidationConfig {
        max_workers: 4,
        updater_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn service_with(
    config: ValidationConfig,
    lists: Vec<ModList>,
    data: ValidationData,
    updater: Arc<ScriptedUpdater>,
    registry: Arc<DownloaderRegistry>,
) -> ValidationService {
    ValidationService::new(
        config,
        registry,
        Arc::new(StaticProvider { lists, data }),
        updater,
    )
}

fn service(
    lists: Vec<ModList>,
    data: ValidationData,
    updater: Arc<ScriptedUpdater>,
) -> ValidationService {
    service_with(test_config(), lists, data, updater, stub_registry(true))
}

async fn statuses_of(service: &ValidationService, machine_url: &str) -> Vec<ArchiveStatus> {
    service
        .detailed_status(machine_url)
        .await
        .unwrap()
        .unwrap()
        .archives
        .iter()
        .map(|item| item.status)
        .collect()
}

#[tokio::test]
async fn feed_listed_archives_pass_without_repair_calls() {
    let archive = nexus_archive("a.7z", "SomeGame", 1, 2);
    let mut data = ValidationData::new();
    data.known_good.insert(NexusKey::new("SomeGame", 1, 2));
    let updater = ScriptedUpdater::new(Duration::ZERO);

    let service = service(
        vec![ModList::new("foo", "Foo", vec![archive])],
        data,
        Arc::clone(&updater),
    );
    service.run_pass().await.unwrap();

    let summaries = service.summaries().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].passed, 1);
    assert_eq!(summaries[0].failed, 0);
    assert_eq!(summaries[0].updating, 0);
    assert_eq!(updater.calls(), 0);
}

#[tokio::test]
async fn manual_archives_are_always_valid() {
    // Empty snapshot: nothing vouches for this archive except the trust rule
    let updater = ScriptedUpdater::new(Duration::ZERO);
    let service = service(
        vec![ModList::new("foo", "Foo", vec![manual_archive("byhand.7z")])],
        ValidationData::new(),
        Arc::clone(&updater),
    );
    service.run_pass().await.unwrap();

    assert_eq!(
        statuses_of(&service, "foo").await,
        vec![ArchiveStatus::Valid]
    );
    assert_eq!(updater.calls(), 0);
}

#[tokio::test]
async fn unknown_verdict_is_a_repair_candidate() {
    let archive = http_archive("a.7z", "https://cdn.example.com/a.7z");
    let updater = ScriptedUpdater::new(Duration::ZERO);
    let service = service(
        vec![ModList::new("foo", "Foo", vec![archive])],
        ValidationData::new(),
        Arc::clone(&updater),
    );
    service.run_pass().await.unwrap();

    let summary = &service.summaries().await.unwrap()[0];
    assert_eq!(summary.failed, 1);
    assert_eq!(updater.calls(), 1);

    let detail = service.detailed_status("foo").await.unwrap().unwrap();
    assert!(detail.archives[0].is_failing);
}

#[tokio::test]
async fn adopted_replacement_counts_as_passed() {
    let archive = http_archive("a.7z", "https://cdn.example.com/a.7z");
    let mut data = ValidationData::new();
    set_verdict(&mut data, &archive, false);
    let updater = ScriptedUpdater::new(Duration::ZERO);
    updater.script(archive.hash, Script::Found);

    let service = service(
        vec![ModList::new("foo", "Foo", vec![archive])],
        data,
        Arc::clone(&updater),
    );
    service.run_pass().await.unwrap();

    assert_eq!(
        statuses_of(&service, "foo").await,
        vec![ArchiveStatus::Updated]
    );
    let summary = &service.summaries().await.unwrap()[0];
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn three_archive_scenario_counts_correctly() {
    init_tracing();
    let listed = nexus_archive("listed.7z", "SomeGame", 1, 2);
    let byhand = manual_archive("byhand.7z");
    let vanished = nexus_archive("vanished.7z", "SomeGame", 3, 4);

    let mut data = ValidationData::new();
    data.known_good.insert(NexusKey::new("SomeGame", 1, 2));
    let updater = ScriptedUpdater::new(Duration::ZERO);

    let service = service(
        vec![ModList::new(
            "foo",
            "Foo",
            vec![listed, byhand, vanished],
        )],
        data,
        Arc::clone(&updater),
    );
    service.run_pass().await.unwrap();

    let summary = &service.summaries().await.unwrap()[0];
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.updating, 0);
    assert_eq!(
        statuses_of(&service, "foo").await,
        vec![
            ArchiveStatus::Valid,
            ArchiveStatus::Valid,
            ArchiveStatus::Invalid
        ]
    );
}

#[tokio::test]
async fn accepted_repair_becomes_updated_on_a_later_pass() {
    let archive = http_archive("a.7z", "https://cdn.example.com/a.7z");
    let hash = archive.hash;
    let updater = ScriptedUpdater::new(Duration::ZERO);
    updater.script(hash, Script::Accepted);

    let service = service(
        vec![ModList::new("foo", "Foo", vec![archive])],
        ValidationData::new(),
        Arc::clone(&updater),
    );

    service.run_pass().await.unwrap();
    assert_eq!(
        statuses_of(&service, "foo").await,
        vec![ArchiveStatus::Updating]
    );
    assert_eq!(service.summaries().await.unwrap()[0].updating, 1);

    // The request materialized between passes
    updater.script(hash, Script::Found);
    service.run_pass().await.unwrap();
    assert_eq!(
        statuses_of(&service, "foo").await,
        vec![ArchiveStatus::Updated]
    );
    assert_eq!(service.summaries().await.unwrap()[0].updating, 0);
}

#[tokio::test]
async fn summary_counts_cover_every_archive() {
    let listed = nexus_archive("listed.7z", "SomeGame", 1, 2);
    let byhand = manual_archive("byhand.7z");
    let pending = http_archive("pending.7z", "https://cdn.example.com/pending.7z");
    let dead = forum_archive("dead.7z", 77);
    let healthy = http_archive("healthy.7z", "https://cdn.example.com/healthy.7z");

    let mut data = ValidationData::new();
    data.known_good.insert(NexusKey::new("SomeGame", 1, 2));
    set_verdict(&mut data, &healthy, true);
    let updater = ScriptedUpdater::new(Duration::ZERO);
    updater.script(pending.hash, Script::Accepted);

    let archives = vec![listed, byhand, pending, dead, healthy];
    let total = archives.len();
    let service = service(
        vec![ModList::new("foo", "Foo", archives)],
        data,
        Arc::clone(&updater),
    );
    service.run_pass().await.unwrap();

    let summary = &service.summaries().await.unwrap()[0];
    assert_eq!(summary.passed + summary.failed + summary.updating, total);
    assert_eq!(summary.total(), total);
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.updating, 1);
}

#[tokio::test]
async fn failed_origin_auth_poisons_only_that_origin() {
    let listed = nexus_archive("listed.7z", "SomeGame", 1, 2);
    let healthy = http_archive("healthy.7z", "https://cdn.example.com/healthy.7z");

    let mut data = ValidationData::new();
    // Even a feed-listed identity cannot be trusted once auth is dead
    data.known_good.insert(NexusKey::new("SomeGame", 1, 2));
    set_verdict(&mut data, &healthy, true);
    let updater = ScriptedUpdater::new(Duration::ZERO);

    let service = service_with(
        test_config(),
        vec![ModList::new("foo", "Foo", vec![listed, healthy])],
        data,
        Arc::clone(&updater),
        stub_registry(false),
    );
    service.run_pass().await.unwrap();

    assert_eq!(
        statuses_of(&service, "foo").await,
        vec![ArchiveStatus::Invalid, ArchiveStatus::Valid]
    );
    assert_eq!(updater.calls(), 1);
}

#[tokio::test]
async fn repairs_are_serialized_by_the_global_lock() {
    init_tracing();
    let archives: Vec<Archive> = (0..6)
        .map(|n| {
            http_archive(
                &format!("missing-{n}.7z"),
                &format!("https://cdn.example.com/missing-{n}.7z"),
            )
        })
        .collect();
    let updater = ScriptedUpdater::new(Duration::from_millis(20));

    let service = service(
        vec![ModList::new("foo", "Foo", archives)],
        ValidationData::new(),
        Arc::clone(&updater),
    );
    service.run_pass().await.unwrap();

    assert_eq!(updater.calls(), 6);
    assert_eq!(updater.peak(), 1);
}

#[tokio::test]
async fn per_hash_serialization_lets_distinct_hashes_overlap() {
    let archives: Vec<Archive> = (0..4)
        .map(|n| {
            http_archive(
                &format!("missing-{n}.7z"),
                &format!("https://cdn.example.com/missing-{n}.7z"),
            )
        })
        .collect();
    let updater = ScriptedUpdater::new(Duration::from_millis(30));

    let config = ValidationConfig {
        repair_serialization: RepairSerialization::PerHash,
        ..test_config()
    };
    let service = service_with(
        config,
        vec![ModList::new("foo", "Foo", archives)],
        ValidationData::new(),
        Arc::clone(&updater),
        stub_registry(true),
    );
    service.run_pass().await.unwrap();

    assert_eq!(updater.calls(), 4);
    assert!(updater.peak() > 1, "distinct hashes should overlap");
}

#[tokio::test]
async fn updater_failure_reads_as_not_found() {
    let archive = http_archive("a.7z", "https://cdn.example.com/a.7z");
    let updater = ScriptedUpdater::new(Duration::ZERO);
    updater.script(archive.hash, Script::Fail);

    let service = service(
        vec![ModList::new("foo", "Foo", vec![archive])],
        ValidationData::new(),
        Arc::clone(&updater),
    );
    // The pass itself must survive the updater blowing up
    service.run_pass().await.unwrap();
    assert_eq!(
        statuses_of(&service, "foo").await,
        vec![ArchiveStatus::Invalid]
    );
}

#[tokio::test]
async fn stuck_updater_times_out_without_wedging_the_lock() {
    let first = http_archive("a.7z", "https://cdn.example.com/a.7z");
    let second = http_archive("b.7z", "https://cdn.example.com/b.7z");
    let updater = ScriptedUpdater::new(Duration::from_millis(500));

    let config = ValidationConfig {
        updater_timeout: Duration::from_millis(20),
        ..test_config()
    };
    let service = service_with(
        config,
        vec![ModList::new("foo", "Foo", vec![first, second])],
        ValidationData::new(),
        Arc::clone(&updater),
        stub_registry(true),
    );
    service.run_pass().await.unwrap();

    // Both lookups ran: the first timing out released the lock for the second
    assert_eq!(updater.calls(), 2);
    assert_eq!(
        statuses_of(&service, "foo").await,
        vec![ArchiveStatus::Invalid, ArchiveStatus::Invalid]
    );
}

#[tokio::test]
async fn unknown_modlist_name_is_none_not_an_error() {
    let updater = ScriptedUpdater::new(Duration::ZERO);
    let service = service(
        vec![ModList::new("foo", "Foo", vec![manual_archive("a.7z")])],
        ValidationData::new(),
        updater,
    );
    service.run_pass().await.unwrap();

    assert!(service.detailed_status("foo").await.unwrap().is_some());
    assert!(service.detailed_status("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn cold_queries_trigger_a_pass() {
    let updater = ScriptedUpdater::new(Duration::ZERO);
    let service = service(
        vec![ModList::new("foo", "Foo", vec![manual_archive("a.7z")])],
        ValidationData::new(),
        updater,
    );

    // No explicit run_pass: the query itself computes the first results
    let summaries = service.summaries().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].machine_url, "foo");
    assert_eq!(service.metrics().archives_checked, 1);
}

#[tokio::test]
async fn cancelled_service_aborts_the_pass() {
    let updater = ScriptedUpdater::new(Duration::ZERO);
    let service = service(
        vec![ModList::new("foo", "Foo", vec![manual_archive("a.7z")])],
        ValidationData::new(),
        updater,
    );
    service.cancellation_token().cancel();

    let err = service.run_pass().await.unwrap_err();
    assert!(matches!(err, ValidationError::Cancelled));
}
