use super::helpers::*;
use crate::artifact::RECORD_COUNT_METADATA;
use crate::big_mode::{check_subdivisions, verify_merge_count};
use crate::*;
use anyhow::Result;
use csvfile::is_sorted_by_bucket_key;
use futures::stream::BoxStream;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const BUCKET: u32 = 3;
const LARGE: usize = 1_000_000;

/// Existing artifact contents shared by the mode-independence tests.
fn seed_records() -> Vec<PackageVersion> {
    let mut records = versions("pkg", 60, 1);
    records.extend(versions("lib", 25, 1));
    records
}

/// New records: some overwrite seeded keys, some are fresh, and several ids
/// carry more than one version.
fn new_records() -> Vec<PackageVersion> {
    let mut records = Vec::new();
    for i in (0..60).step_by(3) {
        let mut record = PackageVersion::new(&format!("pkg-{i:04}"), "1.0.0", 2);
        record.listed = false;
        records.push(record);
    }
    for i in 0..30 {
        records.push(PackageVersion::new(&format!("new-{:04}", 29 - i), "1.0.0", 2));
        records.push(PackageVersion::new(&format!("new-{:04}", 29 - i), "2.0.0", 2));
    }
    records
}

// -------------------- Mode independence --------------------

#[test_log::test(tokio::test)]
async fn big_mode_output_matches_in_memory_output() -> Result<()> {
    let in_memory = Fixture::new(LARGE)?;
    let big = Fixture::new(0)?;

    for fixture in [&in_memory, &big] {
        let seed = TestProvider::merging(chunked(seed_records(), 20));
        fixture.compact(&seed, BUCKET).await?;
    }
    assert_eq!(
        in_memory.raw_artifact(BUCKET).await?,
        big.raw_artifact(BUCKET).await?,
        "seeded artifacts differ"
    );

    let a = written(
        in_memory
            .compact(&TestProvider::merging(chunked(new_records(), 9)), BUCKET)
            .await?,
    );
    let b = written(
        big.compact(&TestProvider::merging(chunked(new_records(), 9)), BUCKET)
            .await?,
    );

    assert_eq!(a.mode, CompactionMode::InMemory);
    assert!(matches!(b.mode, CompactionMode::BigMode { .. }));
    assert_eq!(a.record_count, 60 + 25 + 60);
    assert_eq!(a.record_count, b.record_count);
    assert_eq!(a.uncompressed_size, b.uncompressed_size);
    assert_eq!(
        in_memory.raw_artifact(BUCKET).await?,
        big.raw_artifact(BUCKET).await?
    );
    Ok(())
}

#[tokio::test]
async fn big_mode_result_is_sorted_and_unique() -> Result<()> {
    let fixture = Fixture::new(0)?;
    let provider = TestProvider::merging(chunked(new_records(), 11));

    let summary = written(fixture.compact(&provider, BUCKET).await?);
    let read = fixture.read(BUCKET).await?;

    assert_eq!(read.len() as u64, summary.record_count);
    assert!(is_sorted_by_bucket_key(&read));
    crate::prune::check_unique_keys(&PackageVersionSchema, &read)?;
    Ok(())
}

#[tokio::test]
async fn big_mode_is_idempotent() -> Result<()> {
    let fixture = Fixture::new(0)?;
    let provider = TestProvider::merging(chunked(seed_records(), 10));

    let first = written(fixture.compact(&provider, BUCKET).await?);
    let second = written(fixture.compact(&provider, BUCKET).await?);

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(first.record_count, second.record_count);
    Ok(())
}

// -------------------- Mode selection --------------------

#[tokio::test]
async fn overflowing_memory_switches_to_big_mode() -> Result<()> {
    // 6 chunks of 10 with a threshold of 25: the third chunk overflows.
    let fixture = Fixture::new(25)?;
    let provider = TestProvider::merging(chunked(versions("pkg", 60, 1), 10));

    let summary = written(fixture.compact(&provider, BUCKET).await?);

    // ceil(30 / 3) * (3 + 3) = 60 records => 6 subdivisions of 10.
    assert_eq!(summary.mode, CompactionMode::BigMode { subdivisions: 6 });
    assert_eq!(summary.record_count, 60);
    assert_eq!(
        *provider.remaining_queries.lock().unwrap(),
        vec![Some("2".to_string())]
    );
    // One final prune per subdivision, none from the abandoned buffer.
    assert_eq!(provider.final_prunes(), 6);
    assert_eq!(fixture.read(BUCKET).await?, versions("pkg", 60, 1));
    Ok(())
}

#[tokio::test]
async fn scenario_b_large_existing_artifact_selects_big_mode() -> Result<()> {
    let seeder = Fixture::new(LARGE)?;
    seeder
        .compact(&TestProvider::merging(vec![versions("pkg", 15, 1)]), BUCKET)
        .await?;

    // threshold 10 < 15 existing records; round(15 / 10) clamps to 2.
    let fixture = Fixture::with_store(Arc::clone(&seeder.store), 10)?;
    let provider = TestProvider::merging(vec![versions("extra", 1, 2)]);
    let summary = written(fixture.compact(&provider, BUCKET).await?);

    assert_eq!(summary.mode, CompactionMode::BigMode { subdivisions: 2 });
    assert_eq!(summary.record_count, 16);
    assert!(provider.remaining_queries.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn existing_record_count_sets_subdivisions() -> Result<()> {
    let seeder = Fixture::new(LARGE)?;
    seeder
        .compact(&TestProvider::merging(vec![versions("pkg", 64, 1)]), BUCKET)
        .await?;

    let fixture = Fixture::with_store(Arc::clone(&seeder.store), 20)?;
    let summary = written(
        fixture
            .compact(&TestProvider::merging(vec![versions("pkg", 4, 2)]), BUCKET)
            .await?,
    );

    // round(64 / 10) = 6
    assert_eq!(summary.mode, CompactionMode::BigMode { subdivisions: 6 });
    assert_eq!(summary.record_count, 64);
    Ok(())
}

#[tokio::test]
async fn big_mode_without_new_records_is_a_no_op() -> Result<()> {
    let seeder = Fixture::new(LARGE)?;
    let seeded = written(
        seeder
            .compact(&TestProvider::merging(vec![versions("pkg", 30, 1)]), BUCKET)
            .await?,
    );

    let fixture = Fixture::with_store(Arc::clone(&seeder.store), 10)?;
    let outcome = fixture
        .compact(&TestProvider::merging(vec![Vec::new()]), BUCKET)
        .await?;
    assert_eq!(outcome, CompactOutcome::NoData);

    let properties = fixture
        .storage
        .get_artifact_properties(CONTAINER, BUCKET)
        .await?
        .expect("artifact exists");
    assert_eq!(properties.e_tag, seeded.e_tag);
    assert_eq!(fixture.leftover_files()?, 0);
    Ok(())
}

#[tokio::test]
async fn big_mode_replacing_provider_drops_existing_records() -> Result<()> {
    let seeder = Fixture::new(LARGE)?;
    seeder
        .compact(&TestProvider::merging(vec![versions("old", 30, 1)]), BUCKET)
        .await?;

    let fixture = Fixture::with_store(Arc::clone(&seeder.store), 10)?;
    let provider = TestProvider::replacing(vec![versions("new", 5, 2)]);
    let summary = written(fixture.compact(&provider, BUCKET).await?);

    assert!(matches!(summary.mode, CompactionMode::BigMode { .. }));
    assert_eq!(fixture.read(BUCKET).await?, versions("new", 5, 2));
    Ok(())
}

#[tokio::test]
async fn plain_csv_existing_artifact_is_accepted() -> Result<()> {
    let fixture = Fixture::new(10)?;
    let mut body = Vec::new();
    csvfile::write_records(&mut body, &PackageVersionSchema, &versions("plain", 20, 1))?;

    let mut attributes = Attributes::new();
    attributes.insert(
        Attribute::Metadata(RECORD_COUNT_METADATA.into()),
        "20".into(),
    );
    fixture
        .store
        .put_opts(
            &artifact_path(CONTAINER, BUCKET),
            PutPayload::from(body),
            PutOptions {
                attributes,
                ..Default::default()
            },
        )
        .await?;

    let summary = written(
        fixture
            .compact(&TestProvider::merging(vec![versions("fresh", 2, 2)]), BUCKET)
            .await?,
    );
    assert!(matches!(summary.mode, CompactionMode::BigMode { .. }));
    assert_eq!(summary.record_count, 22);

    let properties = fixture
        .storage
        .get_artifact_properties(CONTAINER, BUCKET)
        .await?
        .expect("artifact exists");
    assert_eq!(properties.content_encoding.as_deref(), Some("gzip"));
    Ok(())
}

// -------------------- Cleanup & failures --------------------

#[tokio::test]
async fn temp_files_are_removed_after_success() -> Result<()> {
    let seeder = Fixture::new(LARGE)?;
    seeder
        .compact(&TestProvider::merging(vec![versions("pkg", 30, 1)]), BUCKET)
        .await?;

    let fixture = Fixture::with_store(Arc::clone(&seeder.store), 10)?;
    fixture
        .compact(&TestProvider::merging(vec![versions("pkg", 5, 2)]), BUCKET)
        .await?;

    assert!(fixture.scratch_dir().exists());
    assert_eq!(fixture.leftover_files()?, 0);
    Ok(())
}

#[tokio::test]
async fn temp_files_are_removed_after_failure() -> Result<()> {
    let fixture = Fixture::new(0)?;
    let duplicates = TestProvider {
        dedupe: false,
        ..TestProvider::merging(vec![vec![
            PackageVersion::new("dup", "1.0.0", 1),
            PackageVersion::new("dup", "1.0.0", 2),
        ]])
    };
    let err = fixture.compact(&duplicates, BUCKET).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateKeys { .. }), "got {err}");
    assert_eq!(fixture.leftover_files()?, 0);

    let failing = TestProvider {
        fail_at: Some(2),
        ..TestProvider::merging(chunked(versions("pkg", 40, 1), 10))
    };
    let err = fixture.compact(&failing, BUCKET).await.unwrap_err();
    assert!(matches!(err, Error::Provider(_)), "got {err}");
    assert_eq!(fixture.leftover_files()?, 0);

    assert!(fixture.read(BUCKET).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn big_mode_detects_concurrent_update() -> Result<()> {
    let seeder = Fixture::new(LARGE)?;
    seeder
        .compact(&TestProvider::merging(vec![versions("pkg", 30, 1)]), BUCKET)
        .await?;

    let fixture = Fixture::with_store(Arc::clone(&seeder.store), 10)?;
    let provider = RacingProvider {
        inner: TestProvider::merging(vec![versions("pkg", 3, 2)]),
        store: Arc::clone(&fixture.store),
        bucket: BUCKET,
    };

    let err = fixture.compact(&provider, BUCKET).await.unwrap_err();
    assert!(err.is_conflict(), "got {err}");
    assert_eq!(&fixture.raw_artifact(BUCKET).await?[..], RACE_BODY);
    assert_eq!(fixture.leftover_files()?, 0);
    Ok(())
}

#[tokio::test]
async fn duplicates_spread_over_subdivisions_are_rejected() -> Result<()> {
    // Equal keys share a bucket key, so each pair meets in one subdivision.
    let mut records = Vec::new();
    for i in 0..20 {
        records.push(PackageVersion::new(&format!("dup-{i:02}"), "1.0.0", 1));
        records.push(PackageVersion::new(&format!("dup-{i:02}"), "1.0.0", 2));
    }
    let fixture = Fixture::new(0)?;
    let provider = TestProvider {
        dedupe: false,
        ..TestProvider::merging(chunked(records, 8))
    };

    let err = fixture.compact(&provider, BUCKET).await.unwrap_err();
    match err {
        // The first failing subdivision reports its own pairs.
        Error::DuplicateKeys { total, .. } => assert!(total >= 2 && total.is_multiple_of(2), "{total}"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(fixture.read(BUCKET).await?.is_empty());
    Ok(())
}

// -------------------- Consistency checks --------------------

#[test]
fn subdivision_count_must_be_in_range() {
    assert!(check_subdivisions(2).is_ok());
    assert!(check_subdivisions(50).is_ok());
    for count in [0, 1, 51] {
        match check_subdivisions(count) {
            Err(Error::InvalidSubdivisions(n)) => assert_eq!(n, count),
            other => panic!("unexpected result for {count}: {other:?}"),
        }
    }
}

#[test]
fn merge_count_must_match_pruned_count() {
    assert!(verify_merge_count(42, 42).is_ok());
    assert!(verify_merge_count(0, 0).is_ok());
    let err = verify_merge_count(42, 41).unwrap_err();
    assert!(
        matches!(err, Error::MergeCountMismatch { expected: 42, actual: 41 }),
        "got {err}"
    );
    assert!(err.to_string().contains("42"));
}

// -------------------- Scheduling --------------------

/// Records, for each final prune, whether a background task has run yet.
struct ObservingProvider {
    inner: TestProvider,
    background_ran: Arc<AtomicBool>,
    observed: Mutex<Vec<bool>>,
}

#[async_trait::async_trait]
impl RecordProvider<PackageVersion> for ObservingProvider {
    fn should_compact(&self, existing: Option<&ArtifactProperties>) -> bool {
        self.inner.should_compact(existing)
    }

    fn use_existing_records(&self) -> bool {
        self.inner.use_existing_records()
    }

    fn write_empty_output(&self) -> bool {
        self.inner.write_empty_output()
    }

    fn get_chunks(&self, bucket: u32) -> BoxStream<'_, Result<Chunk<PackageVersion>, BoxError>> {
        self.inner.get_chunks(bucket)
    }

    async fn count_remaining_chunks(
        &self,
        bucket: u32,
        last_position: Option<&str>,
    ) -> Result<usize, BoxError> {
        self.inner.count_remaining_chunks(bucket, last_position).await
    }

    fn prune(&self, records: Vec<PackageVersion>, is_final: bool) -> Vec<PackageVersion> {
        if is_final {
            self.observed
                .lock()
                .unwrap()
                .push(self.background_ran.load(Ordering::SeqCst));
        }
        self.inner.prune(records, is_final)
    }
}

#[tokio::test]
async fn subdivision_pruning_lets_other_tasks_run() -> Result<()> {
    let fixture = Fixture::new(0)?;
    let background_ran = Arc::new(AtomicBool::new(false));
    let provider = ObservingProvider {
        inner: TestProvider::merging(vec![versions("pkg", 60, 1)]),
        background_ran: Arc::clone(&background_ran),
        observed: Mutex::new(Vec::new()),
    };

    let flag = Arc::clone(&background_ran);
    let background = tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

    let summary = written(fixture.compact(&provider, BUCKET).await?);
    background.await?;

    // 60 records in one chunk with a subdivision size of 10.
    assert_eq!(summary.mode, CompactionMode::BigMode { subdivisions: 6 });
    let observed = provider.observed.lock().unwrap().clone();
    assert_eq!(observed.len(), 6);
    assert_eq!(observed.last(), Some(&true));
    Ok(())
}
