//! Encode cache integration tests
//!
//! Disk persistence, version handling, corrupt files, eviction and
//! concurrent lookups.
//!
//! Run with:
//! ```bash
//! cargo test -p smorph --test cache_integration
//! ```

#[path = "helpers/mod.rs"]
mod helpers;

use helpers::*;
use smorph::builder::{EncodeRequest, Error};
use smorph::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

struct Fixture {
    wav: WavData,
    hash: String,
    cfg: EncoderConfig,
}

impl Fixture {
    fn new(freq: f64) -> Self {
        let wav = WavData::mono(generate_sine(freq, 0.5, TEST_SAMPLE_RATE, 9600), TEST_SAMPLE_RATE);
        let hash = smorph::core::hash::samples_hash(wav.samples());
        Self {
            wav,
            hash,
            cfg: EncoderConfig::default(),
        }
    }

    fn request(&self) -> EncodeRequest<'_> {
        EncodeRequest {
            wav_data: &self.wav,
            wav_data_hash: &self.hash,
            midi_note: 69,
            clip_start: 0,
            clip_end: self.wav.n_values(),
            encoder_config: &self.cfg,
            group: None,
        }
    }
}

fn disk_cache(dir: &Path) -> InstEncCache {
    InstEncCache::new(CacheConfig::default().with_cache_dir(dir)).unwrap()
}

fn cache_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "smcache"))
        .collect();
    files.sort();
    files
}

fn set_age(path: &Path, age: Duration) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

#[test]
fn test_disk_roundtrip_between_instances() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let fx = Fixture::new(440.0);

    let first = disk_cache(dir.path());
    let a = first.encode(&fx.request(), &CancelToken::new()).unwrap();
    first.flush();
    assert_eq!(cache_files(dir.path()).len(), 1);

    let second = disk_cache(dir.path());
    let b = second.encode(&fx.request(), &CancelToken::new()).unwrap();
    assert_eq!(a, b);

    let counts = second.stats().counts;
    assert_eq!((counts.disk_hits, counts.misses), (1, 0));

    let c = second.encode(&fx.request(), &CancelToken::new()).unwrap();
    assert_eq!(a, c);
    assert_eq!(second.stats().counts.memory_hits, 1);
}

#[test]
fn test_repeated_encode_is_idempotent() {
    let cache = memory_cache();
    let fx = Fixture::new(330.0);
    let results: Vec<Audio> = (0..3)
        .map(|_| cache.encode(&fx.request(), &CancelToken::new()).unwrap())
        .collect();

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().counts.misses, 1);
}

#[test]
fn test_cancelled_encode_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let cache = disk_cache(dir.path());
    let fx = Fixture::new(440.0);
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = cache.encode(&fx.request(), &cancel);
    assert!(matches!(result, Err(Error::Cancelled)));

    cache.flush();
    assert!(cache.is_empty());
    assert!(cache_files(dir.path()).is_empty());
}

#[test]
fn test_version_mismatch_recomputes() {
    let dir = TempDir::new().unwrap();
    let fx = Fixture::new(440.0);

    let old = InstEncCache::new(
        CacheConfig::default()
            .with_cache_dir(dir.path())
            .with_encoder_version("older-encoder"),
    )
    .unwrap();
    old.encode(&fx.request(), &CancelToken::new()).unwrap();
    old.flush();

    let current = disk_cache(dir.path());
    current.encode(&fx.request(), &CancelToken::new()).unwrap();
    let counts = current.stats().counts;
    assert_eq!((counts.disk_hits, counts.misses), (0, 1));

    // the recomputed result replaced the old file
    current.flush();
    let again = disk_cache(dir.path());
    again.encode(&fx.request(), &CancelToken::new()).unwrap();
    assert_eq!(again.stats().counts.disk_hits, 1);
}

#[test]
fn test_corrupt_file_is_ignored() {
    let dir = TempDir::new().unwrap();
    let fx = Fixture::new(440.0);

    let first = disk_cache(dir.path());
    let expected = first.encode(&fx.request(), &CancelToken::new()).unwrap();
    first.flush();

    let files = cache_files(dir.path());
    let mut bytes = std::fs::read(&files[0]).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x5a;
    std::fs::write(&files[0], &bytes).unwrap();

    let second = disk_cache(dir.path());
    let audio = second.encode(&fx.request(), &CancelToken::new()).unwrap();
    assert_eq!(audio, expected);
    assert_eq!(second.stats().counts.misses, 1);
    second.flush();

    std::fs::write(&files[0], b"garbage").unwrap();
    let third = disk_cache(dir.path());
    assert_eq!(third.encode(&fx.request(), &CancelToken::new()).unwrap(), expected);
}

#[test]
fn test_disk_hit_refreshes_file_age() {
    let dir = TempDir::new().unwrap();
    let fx = Fixture::new(440.0);

    let first = disk_cache(dir.path());
    first.encode(&fx.request(), &CancelToken::new()).unwrap();
    first.flush();

    let file = &cache_files(dir.path())[0];
    set_age(file, Duration::from_secs(40 * 24 * 3600));

    let second = disk_cache(dir.path());
    second.encode(&fx.request(), &CancelToken::new()).unwrap();
    second.delete_old_files().unwrap();
    assert_eq!(cache_files(dir.path()).len(), 1);
}

#[test]
fn test_delete_old_files() {
    let dir = TempDir::new().unwrap();
    let cache = InstEncCache::new(
        CacheConfig::default()
            .with_cache_dir(dir.path())
            .with_max_files(2),
    )
    .unwrap();

    let fixtures: Vec<Fixture> = [220.0, 330.0, 440.0, 550.0]
        .iter()
        .map(|&f| Fixture::new(f))
        .collect();
    for fx in &fixtures {
        cache.encode(&fx.request(), &CancelToken::new()).unwrap();
    }
    cache.flush();

    let files = cache_files(dir.path());
    assert_eq!(files.len(), 4);
    set_age(&files[0], Duration::from_secs(31 * 24 * 3600));
    set_age(&files[1], Duration::from_secs(3600));
    set_age(&files[2], Duration::from_secs(60));

    cache.delete_old_files().unwrap();

    // the expired file goes first, then the oldest beyond two
    let left = cache_files(dir.path());
    assert_eq!(left.len(), 2);
    assert!(!left.contains(&files[0]));
    assert!(!left.contains(&files[1]));
}

#[test]
fn test_delete_old_files_sweeps_interrupted_writes() {
    let dir = TempDir::new().unwrap();
    let cache = disk_cache(dir.path());

    let stale = dir.path().join("0123abcd.tmp");
    let in_progress = dir.path().join("4567ef01.tmp");
    let unrelated = dir.path().join("notes.txt");
    for path in [&stale, &in_progress, &unrelated] {
        std::fs::write(path, b"partial").unwrap();
    }
    set_age(&stale, Duration::from_secs(2 * 3600));
    set_age(&unrelated, Duration::from_secs(365 * 24 * 3600));

    cache.delete_old_files().unwrap();

    assert!(!stale.exists());
    assert!(in_progress.exists());
    assert!(unrelated.exists());
}

#[test]
fn test_clear_keeps_disk_entries() {
    let dir = TempDir::new().unwrap();
    let cache = disk_cache(dir.path());
    let fx = Fixture::new(440.0);

    cache.encode(&fx.request(), &CancelToken::new()).unwrap();
    cache.flush();
    cache.clear();
    assert!(cache.is_empty());

    cache.encode(&fx.request(), &CancelToken::new()).unwrap();
    assert_eq!(cache.stats().counts.disk_hits, 1);
}

#[test]
fn test_memory_limit_eviction() {
    let cache = InstEncCache::new(CacheConfig::default().with_max_memory_bytes(1)).unwrap();
    let fixtures: Vec<Fixture> = [220.0, 330.0].iter().map(|&f| Fixture::new(f)).collect();
    for fx in &fixtures {
        cache.encode(&fx.request(), &CancelToken::new()).unwrap();
    }
    assert_eq!(cache.len(), 2);
    assert!(cache.stats().memory_fill() > 1.0);

    cache.delete_old_memory();
    assert!(cache.is_empty());
    assert_eq!(cache.stats().memory_bytes, 0);
}

#[test]
fn test_concurrent_lookups_agree() {
    let cache = memory_cache();
    let fx = Arc::new(Fixture::new(440.0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let fx = Arc::clone(&fx);
            std::thread::spawn(move || cache.encode(&fx.request(), &CancelToken::new()).unwrap())
        })
        .collect();
    let results: Vec<Audio> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().counts.lookups(), 4);
}
