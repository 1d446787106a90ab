//! Memory + disk cache for encoded samples.
//!
//! Lookups check memory, then the cache directory, then run the
//! [`InstEncoder`]. Encoding happens without the lock held, so distinct keys
//! encode in parallel; two threads missing on the same key may both encode
//! and the last insert wins. Disk writes go through a dedicated writer
//! thread.

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smorph_analysis::InstEncoder;
use smorph_core::hash::sha256_hex;
use smorph_core::{Audio, CancelToken, EncoderConfig, WavData};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const CACHE_MAGIC: &str = "SmorphInstEncCache";
const CACHE_EXTENSION: &str = "smcache";
const TMP_EXTENSION: &str = "tmp";
/// Partial writes older than this are left over from an interrupted write.
const STALE_TMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Tag for related lookups, e.g. all samples of one instrument editor.
///
/// Groups only collect statistics; they don't change cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Group {
    id: u64,
    name: Arc<str>,
}

impl Group {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitCounts {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}

impl HitCounts {
    pub fn lookups(&self) -> u64 {
        self.memory_hits + self.disk_hits + self.misses
    }

    /// Share of lookups served without encoding (0.0 - 1.0).
    pub fn hit_rate(&self) -> f32 {
        match self.lookups() {
            0 => 0.0,
            n => (self.memory_hits + self.disk_hits) as f32 / n as f32,
        }
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub counts: HitCounts,
    /// Entries held in memory
    pub entries: usize,
    /// Estimated memory held by entries
    pub memory_bytes: usize,
    pub max_memory_bytes: usize,
}

impl CacheStats {
    /// Memory fill (0.0 - 1.0).
    pub fn memory_fill(&self) -> f32 {
        if self.max_memory_bytes == 0 {
            0.0
        } else {
            self.memory_bytes as f32 / self.max_memory_bytes as f32
        }
    }
}

/// Everything that identifies one encode.
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    /// Full, unclipped sample data.
    pub wav_data: &'a WavData,
    /// Content hash of `wav_data`.
    pub wav_data_hash: &'a str,
    pub midi_note: i32,
    /// First sample value to encode.
    pub clip_start: usize,
    /// End of the encoded range (exclusive).
    pub clip_end: usize,
    pub encoder_config: &'a EncoderConfig,
    pub group: Option<&'a Group>,
}

impl EncodeRequest<'_> {
    /// Cache key. The sample rate is part of it since the content hash only
    /// covers sample values.
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}",
            self.wav_data_hash,
            self.wav_data.mix_freq(),
            self.clip_start,
            self.clip_end,
            self.midi_note,
            self.encoder_config.cache_key()
        )
    }
}

#[derive(Clone, Copy)]
enum Lookup {
    Memory,
    Disk,
    Miss,
}

impl Lookup {
    fn count(self, counts: &mut HitCounts) {
        match self {
            Lookup::Memory => counts.memory_hits += 1,
            Lookup::Disk => counts.disk_hits += 1,
            Lookup::Miss => counts.misses += 1,
        }
    }
}

struct CacheEntry {
    version: String,
    audio: Arc<Audio>,
    mem_size: usize,
    read_stamp: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    read_stamp: u64,
    memory_bytes: usize,
    counts: HitCounts,
    group_counts: HashMap<u64, HitCounts>,
}

impl CacheState {
    fn record(&mut self, group: Option<&Group>, lookup: Lookup) {
        lookup.count(&mut self.counts);
        if let Some(group) = group {
            lookup.count(self.group_counts.entry(group.id).or_default());
        }
    }

    fn insert(&mut self, key: String, version: &str, audio: Arc<Audio>) {
        self.read_stamp += 1;
        let entry = CacheEntry {
            version: version.to_string(),
            mem_size: audio.mem_size(),
            audio,
            read_stamp: self.read_stamp,
        };
        self.memory_bytes += entry.mem_size;
        if let Some(old) = self.entries.insert(key, entry) {
            self.memory_bytes -= old.mem_size;
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.memory_bytes -= entry.mem_size;
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFileHeader {
    magic: String,
    version: String,
    data_len: u64,
    data_hash: String,
}

enum DiskCommand {
    Write { path: PathBuf, bytes: Vec<u8> },
    Flush(Sender<()>),
    Shutdown,
}

struct DiskWriter {
    tx: Sender<DiskCommand>,
    handle: Option<JoinHandle<()>>,
}

impl DiskWriter {
    fn spawn() -> Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("smorph-cache-writer".into())
            .spawn(move || writer_loop(rx))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(DiskCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(rx: Receiver<DiskCommand>) {
    for command in rx {
        match command {
            DiskCommand::Write { path, bytes } => {
                if let Err(e) = write_file(&path, &bytes) {
                    warn!("cache: failed to write {}: {}", path.display(), e);
                }
            }
            DiskCommand::Flush(done) => {
                let _ = done.send(());
            }
            DiskCommand::Shutdown => break,
        }
    }
}

/// Write via a temporary file so readers never see a partial file.
fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(TMP_EXTENSION);
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

/// Serialize `audio` into the cache file layout:
/// `[header_len: u32 LE] [bincode header] [bincode audio]`.
fn encode_file(version: &str, audio: &Audio) -> Result<Vec<u8>> {
    let data = bincode::serialize(audio).map_err(|e| Error::CacheFormat(e.to_string()))?;
    let header = CacheFileHeader {
        magic: CACHE_MAGIC.to_string(),
        version: version.to_string(),
        data_len: data.len() as u64,
        data_hash: sha256_hex(&data),
    };
    let header = bincode::serialize(&header).map_err(|e| Error::CacheFormat(e.to_string()))?;

    let mut bytes = Vec::with_capacity(4 + header.len() + data.len());
    bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&data);
    Ok(bytes)
}

fn decode_file(bytes: &[u8], need_version: &str) -> Result<Audio> {
    let format_err = |msg: &str| Error::CacheFormat(msg.to_string());

    let len_bytes: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| format_err("truncated header length"))?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_bytes = bytes
        .get(4..4 + header_len)
        .ok_or_else(|| format_err("truncated header"))?;
    let header: CacheFileHeader =
        bincode::deserialize(header_bytes).map_err(|e| Error::CacheFormat(e.to_string()))?;

    if header.magic != CACHE_MAGIC {
        return Err(format_err("bad magic"));
    }
    if header.version != need_version {
        return Err(Error::CacheFormat(format!(
            "version {} != {}",
            header.version, need_version
        )));
    }
    let data = &bytes[4 + header_len..];
    if data.len() as u64 != header.data_len {
        return Err(format_err("data length mismatch"));
    }
    if sha256_hex(data) != header.data_hash {
        return Err(format_err("data hash mismatch"));
    }
    bincode::deserialize(data).map_err(|e| Error::CacheFormat(e.to_string()))
}

/// Shared encode cache; one instance is shared as `Arc<InstEncCache>` by all
/// builders.
pub struct InstEncCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    next_group_id: AtomicU64,
    writer: Option<DiskWriter>,
}

impl InstEncCache {
    /// Create a cache; creates the cache directory and starts the disk
    /// writer if `config.cache_dir` is set.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let writer = match &config.cache_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Some(DiskWriter::spawn()?)
            }
            None => None,
        };
        Ok(Self {
            config,
            state: Mutex::new(CacheState::default()),
            next_group_id: AtomicU64::new(1),
            writer,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// New group token for tagging lookups.
    pub fn group(&self, name: &str) -> Group {
        Group {
            id: self.next_group_id.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
        }
    }

    /// Lookup counters of one group.
    pub fn group_stats(&self, group: &Group) -> HitCounts {
        self.state
            .lock()
            .group_counts
            .get(&group.id)
            .copied()
            .unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            counts: state.counts,
            entries: state.entries.len(),
            memory_bytes: state.memory_bytes,
            max_memory_bytes: self.config.max_memory_bytes,
        }
    }

    /// Encoded audio for `request`, from cache if possible.
    ///
    /// Returns `Err(Error::Cancelled)` without caching anything if `cancel`
    /// fires during encoding.
    pub fn encode(&self, request: &EncodeRequest<'_>, cancel: &CancelToken) -> Result<Audio> {
        let key = request.key();
        let version = self.config.encoder_version.as_str();

        {
            let mut state = self.state.lock();
            state.read_stamp += 1;
            let stamp = state.read_stamp;
            let hit = match state.entries.get_mut(&key) {
                Some(entry) if entry.version == version => {
                    entry.read_stamp = stamp;
                    Some(Arc::clone(&entry.audio))
                }
                _ => None,
            };
            if let Some(audio) = hit {
                state.record(request.group, Lookup::Memory);
                debug!("cache: memory hit {}", key);
                return Ok(Audio::clone(&audio));
            }
        }

        if let Some(audio) = self.load_file(&key, version) {
            let audio = Arc::new(audio);
            let mut state = self.state.lock();
            state.insert(key.clone(), version, Arc::clone(&audio));
            state.record(request.group, Lookup::Disk);
            debug!("cache: disk hit {}", key);
            return Ok(Audio::clone(&audio));
        }

        debug!("cache: miss {}", key);
        let clipped = request
            .wav_data
            .clipped(request.clip_start, request.clip_end);
        let audio = InstEncoder::new().encode(
            &clipped,
            request.midi_note,
            request.encoder_config,
            cancel,
        )?;

        self.save_file(&key, version, &audio);

        let audio = Arc::new(audio);
        let mut state = self.state.lock();
        state.insert(key, version, Arc::clone(&audio));
        state.record(request.group, Lookup::Miss);
        Ok(Audio::clone(&audio))
    }

    fn file_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.config.cache_dir.as_ref()?;
        Some(dir.join(format!("{}.{}", sha256_hex(key.as_bytes()), CACHE_EXTENSION)))
    }

    fn load_file(&self, key: &str, version: &str) -> Option<Audio> {
        let path = self.file_path(key)?;
        let bytes = fs::read(&path).ok()?;
        match decode_file(&bytes, version) {
            Ok(audio) => {
                let touched = File::options()
                    .write(true)
                    .open(&path)
                    .and_then(|f| f.set_modified(SystemTime::now()));
                if let Err(e) = touched {
                    debug!("cache: can't touch {}: {}", path.display(), e);
                }
                Some(audio)
            }
            Err(e) => {
                debug!("cache: ignoring {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save_file(&self, key: &str, version: &str, audio: &Audio) {
        let (Some(path), Some(writer)) = (self.file_path(key), &self.writer) else {
            return;
        };
        match encode_file(version, audio) {
            Ok(bytes) => {
                let _ = writer.tx.send(DiskCommand::Write { path, bytes });
            }
            Err(e) => warn!("cache: can't serialize {}: {}", key, e),
        }
    }

    /// Block until all queued disk writes are done.
    pub fn flush(&self) {
        if let Some(writer) = &self.writer {
            let (done_tx, done_rx) = crossbeam_channel::bounded(1);
            if writer.tx.send(DiskCommand::Flush(done_tx)).is_ok() {
                let _ = done_rx.recv();
            }
        }
    }

    /// Drop all memory entries; cache files are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.memory_bytes = 0;
    }

    /// Drop memory entries not read within `max_stamp_age` lookups, then the
    /// least recently read ones until memory is within `max_memory_bytes`.
    pub fn delete_old_memory(&self) {
        let mut state = self.state.lock();
        let now = state.read_stamp;
        let max_age = self.config.max_stamp_age;

        let stale: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| now - e.read_stamp > max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            state.remove(key);
        }

        let mut by_age: Vec<(u64, String)> = state
            .entries
            .iter()
            .map(|(k, e)| (e.read_stamp, k.clone()))
            .collect();
        by_age.sort_unstable();

        let mut evicted = stale.len();
        for (_, key) in by_age {
            if state.memory_bytes <= self.config.max_memory_bytes {
                break;
            }
            state.remove(&key);
            evicted += 1;
        }
        if evicted > 0 {
            debug!(
                "cache: evicted {} entries, {} left ({} bytes)",
                evicted,
                state.entries.len(),
                state.memory_bytes
            );
        }
    }

    /// Delete cache files older than `max_file_age`, then the oldest files
    /// beyond `max_files`. Temporary files of interrupted writes are removed
    /// too.
    pub fn delete_old_files(&self) -> Result<()> {
        let Some(dir) = &self.config.cache_dir else {
            return Ok(());
        };

        let now = SystemTime::now();
        let older_than = |modified: SystemTime, max_age: Duration| {
            now.duration_since(modified).is_ok_and(|age| age > max_age)
        };

        let mut keep = Vec::new();
        let mut old = Vec::new();
        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            match path.extension().and_then(|e| e.to_str()) {
                Some(CACHE_EXTENSION) if older_than(modified, self.config.max_file_age) => {
                    old.push((modified, path))
                }
                Some(CACHE_EXTENSION) => keep.push((modified, path)),
                Some(TMP_EXTENSION) if older_than(modified, STALE_TMP_AGE) => {
                    old.push((modified, path))
                }
                _ => {}
            }
        }

        keep.sort_by(|a, b| b.0.cmp(&a.0));
        let excess = keep.split_off(keep.len().min(self.config.max_files));

        let mut deleted = 0;
        for (_, path) in old.iter().chain(&excess) {
            match fs::remove_file(path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("cache: failed to delete {}: {}", path.display(), e),
            }
        }
        if deleted > 0 {
            debug!("cache: deleted {} files", deleted);
        }
        Ok(())
    }

    /// Number of entries held in memory.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smorph_core::hash::samples_hash;
    use smorph_core::EncoderEntry;

    fn sine(len: usize) -> WavData {
        let samples = (0..len)
            .map(|i| (0.3 * (2.0 * std::f64::consts::PI * 440.0 * i as f64 / 48000.0).sin()) as f32)
            .collect();
        WavData::mono(samples, 48000.0)
    }

    fn request<'a>(wav: &'a WavData, hash: &'a str, cfg: &'a EncoderConfig) -> EncodeRequest<'a> {
        EncodeRequest {
            wav_data: wav,
            wav_data_hash: hash,
            midi_note: 69,
            clip_start: 0,
            clip_end: wav.n_values(),
            encoder_config: cfg,
            group: None,
        }
    }

    #[test]
    fn test_key_components() {
        let wav = sine(100);
        let cfg = EncoderConfig {
            enabled: true,
            entries: vec![EncoderEntry::new("min-frame-size", "30")],
        };
        let req = request(&wav, "abc", &cfg);
        let key = req.key();
        assert!(key.starts_with("abc_48000_0_100_69_"));
        assert!(key.ends_with(&cfg.cache_key()));

        let other_rate = WavData::mono(wav.samples().to_vec(), 44100.0);
        let req2 = EncodeRequest {
            wav_data: &other_rate,
            ..req
        };
        assert_ne!(req2.key(), key);
    }

    #[test]
    fn test_memory_hit() {
        let cache = InstEncCache::new(CacheConfig::default()).unwrap();
        let wav = sine(4800);
        let hash = samples_hash(wav.samples());
        let cfg = EncoderConfig::default();
        let group = cache.group("test");
        let req = EncodeRequest {
            group: Some(&group),
            ..request(&wav, &hash, &cfg)
        };

        let a = cache.encode(&req, &CancelToken::new()).unwrap();
        let b = cache.encode(&req, &CancelToken::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);

        let counts = cache.group_stats(&group);
        assert_eq!(counts.misses, 1);
        assert_eq!(counts.memory_hits, 1);
        assert_eq!(cache.stats().counts, counts);
        assert_eq!(counts.hit_rate(), 0.5);
    }

    #[test]
    fn test_cancel_caches_nothing() {
        let cache = InstEncCache::new(CacheConfig::default()).unwrap();
        let wav = sine(4800);
        let cfg = EncoderConfig::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = cache.encode(&request(&wav, "h", &cfg), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_file_roundtrip_checks_version_and_hash() {
        let audio = Audio {
            fundamental_freq: 440.0,
            mix_freq: 48000.0,
            ..Default::default()
        };
        let bytes = encode_file("v1", &audio).unwrap();
        assert_eq!(decode_file(&bytes, "v1").unwrap(), audio);
        assert!(decode_file(&bytes, "v2").is_err());

        let mut corrupt = bytes.clone();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        assert!(decode_file(&corrupt, "v1").is_err());
        assert!(decode_file(&bytes[..3], "v1").is_err());
    }

    #[test]
    fn test_delete_old_memory_by_stamp() {
        let config = CacheConfig::default().with_max_stamp_age(2);
        let cache = InstEncCache::new(config).unwrap();
        let cfg = EncoderConfig::default();
        let wavs: Vec<WavData> = (0..3).map(|i| sine(2400 + i * 100)).collect();
        let hashes: Vec<String> = wavs.iter().map(|w| samples_hash(w.samples())).collect();

        for (wav, hash) in wavs.iter().zip(&hashes) {
            cache.encode(&request(wav, hash, &cfg), &CancelToken::new()).unwrap();
        }
        // keep the first one fresh
        cache
            .encode(&request(&wavs[0], &hashes[0], &cfg), &CancelToken::new())
            .unwrap();
        cache
            .encode(&request(&wavs[0], &hashes[0], &cfg), &CancelToken::new())
            .unwrap();

        cache.delete_old_memory();
        assert_eq!(cache.len(), 2);

        let cache_zero = InstEncCache::new(CacheConfig::default().with_max_memory_bytes(0)).unwrap();
        cache_zero
            .encode(&request(&wavs[0], &hashes[0], &cfg), &CancelToken::new())
            .unwrap();
        cache_zero.delete_old_memory();
        assert!(cache_zero.is_empty());
        assert_eq!(cache_zero.stats().memory_bytes, 0);
    }
}
