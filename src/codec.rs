//! Snapshot envelope codec
//!
//! A snapshot is a fixed header followed by a zlib-compressed copy of the
//! emulator's serialized state. Compression runs at the fastest level; a
//! rollback may save and load several states inside one displayed frame, so
//! latency wins over ratio. The checksum (xxh3, SIMD-optimized) covers the
//! *uncompressed* bytes and travels beside the envelope so peers can compare
//! states without decompressing.

use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use xxhash_rust::xxh3::xxh3_64;

use crate::emulator::EmulatedSystem;
use crate::error::NetplayError;
use crate::pool::{PooledBuffer, StateBufferPool};

/// Envelope magic, "RBKS"
pub const SNAPSHOT_MAGIC: u32 = 0x5242_4B53;

/// Envelope format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = std::mem::size_of::<SnapshotHeader>();

/// Headroom kept free in every buffer for incompressible payloads
pub const COMPRESSION_SLACK: usize = 1024;

/// Successful saves between periodic performance log lines
const STATS_LOG_INTERVAL: u64 = 100;

/// Fixed snapshot header, native byte order
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SnapshotHeader {
    /// Always [`SNAPSHOT_MAGIC`]
    pub magic: u32,
    /// Always [`SNAPSHOT_VERSION`]
    pub version: u32,
    /// Frame the state was captured at
    pub frame: u32,
    /// Payload size before compression
    pub uncompressed_size: u32,
    /// Payload size after compression
    pub compressed_size: u32,
    /// Deterministic RNG seed at capture time
    pub determinism_seed: u32,
    /// Input-sequence counter at capture time, restored on load
    pub input_sequence: u32,
    /// Reserved for future use
    pub reserved: [u32; 2],
}

/// A serialized snapshot ready to hand to the transport engine
///
/// The buffer belongs to the codec's pool; release it with
/// [`StateCodec::free`] once the engine is done with it.
#[derive(Debug)]
pub struct Snapshot {
    /// Envelope buffer (header + compressed payload at the front)
    pub buffer: PooledBuffer,
    /// Total envelope length in bytes
    pub len: usize,
    /// xxh3 checksum of the uncompressed payload
    pub checksum: u64,
}

/// Result of a successful load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Input-sequence value recorded at save time; the session rewinds its
    /// counter to this after the restore succeeds
    pub input_sequence: u32,
    /// Checksum recomputed over the decompressed payload
    pub checksum: u64,
}

/// Cumulative codec activity, for the save/load hot path
///
/// Successful operations only; failed saves and loads are not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecStats {
    /// Snapshots serialized
    pub saves: u64,
    /// Snapshots restored
    pub loads: u64,
    /// Wall time spent serializing
    pub save_time: Duration,
    /// Wall time spent restoring
    pub load_time: Duration,
    /// Uncompressed payload bytes across all saves
    pub raw_bytes: u64,
    /// Compressed payload bytes across all saves
    pub compressed_bytes: u64,
}

impl CodecStats {
    /// Compressed fraction of the raw payload, 0 when nothing was saved
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            0.0
        } else {
            self.compressed_bytes as f64 / self.raw_bytes as f64
        }
    }
}

/// Serializes and restores snapshot envelopes using a buffer pool
pub struct StateCodec {
    pool: StateBufferPool,
    stats: CodecStats,
}

impl StateCodec {
    /// Create a codec over the given pool
    pub fn new(pool: StateBufferPool) -> Self {
        Self {
            pool,
            stats: CodecStats::default(),
        }
    }

    /// Create a codec with default pool sizing
    pub fn with_defaults() -> Self {
        Self::new(StateBufferPool::with_defaults())
    }

    /// Capture the emulated system's state into a snapshot envelope
    ///
    /// Uses two pooled buffers: a scratch buffer the system serializes into
    /// and the envelope buffer the compressed payload lands in. Every
    /// failure path releases whatever was acquired.
    pub fn save(
        &mut self,
        system: &mut dyn EmulatedSystem,
        frame: u32,
        input_sequence: u32,
    ) -> Result<Snapshot, NetplayError> {
        let started = Instant::now();
        let mut envelope = self.pool.acquire().ok_or(NetplayError::ResourceExhausted)?;
        let mut scratch = match self.pool.acquire() {
            Some(buffer) => buffer,
            None => {
                self.pool.release(envelope);
                return Err(NetplayError::ResourceExhausted);
            }
        };

        let result = Self::save_into(system, frame, input_sequence, &mut scratch, &mut envelope);
        self.pool.release(scratch);

        match result {
            Ok((len, checksum, raw_len)) => {
                self.stats.saves += 1;
                self.stats.save_time += started.elapsed();
                self.stats.raw_bytes += raw_len as u64;
                self.stats.compressed_bytes += (len - HEADER_SIZE) as u64;
                if self.stats.saves % STATS_LOG_INTERVAL == 0 {
                    self.log_stats();
                }
                Ok(Snapshot {
                    buffer: envelope,
                    len,
                    checksum,
                })
            }
            Err(err) => {
                self.pool.release(envelope);
                Err(err)
            }
        }
    }

    fn save_into(
        system: &mut dyn EmulatedSystem,
        frame: u32,
        input_sequence: u32,
        scratch: &mut PooledBuffer,
        envelope: &mut PooledBuffer,
    ) -> Result<(usize, u64, usize), NetplayError> {
        let raw_len = system
            .save_state(scratch.as_mut_slice())
            .map_err(|e| NetplayError::Codec(format!("state save failed: {e}")))?;
        if raw_len > scratch.capacity() {
            return Err(NetplayError::Codec(format!(
                "system reported {raw_len} state bytes into a {} byte buffer",
                scratch.capacity()
            )));
        }
        // An undersized pool shows up here, never as pool corruption.
        if raw_len + HEADER_SIZE + COMPRESSION_SLACK > envelope.capacity() {
            return Err(NetplayError::Codec(format!(
                "state of {raw_len} bytes exceeds snapshot buffer capacity {}",
                envelope.capacity()
            )));
        }

        let raw = &scratch.as_slice()[..raw_len];
        let checksum = xxh3_64(raw);

        let mut compressor = Compress::new(Compression::fast(), true);
        let status = compressor
            .compress(
                raw,
                &mut envelope.as_mut_slice()[HEADER_SIZE..],
                FlushCompress::Finish,
            )
            .map_err(|e| NetplayError::Codec(format!("compression failed: {e}")))?;
        if status != Status::StreamEnd {
            return Err(NetplayError::Codec(
                "compressed state did not fit in snapshot buffer".to_string(),
            ));
        }
        let compressed_size = compressor.total_out() as usize;

        let header = SnapshotHeader {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            frame,
            uncompressed_size: raw_len as u32,
            compressed_size: compressed_size as u32,
            determinism_seed: system.determinism_seed(),
            input_sequence,
            reserved: [0; 2],
        };
        envelope.as_mut_slice()[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));

        Ok((HEADER_SIZE + compressed_size, checksum, raw_len))
    }

    /// Restore the emulated system from a snapshot envelope
    ///
    /// Header validation runs before any decompression; the restore runs
    /// before the input-sequence rewind value is surfaced, so bookkeeping
    /// can never diverge from a restore that did not happen.
    pub fn load(
        &mut self,
        system: &mut dyn EmulatedSystem,
        bytes: &[u8],
    ) -> Result<LoadOutcome, NetplayError> {
        if bytes.len() <= HEADER_SIZE {
            return Err(NetplayError::Size(format!(
                "snapshot of {} bytes is no larger than its header",
                bytes.len()
            )));
        }

        let header: SnapshotHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
        if header.magic != SNAPSHOT_MAGIC {
            return Err(NetplayError::Format(format!(
                "bad magic {:#010x}",
                header.magic
            )));
        }
        if header.version != SNAPSHOT_VERSION {
            return Err(NetplayError::Format(format!(
                "unsupported version {}",
                header.version
            )));
        }

        let compressed_size = header.compressed_size as usize;
        let uncompressed_size = header.uncompressed_size as usize;
        if HEADER_SIZE + compressed_size > bytes.len() {
            return Err(NetplayError::Size(format!(
                "declared payload of {compressed_size} bytes overruns {} byte envelope",
                bytes.len()
            )));
        }
        if uncompressed_size > self.pool.buffer_size() {
            return Err(NetplayError::Size(format!(
                "declared state of {uncompressed_size} bytes exceeds buffer capacity"
            )));
        }

        let started = Instant::now();
        let mut scratch = self.pool.acquire().ok_or(NetplayError::ResourceExhausted)?;
        let result = Self::load_from(system, &header, bytes, &mut scratch);
        self.pool.release(scratch);
        if result.is_ok() {
            self.stats.loads += 1;
            self.stats.load_time += started.elapsed();
        }
        result
    }

    fn load_from(
        system: &mut dyn EmulatedSystem,
        header: &SnapshotHeader,
        bytes: &[u8],
        scratch: &mut PooledBuffer,
    ) -> Result<LoadOutcome, NetplayError> {
        let compressed = &bytes[HEADER_SIZE..HEADER_SIZE + header.compressed_size as usize];

        let mut decompressor = Decompress::new(true);
        let status = decompressor
            .decompress(compressed, scratch.as_mut_slice(), FlushDecompress::Finish)
            .map_err(|e| NetplayError::Codec(format!("decompression failed: {e}")))?;
        if status != Status::StreamEnd {
            return Err(NetplayError::Codec(
                "truncated compressed payload".to_string(),
            ));
        }
        let produced = decompressor.total_out() as usize;
        if produced != header.uncompressed_size as usize {
            return Err(NetplayError::Codec(format!(
                "decompressed to {produced} bytes, header declared {}",
                header.uncompressed_size
            )));
        }

        let raw = &scratch.as_slice()[..produced];
        let checksum = xxh3_64(raw);

        system
            .load_state(raw)
            .map_err(|e| NetplayError::Restore(format!("{e}")))?;

        Ok(LoadOutcome {
            input_sequence: header.input_sequence,
            checksum,
        })
    }

    /// Return a snapshot buffer to the pool
    pub fn free(&mut self, buffer: PooledBuffer) {
        self.pool.release(buffer);
    }

    /// The underlying pool
    pub fn pool(&self) -> &StateBufferPool {
        &self.pool
    }

    /// Cumulative save/load performance counters
    pub fn stats(&self) -> CodecStats {
        self.stats
    }

    fn log_stats(&self) {
        let stats = &self.stats;
        let avg_save = stats
            .save_time
            .checked_div(stats.saves.max(1) as u32)
            .unwrap_or_default();
        let avg_load = stats
            .load_time
            .checked_div(stats.loads.max(1) as u32)
            .unwrap_or_default();
        log::debug!(
            "state codec: {} saves (avg {avg_save:?}), {} loads (avg {avg_load:?}), \
             compression {:.1}%",
            stats.saves,
            stats.loads,
            stats.compression_ratio() * 100.0
        );
    }
}
