//! A seekable, progressively-filled byte stream over fixed-size CDN
//! chunks, ported from `AbsChunkedInputStream.py` with
//! `parking_lot::Condvar` standing in for the Python `threading.Condition`.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Chunk size the stream aligns reads/fetches to: 128 KiB.
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Ceiling on per-chunk retry attempts, regardless of configuration.
const MAX_CHUNK_TRIES: u32 = 128;

/// Below this many retries a chunk is always retried (the "preload"
/// window); beyond it retrying requires `retry_on_chunk_error`.
const PRELOAD_RETRY_THRESHOLD: u32 = 2;

/// Decouples the stream's blocking-read state machine from how a chunk
/// is actually fetched, so the stream can be unit-tested with a fake
/// fetcher instead of a live CDN connection.
pub trait ChunkFetcher: Send + Sync {
    /// Fetch and decrypt chunk `index`. Called on a worker, never on the
    /// reader's thread.
    fn fetch(&self, index: u64) -> Result<Vec<u8>>;
    /// Run `job` on the shared worker pool.
    fn spawn(&self, job: Box<dyn FnOnce() + Send>);
}

/// Fired in matched pairs around a blocking wait, for halt/resume
/// telemetry.
pub trait StreamCallbacks: Send + Sync {
    fn stream_read_halted(&self, _chunk: u64, _now_ms: u64) {}
    fn stream_read_resumed(&self, _chunk: u64, _now_ms: u64) {}
}

struct NoopCallbacks;
impl StreamCallbacks for NoopCallbacks {}

struct State {
    requested: Vec<bool>,
    available: Vec<bool>,
    buffers: Vec<Option<Vec<u8>>>,
    retries: Vec<u32>,
    errors: Vec<Option<String>>,
    pos: u64,
    mark: Option<u64>,
    closed: bool,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A chunked, seekable stream over a CDN-delivered file. Implements
/// [`Read`] and [`Seek`]; reads block until the relevant chunk has
/// arrived, scheduling fetch and prefetch jobs as needed.
pub struct ChunkedStream {
    fetcher: Arc<dyn ChunkFetcher>,
    callbacks: Arc<dyn StreamCallbacks>,
    retry_on_chunk_error: bool,
    size: u64,
    chunk_count: u64,
    state: Arc<(Mutex<State>, Condvar)>,
}

impl ChunkedStream {
    /// Build a stream over a file of `size` bytes, with chunk 0 already
    /// fetched and decrypted (as produced by `CdnFile::probe`).
    pub fn new(
        fetcher: Arc<dyn ChunkFetcher>,
        size: u64,
        first_chunk: Vec<u8>,
        retry_on_chunk_error: bool,
    ) -> ChunkedStream {
        let chunk_count = size.div_ceil(CHUNK_SIZE as u64).max(1);
        let n = chunk_count as usize;
        let mut requested = vec![false; n];
        let mut available = vec![false; n];
        let mut buffers = vec![None; n];
        requested[0] = true;
        available[0] = true;
        buffers[0] = Some(first_chunk);

        let state = State {
            requested,
            available,
            buffers,
            retries: vec![0; n],
            errors: vec![None; n],
            pos: 0,
            mark: None,
            closed: false,
        };

        ChunkedStream {
            fetcher,
            callbacks: Arc::new(NoopCallbacks),
            retry_on_chunk_error,
            size,
            chunk_count,
            state: Arc::new((Mutex::new(state), Condvar::new())),
        }
    }

    /// Attach halt/resume telemetry callbacks.
    pub fn with_callbacks(mut self, callbacks: Arc<dyn StreamCallbacks>) -> ChunkedStream {
        self.callbacks = callbacks;
        self
    }

    /// Total size of the underlying file.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes remaining from the current position to the end.
    pub fn available(&self) -> u64 {
        let (state, _) = &*self.state;
        let pos = state.lock().pos;
        self.size.saturating_sub(pos)
    }

    /// Current read position.
    pub fn pos(&self) -> u64 {
        self.state.0.lock().pos
    }

    /// Mark the current position for a later [`ChunkedStream::reset`].
    pub fn mark(&self) {
        let mut state = self.state.0.lock();
        let pos = state.pos;
        state.mark = Some(pos);
    }

    /// Seek back to the last [`ChunkedStream::mark`], if one was set.
    pub fn reset(&self) {
        let mut state = self.state.0.lock();
        if let Some(mark) = state.mark {
            state.pos = mark;
        }
    }

    /// Skip forward by `n` bytes.
    pub fn skip(&self, n: u64) {
        let mut state = self.state.0.lock();
        state.pos = (state.pos + n).min(self.size);
    }

    /// Mark closed and wake every waiter; further reads return EOF.
    pub fn close(&self) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock();
        state.closed = true;
        cvar.notify_all();
    }

    fn should_retry(&self, retries: u32) -> bool {
        if retries >= MAX_CHUNK_TRIES {
            return false;
        }
        retries < PRELOAD_RETRY_THRESHOLD || self.retry_on_chunk_error
    }

    /// Mark `chunk` requested if it wasn't already. Returns whether it was
    /// newly marked, so the caller can spawn its fetch after dropping the
    /// lock — never while `state` is held, since the fetch job re-locks
    /// the same mutex on completion (an inline fetcher would self-deadlock).
    fn mark_requested_locked(state: &mut State, chunk: u64) -> bool {
        let idx = chunk as usize;
        if state.requested[idx] {
            return false;
        }
        state.requested[idx] = true;
        true
    }

    fn ensure_requested(&self, chunk: u64) {
        let newly_requested = {
            let mut state = self.state.0.lock();
            Self::mark_requested_locked(&mut state, chunk)
        };
        if newly_requested {
            self.spawn_fetch(chunk);
        }
    }

    fn schedule_prefetch(&self, chunk: u64) {
        let last = self.chunk_count - 1;
        let end = (chunk + 3).min(last + 1);
        let to_spawn: Vec<u64> = {
            let mut state = self.state.0.lock();
            (chunk + 1..end)
                .filter(|&c| {
                    state.retries[c as usize] < PRELOAD_RETRY_THRESHOLD
                        && Self::mark_requested_locked(&mut state, c)
                })
                .collect()
        };
        for c in to_spawn {
            self.spawn_fetch(c);
        }
    }

    fn spawn_fetch(&self, chunk: u64) {
        let fetcher = self.fetcher.clone();
        let state_handle = self.state.clone();
        self.fetcher.spawn(Box::new(move || {
            let result = fetcher.fetch(chunk);
            let (lock, cvar) = &*state_handle;
            let mut state = lock.lock();
            let idx = chunk as usize;
            match result {
                Ok(bytes) => {
                    state.buffers[idx] = Some(bytes);
                    state.available[idx] = true;
                    state.errors[idx] = None;
                }
                Err(e) => {
                    state.available[idx] = false;
                    state.requested[idx] = false;
                    state.retries[idx] += 1;
                    state.errors[idx] = Some(e.to_string());
                }
            }
            cvar.notify_all();
        }));
    }

    /// Read up to `buf.len()` bytes starting at the stream's current
    /// position, blocking on chunk availability as needed.
    pub fn read_into(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.pos() >= self.size {
            return Ok(0);
        }

        let mut written = 0;
        while written < buf.len() {
            let pos = self.state.0.lock().pos;
            if pos >= self.size {
                break;
            }
            let chunk = pos / CHUNK_SIZE as u64;
            let offset_in_chunk = (pos % CHUNK_SIZE as u64) as usize;

            self.ensure_requested(chunk);
            self.schedule_prefetch(chunk);

            let (lock, cvar) = &*self.state;
            let mut state = lock.lock();
            let idx = chunk as usize;

            let mut halted = false;
            loop {
                if state.closed {
                    return Ok(written);
                }
                if state.available[idx] {
                    break;
                }
                if let Some(err) = state.errors[idx].take() {
                    let retries = state.retries[idx];
                    if self.should_retry(retries) {
                        drop(state);
                        let backoff = (retries as f64).max(1.0).log10();
                        if backoff > 0.0 {
                            std::thread::sleep(Duration::from_secs_f64(backoff));
                        }
                        self.ensure_requested(chunk);
                        state = lock.lock();
                        continue;
                    }
                    warn!(chunk, error = %err, "chunk exhausted retries");
                    return Err(Error::ChunkError(chunk as usize));
                }
                if !halted {
                    self.callbacks.stream_read_halted(chunk, now_ms());
                    halted = true;
                }
                cvar.wait(&mut state);
            }
            if halted {
                self.callbacks.stream_read_resumed(chunk, now_ms());
            }

            let chunk_buf = state.buffers[idx].as_ref().expect("available implies buffer set");
            let available_in_chunk = chunk_buf.len().saturating_sub(offset_in_chunk);
            let to_copy = available_in_chunk.min(buf.len() - written);
            if to_copy == 0 {
                break;
            }
            buf[written..written + to_copy]
                .copy_from_slice(&chunk_buf[offset_in_chunk..offset_in_chunk + to_copy]);
            written += to_copy;
            state.pos += to_copy as u64;
        }

        Ok(written)
    }
}

impl Read for ChunkedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_into(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

impl Seek for ChunkedStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.state.0.lock();
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.size as i64 + delta,
            SeekFrom::Current(delta) => state.pos as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to negative position",
            ));
        }
        if new_pos as u64 > self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek past end of stream",
            ));
        }
        state.pos = new_pos as u64;
        debug!(pos = state.pos, "seeked chunked stream");
        Ok(state.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ImmediateFetcher {
        chunk_value: u8,
        fail_first_n: AtomicUsize,
    }

    impl ChunkFetcher for ImmediateFetcher {
        fn fetch(&self, index: u64) -> Result<Vec<u8>> {
            if self.fail_first_n.load(Ordering::SeqCst) > 0 {
                self.fail_first_n.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::FeederError("simulated failure".to_string()));
            }
            Ok(vec![self.chunk_value; CHUNK_SIZE.min(((index + 1) * CHUNK_SIZE as u64) as usize)])
        }

        fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
            job();
        }
    }

    #[test]
    fn reads_first_chunk_directly_from_preloaded_buffer() {
        let fetcher = Arc::new(ImmediateFetcher {
            chunk_value: 7,
            fail_first_n: AtomicUsize::new(0),
        });
        let stream = ChunkedStream::new(fetcher, CHUNK_SIZE as u64 * 2, vec![7u8; CHUNK_SIZE], true);
        let mut buf = [0u8; 16];
        let n = stream.read_into(&mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(buf, [7u8; 16]);
    }

    #[test]
    fn reads_across_chunk_boundary_via_fetch() {
        let fetcher = Arc::new(ImmediateFetcher {
            chunk_value: 3,
            fail_first_n: AtomicUsize::new(0),
        });
        let stream = ChunkedStream::new(fetcher, CHUNK_SIZE as u64 * 2, vec![3u8; CHUNK_SIZE], true);
        let mut stream = stream;
        stream.seek(SeekFrom::Start(CHUNK_SIZE as u64 - 4)).unwrap();
        let mut buf = [0u8; 8];
        let n = std::io::Read::read(&mut stream, &mut buf).unwrap();
        assert_eq!(n, 8);
    }

    #[test]
    fn seek_past_end_is_rejected() {
        let fetcher = Arc::new(ImmediateFetcher {
            chunk_value: 1,
            fail_first_n: AtomicUsize::new(0),
        });
        let mut stream = ChunkedStream::new(fetcher, CHUNK_SIZE as u64 * 2, vec![1u8; CHUNK_SIZE], true);
        let err = stream.seek(SeekFrom::End(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn closing_wakes_blocked_reader_with_zero() {
        struct NeverFetcher;
        impl ChunkFetcher for NeverFetcher {
            fn fetch(&self, _index: u64) -> Result<Vec<u8>> {
                std::thread::sleep(Duration::from_secs(10));
                Ok(vec![])
            }
            fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
                std::thread::spawn(job);
            }
        }
        let fetcher: Arc<dyn ChunkFetcher> = Arc::new(NeverFetcher);
        let stream = Arc::new(ChunkedStream::new(fetcher, CHUNK_SIZE as u64 * 2, vec![0u8; CHUNK_SIZE], true));
        stream.skip(CHUNK_SIZE as u64);

        let reader_stream = stream.clone();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 4];
            reader_stream.read_into(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(50));
        stream.close();
        let result = handle.join().unwrap().unwrap();
        assert_eq!(result, 0);
    }

    #[test]
    fn retries_below_threshold_then_succeeds() {
        let fetcher = Arc::new(ImmediateFetcher {
            chunk_value: 5,
            fail_first_n: AtomicUsize::new(1),
        });
        let stream = ChunkedStream::new(fetcher, CHUNK_SIZE as u64 * 2, vec![5u8; CHUNK_SIZE], true);
        stream.skip(CHUNK_SIZE as u64);
        let mut buf = [0u8; 4];
        let n = stream.read_into(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [5u8; 4]);
    }
}
