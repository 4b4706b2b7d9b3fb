//! Non-blocking staging buffer between a scenario's byte source and the mixer.
//!
//! Storage and cursors live behind one short critical section that only ever
//! covers memory copies. The source itself sits behind a second lock that is
//! held by `fill` for the duration of the (possibly slow) upstream read, so a
//! tick reading buffered audio never waits on decoding or network I/O.

use log::{debug, trace, warn};
use rayon::ThreadPool;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{MixerError, MixerResult};

use super::format::AudioFormat;
use super::resource::AudioSource;

struct Storage {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    closed: bool,
    failure: Option<(io::ErrorKind, String)>,
}

impl Storage {
    fn available(&self) -> usize {
        self.write_pos - self.read_pos
    }

    fn align(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    fn append(&mut self, bytes: &[u8]) {
        let end = self.write_pos + bytes.len();
        self.data[self.write_pos..end].copy_from_slice(bytes);
        self.write_pos = end;
    }

    fn failure(&self) -> Option<io::Error> {
        self.failure
            .as_ref()
            .map(|(kind, message)| io::Error::new(*kind, message.clone()))
    }
}

struct SourceSlot {
    source: Box<dyn AudioSource>,
    scratch: Vec<u8>,
}

/// Frame-aligned byte buffer fed from an [`AudioSource`].
pub struct AudioInputBuffer {
    format: AudioFormat,
    capacity: usize,
    live: bool,
    storage: Mutex<Storage>,
    source: Mutex<SourceSlot>,
    fill_queued: AtomicBool,
}

impl AudioInputBuffer {
    /// Create a buffer of at least `capacity` bytes, rounded up to whole frames.
    pub fn new(source: Box<dyn AudioSource>, live: bool, capacity: usize) -> Self {
        let format = source.format();
        let capacity = format.round_up_to_frame(capacity.max(1));
        Self {
            format,
            capacity,
            live,
            storage: Mutex::new(Storage {
                data: vec![0; capacity],
                read_pos: 0,
                write_pos: 0,
                closed: false,
                failure: None,
            }),
            source: Mutex::new(SourceSlot {
                source,
                scratch: Vec::new(),
            }),
            fill_queued: AtomicBool::new(false),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// True once the source reported end of data, failed, or was cancelled.
    pub fn is_closed(&self) -> bool {
        self.storage.lock().unwrap().closed
    }

    /// Number of buffered, unread bytes.
    pub fn available(&self) -> usize {
        self.storage.lock().unwrap().available()
    }

    /// Return true when `bytes` can be read right now.
    ///
    /// An unaligned buffer with an open source is compacted first so the
    /// next fill can use the freed space.
    pub fn can_read(&self, bytes: usize) -> bool {
        let mut storage = self.storage.lock().unwrap();
        if storage.read_pos != 0 && !storage.closed {
            storage.align();
        }
        storage.available() >= bytes
    }

    /// Copy exactly `dst.len()` bytes out of the buffer.
    ///
    /// The length must be a whole number of frames and must be available.
    pub fn read(&self, dst: &mut [u8]) -> MixerResult<()> {
        self.format.check_aligned(dst.len())?;
        let mut storage = self.storage.lock().unwrap();
        if let Some(err) = storage.failure() {
            return Err(MixerError::Io(err));
        }
        let available = storage.available();
        if available < dst.len() {
            return Err(MixerError::Underflow {
                requested: dst.len(),
                available,
            });
        }
        let start = storage.read_pos;
        dst.copy_from_slice(&storage.data[start..start + dst.len()]);
        storage.read_pos += dst.len();
        if storage.read_pos == storage.write_pos {
            storage.read_pos = 0;
            storage.write_pos = 0;
        }
        Ok(())
    }

    /// Drain whatever is left once the source is closed.
    ///
    /// Returns the number of bytes copied; less than `dst.len()` means the
    /// buffer is now empty.
    pub fn read_remaining(&self, dst: &mut [u8]) -> MixerResult<usize> {
        self.format.check_aligned(dst.len())?;
        let mut storage = self.storage.lock().unwrap();
        if let Some(err) = storage.failure() {
            return Err(MixerError::Io(err));
        }
        if !storage.closed {
            return Err(MixerError::SourceOpen);
        }
        let count = storage.available().min(dst.len());
        let start = storage.read_pos;
        dst[..count].copy_from_slice(&storage.data[start..start + count]);
        storage.read_pos += count;
        Ok(count)
    }

    /// Compact unread bytes to the start of the buffer.
    pub fn align(&self) {
        let _fill = self.source.lock().unwrap();
        self.storage.lock().unwrap().align();
    }

    /// Pull bytes from the source into free space.
    ///
    /// Returns the number of bytes appended. End of data closes the buffer;
    /// an upstream error closes it and is reported by the next read.
    pub fn fill(&self) -> io::Result<usize> {
        let mut slot = self.source.lock().unwrap();
        if self.live {
            self.fill_live(&mut slot)
        } else {
            self.fill_to_capacity(&mut slot)
        }
    }

    fn fill_to_capacity(&self, slot: &mut SourceSlot) -> io::Result<usize> {
        let frame_size = self.format.frame_size();
        let mut appended = 0;
        loop {
            let space = {
                let mut storage = self.storage.lock().unwrap();
                if storage.closed {
                    return Ok(appended);
                }
                storage.align();
                let free = self.capacity - storage.write_pos;
                free - free % frame_size
            };
            if space == 0 {
                return Ok(appended);
            }

            slot.scratch.resize(space, 0);
            let count = match slot.source.read(&mut slot.scratch[..space]) {
                Ok(count) => count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.record_failure(err)),
            };

            let mut storage = self.storage.lock().unwrap();
            if count == 0 {
                storage.closed = true;
                debug!("input source exhausted ({} bytes still buffered)", storage.available());
                return Ok(appended);
            }
            // A concurrent align can only have moved write_pos down.
            storage.append(&slot.scratch[..count]);
            appended += count;
        }
    }

    fn fill_live(&self, slot: &mut SourceSlot) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        slot.scratch.resize(self.capacity, 0);
        let count = loop {
            match slot.source.read(&mut slot.scratch) {
                Ok(count) => break count,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.record_failure(err)),
            }
        };

        if let Err(err) = self.format.check_aligned(count) {
            return Err(self.record_failure(io::Error::new(
                io::ErrorKind::InvalidData,
                err.to_string(),
            )));
        }

        let mut storage = self.storage.lock().unwrap();
        if count == 0 {
            storage.closed = true;
            return Ok(0);
        }
        if storage.closed {
            return Ok(0);
        }
        storage.align();
        if count > self.capacity - storage.write_pos {
            trace!("dropping {} byte live chunk, buffer full", count);
            return Ok(0);
        }
        storage.append(&slot.scratch[..count]);
        Ok(count)
    }

    fn record_failure(&self, err: io::Error) -> io::Error {
        warn!("input source failed: {}", err);
        let mut storage = self.storage.lock().unwrap();
        storage.closed = true;
        storage.failure = Some((err.kind(), err.to_string()));
        err
    }

    /// Mark the buffer closed so background readers stop after their
    /// current read.
    pub fn cancel(&self) {
        self.storage.lock().unwrap().closed = true;
    }

    /// Queue a refill on `pool` unless one is already waiting.
    pub fn schedule_fill(self: &Arc<Self>, pool: &ThreadPool) {
        if self.live || self.fill_queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let buffer = Arc::clone(self);
        pool.spawn(move || {
            buffer.fill_queued.store(false, Ordering::Release);
            let _ = buffer.fill();
        });
    }

    /// Spawn the dedicated reader that keeps a live buffer topped up.
    pub fn spawn_live_reader(self: &Arc<Self>, name: String) -> io::Result<JoinHandle<()>> {
        let buffer = Arc::clone(self);
        thread::Builder::new().name(name).spawn(move || {
            while !buffer.is_closed() {
                if buffer.fill().is_err() {
                    break;
                }
            }
            trace!("live reader finished");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleWidth;
    use crate::audio::resource::{AudioResource, MemoryResource};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::Duration;

    fn mono16() -> AudioFormat {
        AudioFormat::new(8_000, SampleWidth::Sixteen, 1, false)
    }

    fn buffer_over(bytes: Vec<u8>, capacity: usize) -> AudioInputBuffer {
        let resource = MemoryResource::new(bytes, mono16());
        AudioInputBuffer::new(resource.open().unwrap(), false, capacity)
    }

    /// Source that hands out one queued chunk per read and blocks otherwise.
    struct GatedSource {
        chunks: Receiver<Vec<u8>>,
    }

    impl AudioSource for GatedSource {
        fn format(&self) -> AudioFormat {
            mono16()
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.recv() {
                Ok(chunk) => {
                    let count = chunk.len().min(buf.len());
                    buf[..count].copy_from_slice(&chunk[..count]);
                    Ok(count)
                }
                Err(_) => Ok(0),
            }
        }
    }

    fn gated(live: bool, capacity: usize) -> (Arc<AudioInputBuffer>, Sender<Vec<u8>>) {
        let (sender, chunks) = mpsc::channel();
        let buffer = AudioInputBuffer::new(Box::new(GatedSource { chunks }), live, capacity);
        (Arc::new(buffer), sender)
    }

    struct FailingSource;

    impl AudioSource for FailingSource {
        fn format(&self) -> AudioFormat {
            mono16()
        }

        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    #[test]
    fn capacity_rounds_up_to_whole_frames() {
        let buffer = buffer_over(vec![], 7);
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    fn drained_buffer_needs_a_refill_before_reading_again() {
        let buffer = buffer_over((0..32).collect(), 8);
        assert_eq!(buffer.fill().unwrap(), 8);
        assert!(buffer.can_read(8));

        let mut out = [0_u8; 8];
        buffer.read(&mut out).unwrap();
        assert_eq!(out, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(!buffer.can_read(1));

        buffer.align();
        assert!(!buffer.can_read(1));
        buffer.fill().unwrap();
        assert!(buffer.can_read(8));
        buffer.read(&mut out).unwrap();
        assert_eq!(out, [8, 9, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn partial_reads_leave_room_after_alignment() {
        let buffer = buffer_over((0..12).collect(), 8);
        buffer.fill().unwrap();
        let mut out = [0_u8; 4];
        buffer.read(&mut out).unwrap();

        assert!(buffer.can_read(4));
        assert_eq!(buffer.fill().unwrap(), 4);
        let mut rest = [0_u8; 8];
        buffer.read(&mut rest).unwrap();
        assert_eq!(rest, [4, 5, 6, 7, 8, 9, 10, 11]);
    }

    #[test]
    fn misaligned_and_oversized_reads_are_rejected() {
        let buffer = buffer_over((0..8).collect(), 8);
        buffer.fill().unwrap();
        let mut odd = [0_u8; 3];
        assert!(matches!(
            buffer.read(&mut odd),
            Err(MixerError::Misaligned { .. })
        ));
        let mut big = [0_u8; 10];
        assert!(matches!(
            buffer.read(&mut big),
            Err(MixerError::Underflow {
                requested: 10,
                available: 8
            })
        ));
        assert_eq!(buffer.available(), 8);
    }

    #[test]
    fn read_remaining_drains_only_after_close() {
        let buffer = buffer_over(vec![9; 6], 16);
        buffer.fill().unwrap();
        let mut out = [0_u8; 8];
        assert!(buffer.is_closed());
        assert!(!buffer.can_read(8));
        assert_eq!(buffer.read_remaining(&mut out).unwrap(), 6);
        assert_eq!(out, [9, 9, 9, 9, 9, 9, 0, 0]);
        assert_eq!(buffer.read_remaining(&mut out).unwrap(), 0);

        let open = buffer_over(vec![1; 32], 8);
        open.fill().unwrap();
        assert!(matches!(
            open.read_remaining(&mut out),
            Err(MixerError::SourceOpen)
        ));
    }

    #[test]
    fn source_failure_closes_and_surfaces_on_read() {
        let buffer = AudioInputBuffer::new(Box::new(FailingSource), false, 8);
        assert!(buffer.fill().is_err());
        assert!(buffer.is_closed());
        let mut out = [0_u8; 2];
        assert!(matches!(buffer.read(&mut out), Err(MixerError::Io(_))));
    }

    #[test]
    fn live_chunks_split_mid_frame_fail_the_buffer() {
        let (buffer, sender) = gated(true, 8);
        sender.send(vec![0x01]).unwrap();
        assert_eq!(
            buffer.fill().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
        assert!(buffer.is_closed());
        assert_eq!(buffer.available(), 0);

        sender.send(1000_i16.to_le_bytes().to_vec()).unwrap();
        assert_eq!(buffer.fill().unwrap(), 0);
        let mut out = [0_u8; 2];
        assert!(matches!(buffer.read(&mut out), Err(MixerError::Io(_))));
    }

    #[test]
    fn live_chunks_that_do_not_fit_are_dropped() {
        let (buffer, sender) = gated(true, 8);
        sender.send(vec![1; 6]).unwrap();
        assert_eq!(buffer.fill().unwrap(), 6);

        sender.send(vec![2; 4]).unwrap();
        assert_eq!(buffer.fill().unwrap(), 0);
        assert_eq!(buffer.available(), 6);

        sender.send(vec![3; 2]).unwrap();
        assert_eq!(buffer.fill().unwrap(), 2);
        let mut out = [0_u8; 8];
        buffer.read(&mut out).unwrap();
        assert_eq!(out, [1, 1, 1, 1, 1, 1, 3, 3]);

        drop(sender);
        assert_eq!(buffer.fill().unwrap(), 0);
        assert!(buffer.is_closed());
    }

    #[test]
    fn reads_proceed_while_a_fill_is_blocked_upstream() {
        let (buffer, sender) = gated(false, 16);
        sender.send(vec![5; 4]).unwrap();

        let filler = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.fill())
        };

        // The fill appends the first chunk, then blocks waiting for more.
        let mut waited = 0;
        while !buffer.can_read(4) {
            thread::sleep(Duration::from_millis(1));
            waited += 1;
            assert!(waited < 2_000, "first chunk never arrived");
        }
        let mut out = [0_u8; 4];
        buffer.read(&mut out).unwrap();
        assert_eq!(out, [5; 4]);

        drop(sender);
        assert_eq!(filler.join().unwrap().unwrap(), 4);
        assert!(buffer.is_closed());
    }
}
