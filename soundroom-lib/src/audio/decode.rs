//! Symphonia-backed media file resource.

use log::warn;
use std::io;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{MixerError, MixerResult};

use super::format::{AudioFormat, SampleWidth};
use super::resource::{AudioResource, AudioSource};

/// A media file decoded to interleaved 16-bit little-endian PCM.
#[derive(Debug, Clone)]
pub struct FileResource {
    path: PathBuf,
    format: AudioFormat,
}

impl FileResource {
    /// Probe `path` and remember its stream layout.
    pub fn new(path: impl AsRef<Path>) -> MixerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (reader, _, _) = open_reader(&path)?;
        let format = reader_format(reader.as_ref())?;
        Ok(Self { path, format })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

impl AudioResource for FileResource {
    fn open(&self) -> MixerResult<Box<dyn AudioSource>> {
        let (reader, decoder, track_id) = open_reader(&self.path)?;
        Ok(Box::new(FileSource {
            reader,
            decoder,
            track_id,
            format: self.format,
            pending: Vec::new(),
            offset: 0,
            finished: false,
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Open the media file and build a decoder for its first decodable track.
fn open_reader(path: &Path) -> MixerResult<(Box<dyn FormatReader>, Box<dyn Decoder>, u32)> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|err| MixerError::Decode(format!("{}: {}", path.display(), err)))?;
    let reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MixerError::Decode(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;

    let dec_opts: DecoderOptions = Default::default();
    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &dec_opts)
        .map_err(|err| MixerError::Decode(format!("{}: {}", path.display(), err)))?;

    Ok((reader, decoder, track_id))
}

fn reader_format(reader: &dyn FormatReader) -> MixerResult<AudioFormat> {
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MixerError::Decode("no audio track".to_string()))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| MixerError::Decode("unknown sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|channels| channels.count())
        .unwrap_or(1);
    Ok(AudioFormat::new(
        sample_rate,
        SampleWidth::Sixteen,
        channels as u16,
        false,
    ))
}

struct FileSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    /// Decoded bytes not yet handed out.
    pending: Vec<u8>,
    offset: usize,
    finished: bool,
}

impl FileSource {
    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `false` once the file is exhausted.
    fn decode_next(&mut self) -> io::Result<bool> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false)
                }
                Err(Error::ResetRequired) => return Ok(false),
                Err(Error::IoError(err)) => return Err(err),
                Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::DecodeError(err)) => {
                    warn!("decode error: {}", err);
                    continue;
                }
                Err(Error::IoError(err)) => return Err(err),
                Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let mut samples = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
            samples.copy_interleaved_ref(decoded);
            self.pending.clear();
            self.offset = 0;
            for sample in samples.samples() {
                self.pending.extend_from_slice(&sample.to_le_bytes());
            }
            return Ok(true);
        }
    }
}

impl AudioSource for FileSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.pending.len() {
            if self.finished || !self.decode_next()? {
                self.finished = true;
                return Ok(0);
            }
        }
        let available = &self.pending[self.offset..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.offset += count;
        Ok(count)
    }
}
