//! MPEG audio frame parsing
//!
//! The encoder writes a plain MPEG audio elementary stream. Every frame
//! starts with a 4-byte header from which the frame length can be computed:
//!
//! ```text
//! AAAAAAAA AAABBCCD EEEEFFGH IIJJKLMM
//!
//! A: sync (11 bits, all set)      E: bitrate index
//! B: version (00=2.5, 10=2, 11=1) F: sample rate index
//! C: layer (01=III, 10=II, 11=I)  G: padding
//! D: protection                   H..M: private, channel mode, etc.
//! ```
//!
//! [`Mp3FrameReader`] uses the header to cut the stream into whole frames so
//! that each unit handed to the relay is exactly one encoder frame.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of an MPEG audio frame header
pub const HEADER_SIZE: usize = 4;

/// MPEG audio version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

/// MPEG audio layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    I,
    II,
    III,
}

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    /// Bits per second
    pub bitrate: u32,
    /// Samples per second
    pub sample_rate: u32,
    pub padding: bool,
    /// Single channel (mono) frame
    pub mono: bool,
}

impl FrameHeader {
    /// Bitrates in kbit/s by index
    const BITRATES_V1_L1: [u32; 15] = [
        0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
    ];
    const BITRATES_V1_L2: [u32; 15] = [
        0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
    ];
    const BITRATES_V1_L3: [u32; 15] = [
        0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
    ];
    const BITRATES_V2_L1: [u32; 15] = [
        0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
    ];
    const BITRATES_V2_L23: [u32; 15] = [
        0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
    ];

    /// Parse a header from the first 4 bytes of `data`
    ///
    /// Returns `None` if there is no valid header. Free-format frames
    /// (bitrate index 0) are rejected since their length cannot be derived
    /// from the header.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }

        if data[0] != 0xFF || (data[1] & 0xE0) != 0xE0 {
            return None;
        }

        let version = match (data[1] >> 3) & 0x03 {
            0b00 => MpegVersion::V25,
            0b10 => MpegVersion::V2,
            0b11 => MpegVersion::V1,
            _ => return None,
        };

        let layer = match (data[1] >> 1) & 0x03 {
            0b01 => Layer::III,
            0b10 => Layer::II,
            0b11 => Layer::I,
            _ => return None,
        };

        let bitrate_index = (data[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 0x0F {
            return None;
        }

        let table = match (version, layer) {
            (MpegVersion::V1, Layer::I) => &Self::BITRATES_V1_L1,
            (MpegVersion::V1, Layer::II) => &Self::BITRATES_V1_L2,
            (MpegVersion::V1, Layer::III) => &Self::BITRATES_V1_L3,
            (_, Layer::I) => &Self::BITRATES_V2_L1,
            (_, _) => &Self::BITRATES_V2_L23,
        };
        let bitrate = table[bitrate_index] * 1000;

        let base_rate = match (data[2] >> 2) & 0x03 {
            0 => 44_100,
            1 => 48_000,
            2 => 32_000,
            _ => return None,
        };
        let sample_rate = match version {
            MpegVersion::V1 => base_rate,
            MpegVersion::V2 => base_rate / 2,
            MpegVersion::V25 => base_rate / 4,
        };

        Some(Self {
            version,
            layer,
            bitrate,
            sample_rate,
            padding: (data[2] >> 1) & 0x01 == 1,
            mono: (data[3] >> 6) == 0b11,
        })
    }

    /// PCM samples per channel carried by one frame
    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (Layer::I, _) => 384,
            (Layer::II, _) => 1152,
            (Layer::III, MpegVersion::V1) => 1152,
            (Layer::III, _) => 576,
        }
    }

    /// Total frame length in bytes, header included
    pub fn frame_len(&self) -> usize {
        let padding = self.padding as u32;
        let len = match self.layer {
            Layer::I => (12 * self.bitrate / self.sample_rate + padding) * 4,
            _ => {
                let bytes_per_sample = self.samples_per_frame() / 8;
                bytes_per_sample * self.bitrate / self.sample_rate + padding
            }
        };
        len as usize
    }

    /// Playback duration of one frame
    pub fn duration(&self) -> Duration {
        let nanos = u64::from(self.samples_per_frame()) * 1_000_000_000 / u64::from(self.sample_rate);
        Duration::from_nanos(nanos)
    }
}

/// Result of one read from an [`Mp3FrameReader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete frame, header included
    Frame(Bytes),
    /// Bytes discarded while looking for the next sync word
    Skipped(usize),
    /// The stream ended (a truncated trailing frame is discarded)
    Eof,
}

/// Splits an MPEG audio byte stream into whole frames
pub struct Mp3FrameReader<R> {
    inner: R,
    buf: BytesMut,
    skipped_total: u64,
}

impl<R: AsyncRead + Unpin> Mp3FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
            skipped_total: 0,
        }
    }

    /// Total bytes discarded while resynchronizing
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    /// Read the next frame
    pub async fn next_frame(&mut self) -> io::Result<FrameRead> {
        if !self.fill(HEADER_SIZE).await? {
            return Ok(FrameRead::Eof);
        }

        let header = match FrameHeader::parse(&self.buf[..HEADER_SIZE]) {
            Some(header) => header,
            None => {
                let skip = self.buf[1..]
                    .iter()
                    .position(|&b| b == 0xFF)
                    .map(|pos| pos + 1)
                    .unwrap_or(self.buf.len());
                let _ = self.buf.split_to(skip);
                self.skipped_total += skip as u64;
                return Ok(FrameRead::Skipped(skip));
            }
        };

        let len = header.frame_len();
        if !self.fill(len).await? {
            return Ok(FrameRead::Eof);
        }

        Ok(FrameRead::Frame(self.buf.split_to(len).freeze()))
    }

    /// Buffer at least `n` bytes; `false` if the stream ended first
    async fn fill(&mut self, n: usize) -> io::Result<bool> {
        while self.buf.len() < n {
            self.buf.reserve(n - self.buf.len());
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MPEG-1 Layer III, 128 kbit/s, 44.1 kHz, joint stereo
    fn header_128k(padding: bool) -> [u8; 4] {
        [0xFF, 0xFB, if padding { 0x92 } else { 0x90 }, 0x44]
    }

    fn frame(header: [u8; 4], fill: u8) -> Vec<u8> {
        let len = FrameHeader::parse(&header).unwrap().frame_len();
        let mut data = header.to_vec();
        data.resize(len, fill);
        data
    }

    #[test]
    fn test_parse_mpeg1_layer3() {
        let header = FrameHeader::parse(&header_128k(false)).unwrap();

        assert_eq!(header.version, MpegVersion::V1);
        assert_eq!(header.layer, Layer::III);
        assert_eq!(header.bitrate, 128_000);
        assert_eq!(header.sample_rate, 44_100);
        assert!(!header.padding);
        assert!(!header.mono);
        assert_eq!(header.samples_per_frame(), 1152);
        assert_eq!(header.frame_len(), 417);
    }

    #[test]
    fn test_padding_adds_one_byte() {
        let header = FrameHeader::parse(&header_128k(true)).unwrap();
        assert!(header.padding);
        assert_eq!(header.frame_len(), 418);
    }

    #[test]
    fn test_parse_default_encoder_output() {
        // 96 kbit/s, 48 kHz, stereo: what the relay asks the encoder for
        let header = FrameHeader::parse(&[0xFF, 0xFB, 0x74, 0x00]).unwrap();
        assert_eq!(header.bitrate, 96_000);
        assert_eq!(header.sample_rate, 48_000);
        assert_eq!(header.frame_len(), 288);
        assert_eq!(header.duration().as_micros(), 24_000);
    }

    #[test]
    fn test_parse_mpeg2_layer3() {
        // MPEG-2, Layer III, 64 kbit/s, 22.05 kHz, mono
        let header = FrameHeader::parse(&[0xFF, 0xF3, 0x80, 0xC0]).unwrap();
        assert_eq!(header.version, MpegVersion::V2);
        assert_eq!(header.bitrate, 64_000);
        assert_eq!(header.sample_rate, 22_050);
        assert!(header.mono);
        assert_eq!(header.samples_per_frame(), 576);
        assert_eq!(header.frame_len(), 208);
    }

    #[test]
    fn test_parse_layer1() {
        // MPEG-1, Layer I, 384 kbit/s, 48 kHz
        let header = FrameHeader::parse(&[0xFF, 0xFF, 0xC4, 0x00]).unwrap();
        assert_eq!(header.layer, Layer::I);
        assert_eq!(header.frame_len(), 384);
    }

    #[test]
    fn test_reject_invalid_headers() {
        // No sync
        assert!(FrameHeader::parse(&[0x00, 0xFB, 0x90, 0x00]).is_none());
        // Reserved version
        assert!(FrameHeader::parse(&[0xFF, 0xEB, 0x90, 0x00]).is_none());
        // Reserved layer
        assert!(FrameHeader::parse(&[0xFF, 0xF9, 0x90, 0x00]).is_none());
        // Free format bitrate
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x00, 0x00]).is_none());
        // Bad bitrate
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0xF0, 0x00]).is_none());
        // Reserved sample rate
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x9C, 0x00]).is_none());
        // Too short
        assert!(FrameHeader::parse(&[0xFF, 0xFB]).is_none());
    }

    #[tokio::test]
    async fn test_reader_splits_frames() {
        let first = frame(header_128k(false), 0x11);
        let second = frame(header_128k(true), 0x22);
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        let mut reader = Mp3FrameReader::new(stream.as_slice());

        assert_eq!(
            reader.next_frame().await.unwrap(),
            FrameRead::Frame(Bytes::from(first))
        );
        assert_eq!(
            reader.next_frame().await.unwrap(),
            FrameRead::Frame(Bytes::from(second))
        );
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::Eof);
    }

    #[tokio::test]
    async fn test_reader_resyncs_after_garbage() {
        let good = frame(header_128k(false), 0x33);
        let mut stream = vec![0x00, 0x01, 0xFF, 0x00, 0x42];
        stream.extend_from_slice(&good);

        let mut reader = Mp3FrameReader::new(stream.as_slice());

        // Skips up to the first 0xFF candidate, then past it
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::Skipped(2));
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::Skipped(3));
        assert_eq!(
            reader.next_frame().await.unwrap(),
            FrameRead::Frame(Bytes::from(good))
        );
        assert_eq!(reader.skipped_total(), 5);
    }

    #[tokio::test]
    async fn test_reader_discards_truncated_frame() {
        let mut stream = frame(header_128k(false), 0x44);
        stream.truncate(200);

        let mut reader = Mp3FrameReader::new(stream.as_slice());
        assert_eq!(reader.next_frame().await.unwrap(), FrameRead::Eof);
    }

    #[test]
    fn test_reader_empty_stream() {
        let data: &[u8] = &[];
        let mut reader = Mp3FrameReader::new(data);
        let read = tokio_test::block_on(reader.next_frame());
        assert_eq!(tokio_test::assert_ok!(read), FrameRead::Eof);
    }
}
