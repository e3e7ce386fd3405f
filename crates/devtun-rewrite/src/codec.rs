//! Content-encoding codecs

use devtun_core::{Error, Result};
use flate2::write::{GzDecoder, GzEncoder, ZlibEncoder};
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::{self, Write};

/// Output reserved per inflate step
const INFLATE_STEP: usize = 32 * 1024;

/// Compression applied to a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCodec {
    /// Identity
    None,
    /// gzip (RFC 1952)
    Gzip,
    /// deflate (zlib container, RFC 1950)
    Deflate,
}

impl CompressionCodec {
    /// Select the codec for a `content-encoding` header value
    ///
    /// An absent or empty header is [`CompressionCodec::None`]; anything other
    /// than `gzip` or `deflate` is [`Error::UnsupportedEncoding`].
    pub fn from_header(value: Option<&str>) -> Result<Self> {
        let value = value.map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Ok(Self::None);
        }

        if value.eq_ignore_ascii_case("gzip") {
            Ok(Self::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Ok(Self::Deflate)
        } else {
            Err(Error::UnsupportedEncoding(value.to_string()))
        }
    }

    /// Get the Content-Encoding header value
    pub fn encoding_name(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Gzip => Some("gzip"),
            Self::Deflate => Some("deflate"),
        }
    }

    /// Encode a whole body in one go
    pub fn encode_all(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self.encoder() {
            Some(mut encoder) => {
                encoder.write(data)?;
                encoder.finish()
            }
            None => Ok(data.to_vec()),
        }
    }

    /// Decode a whole body in one go
    pub fn decode_all(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self.decoder() {
            Some(mut decoder) => {
                decoder.write(data)?;
                decoder.finish()
            }
            None => Ok(data.to_vec()),
        }
    }

    pub(crate) fn decoder(&self) -> Option<Decoder> {
        match self {
            Self::None => None,
            Self::Gzip => Some(Decoder::Gzip(GzDecoder::new(Vec::new()))),
            Self::Deflate => Some(Decoder::Deflate(Inflate::new())),
        }
    }

    pub(crate) fn encoder(&self) -> Option<Encoder> {
        match self {
            Self::None => None,
            Self::Gzip => Some(Encoder::Gzip(GzEncoder::new(
                Vec::new(),
                Compression::default(),
            ))),
            Self::Deflate => Some(Encoder::Deflate(ZlibEncoder::new(
                Vec::new(),
                Compression::default(),
            ))),
        }
    }
}

/// Push-style decoder: compressed bytes in, decoded bytes accumulated
pub(crate) enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(Inflate),
}

impl Decoder {
    pub(crate) fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Self::Gzip(d) => d.write_all(chunk),
            Self::Deflate(d) => d.write(chunk),
        }
    }

    /// Signal end of input and return everything decoded
    pub(crate) fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Gzip(d) => d.finish(),
            Self::Deflate(d) => d.finish(),
        }
    }
}

/// zlib decoder that insists on seeing the end of the stream
///
/// `write::ZlibDecoder` returns whatever it inflated so far when finished
/// early, so a truncated body would decode to a silent prefix.
pub(crate) struct Inflate {
    state: Decompress,
    out: Vec<u8>,
    done: bool,
}

impl Inflate {
    fn new() -> Self {
        Self {
            state: Decompress::new(true),
            out: Vec::new(),
            done: false,
        }
    }

    fn step(&mut self, input: &[u8], flush: FlushDecompress) -> io::Result<(usize, usize)> {
        self.out.reserve(INFLATE_STEP);
        let (in_before, out_before) = (self.state.total_in(), self.state.total_out());
        let status = self
            .state
            .decompress_vec(input, &mut self.out, flush)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if status == Status::StreamEnd {
            self.done = true;
        }
        Ok((
            (self.state.total_in() - in_before) as usize,
            (self.state.total_out() - out_before) as usize,
        ))
    }

    fn write(&mut self, mut chunk: &[u8]) -> io::Result<()> {
        while !chunk.is_empty() && !self.done {
            let (consumed, produced) = self.step(chunk, FlushDecompress::None)?;
            if consumed == 0 && produced == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "inflate made no progress",
                ));
            }
            chunk = &chunk[consumed..];
        }
        Ok(())
    }

    fn finish(mut self) -> io::Result<Vec<u8>> {
        while !self.done {
            let (_, produced) = self.step(&[], FlushDecompress::Finish)?;
            if produced == 0 && !self.done {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of file",
                ));
            }
        }
        Ok(self.out)
    }
}

/// Push-style encoder matching a [`Decoder`]
pub(crate) enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

impl Encoder {
    pub(crate) fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Gzip(e) => e.write_all(data),
            Self::Deflate(e) => e.write_all(data),
        }
    }

    pub(crate) fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Gzip(e) => e.finish(),
            Self::Deflate(e) => e.finish(),
        }
    }
}
