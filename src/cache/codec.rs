//! Marker-tagged compression envelope for cached payloads.
//!
//! Every stored value starts with one marker byte naming the algorithm used
//! for the rest of the payload:
//!
//! | marker | body |
//! |--------|------|
//! | `0x00` | raw bytes |
//! | `0x01` | lz4 block, length-prefixed |
//! | `0x02` | zstd frame |
//!
//! Small payloads and payloads that do not shrink are stored raw, so an
//! envelope is never more than one byte larger than its input.

use thiserror::Error;
use tracing::warn;

use super::config::CompressionConfig;

pub const MARKER_NONE: u8 = 0x00;
pub const MARKER_LZ4: u8 = 0x01;
pub const MARKER_ZSTD: u8 = 0x02;

/// Compression algorithm recorded in the envelope marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    None,
    Lz4,
    Zstd,
}

impl Algorithm {
    pub fn marker(self) -> u8 {
        match self {
            Self::None => MARKER_NONE,
            Self::Lz4 => MARKER_LZ4,
            Self::Zstd => MARKER_ZSTD,
        }
    }

    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            MARKER_NONE => Some(Self::None),
            MARKER_LZ4 => Some(Self::Lz4),
            MARKER_ZSTD => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

/// Outcome of a compression that was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStats {
    pub algorithm: Algorithm,
    pub original_len: usize,
    pub compressed_len: usize,
}

impl CompressionStats {
    pub fn bytes_saved(&self) -> usize {
        self.original_len.saturating_sub(self.compressed_len)
    }

    pub fn ratio(&self) -> f64 {
        if self.original_len == 0 {
            return 1.0;
        }
        self.compressed_len as f64 / self.original_len as f64
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is empty and carries no codec marker")]
    Empty,
    #[error("corrupt {algorithm} payload: {detail}")]
    Corrupt {
        algorithm: &'static str,
        detail: String,
    },
}

/// Compresses and decompresses cache envelopes.
#[derive(Debug, Clone)]
pub struct Codec {
    config: CompressionConfig,
}

impl Codec {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Wrap `input` in an envelope, compressing it when that pays off.
    ///
    /// Returns stats only when the compressed form was kept.
    pub fn compress(&self, input: &[u8]) -> (Vec<u8>, Option<CompressionStats>) {
        if !self.config.enabled || input.len() < self.config.min_size_bytes {
            return (raw_envelope(input), None);
        }

        let algorithm = if input.len() >= self.config.high_ratio_threshold_bytes {
            Algorithm::Zstd
        } else {
            Algorithm::Lz4
        };

        let body = match algorithm {
            Algorithm::Lz4 => lz4_flex::compress_prepend_size(input),
            Algorithm::Zstd => match zstd::bulk::compress(input, self.config.zstd_level) {
                Ok(body) => body,
                Err(err) => {
                    warn!(
                        algorithm = algorithm.as_str(),
                        error = %err,
                        input_len = input.len(),
                        "Compression failed, storing payload raw"
                    );
                    return (raw_envelope(input), None);
                }
            },
            Algorithm::None => return (raw_envelope(input), None),
        };

        if body.len() >= input.len() {
            return (raw_envelope(input), None);
        }

        let stats = CompressionStats {
            algorithm,
            original_len: input.len(),
            compressed_len: body.len() + 1,
        };

        let mut envelope = Vec::with_capacity(body.len() + 1);
        envelope.push(algorithm.marker());
        envelope.extend_from_slice(&body);
        (envelope, Some(stats))
    }

    /// Unwrap an envelope produced by [`Codec::compress`].
    ///
    /// An unrecognised marker is not an error: the whole input is returned
    /// unchanged so values written before the envelope existed stay readable.
    pub fn decompress(&self, envelope: &[u8]) -> Result<Vec<u8>, CodecError> {
        let Some((&marker, body)) = envelope.split_first() else {
            return Err(CodecError::Empty);
        };

        match Algorithm::from_marker(marker) {
            Some(Algorithm::None) => Ok(body.to_vec()),
            Some(Algorithm::Lz4) => {
                lz4_flex::decompress_size_prepended(body).map_err(|err| CodecError::Corrupt {
                    algorithm: Algorithm::Lz4.as_str(),
                    detail: err.to_string(),
                })
            }
            Some(Algorithm::Zstd) => {
                zstd::stream::decode_all(body).map_err(|err| CodecError::Corrupt {
                    algorithm: Algorithm::Zstd.as_str(),
                    detail: err.to_string(),
                })
            }
            None => {
                warn!(
                    marker,
                    len = envelope.len(),
                    "Unknown codec marker, treating payload as uncompressed"
                );
                Ok(envelope.to_vec())
            }
        }
    }
}

fn raw_envelope(input: &[u8]) -> Vec<u8> {
    let mut envelope = Vec::with_capacity(input.len() + 1);
    envelope.push(MARKER_NONE);
    envelope.extend_from_slice(input);
    envelope
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn codec() -> Codec {
        Codec::new(CompressionConfig::default())
    }

    fn compressible(len: usize) -> Vec<u8> {
        br#"{"keyword":"rust cache","position":3,"volume":1200}"#
            .iter()
            .copied()
            .cycle()
            .take(len)
            .collect()
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn small_payload_is_stored_raw() {
        let input = b"{\"ok\":true}";
        let (envelope, stats) = codec().compress(input);

        assert_eq!(envelope[0], MARKER_NONE);
        assert_eq!(&envelope[1..], input);
        assert!(stats.is_none());
    }

    #[test]
    fn medium_payload_uses_lz4() {
        let input = compressible(8 * 1024);
        let (envelope, stats) = codec().compress(&input);

        assert_eq!(envelope[0], MARKER_LZ4);
        let stats = stats.expect("compression kept");
        assert_eq!(stats.algorithm, Algorithm::Lz4);
        assert!(stats.bytes_saved() > 0);
        assert_eq!(codec().decompress(&envelope).expect("decodes"), input);
    }

    #[test]
    fn large_payload_uses_zstd() {
        let input = compressible(256 * 1024);
        let (envelope, stats) = codec().compress(&input);

        assert_eq!(envelope[0], MARKER_ZSTD);
        assert_eq!(stats.map(|s| s.algorithm), Some(Algorithm::Zstd));
        assert_eq!(codec().decompress(&envelope).expect("decodes"), input);
    }

    #[test]
    fn incompressible_payload_falls_back_to_raw() {
        let input = noise(4 * 1024);
        let (envelope, stats) = codec().compress(&input);

        assert_eq!(envelope[0], MARKER_NONE);
        assert_eq!(envelope.len(), input.len() + 1);
        assert!(stats.is_none());
    }

    #[test]
    fn disabled_compression_always_stores_raw() {
        let codec = Codec::new(CompressionConfig {
            enabled: false,
            ..Default::default()
        });
        let (envelope, stats) = codec.compress(&compressible(32 * 1024));

        assert_eq!(envelope[0], MARKER_NONE);
        assert!(stats.is_none());
    }

    #[test]
    fn unknown_marker_is_passed_through() {
        let legacy = br#"{"legacy":true}"#;
        let decoded = codec().decompress(legacy).expect("legacy value readable");
        assert_eq!(decoded, legacy);
    }

    #[test]
    fn corrupt_body_is_an_error() {
        let mut envelope = vec![MARKER_ZSTD];
        envelope.extend_from_slice(b"definitely not zstd");
        assert!(matches!(
            codec().decompress(&envelope),
            Err(CodecError::Corrupt { algorithm: "zstd", .. })
        ));
    }

    #[test]
    fn empty_envelope_is_an_error() {
        assert!(matches!(codec().decompress(&[]), Err(CodecError::Empty)));
    }

    proptest! {
        #[test]
        fn decompress_inverts_compress(input in proptest::collection::vec(any::<u8>(), 0..20_000)) {
            let codec = Codec::new(CompressionConfig {
                min_size_bytes: 64,
                high_ratio_threshold_bytes: 8 * 1024,
                ..Default::default()
            });
            let (envelope, _) = codec.compress(&input);
            prop_assert_eq!(codec.decompress(&envelope).unwrap(), input);
        }

        #[test]
        fn envelope_never_exceeds_input_plus_marker(input in proptest::collection::vec(any::<u8>(), 0..20_000)) {
            let (envelope, _) = codec().compress(&input);
            prop_assert!(envelope.len() <= input.len() + 1);
        }
    }
}
