use crate::{
    compression::Compressor,
    error::{ErrorKind, Result},
};

impl Compressor {
    /// Compresses an already-encoded OP_MSG payload (flags and sections). CPU-bound; the
    /// connection runs this on the blocking pool.
    pub(crate) fn compress(&self, message: &[u8]) -> Result<Vec<u8>> {
        let result = match *self {
            #[cfg(feature = "zstd-compression")]
            Self::Zstd { level } => compress_zstd(level, message),
            Self::Zlib { level } => compress_zlib(level, message),
            #[cfg(feature = "snappy-compression")]
            Self::Snappy => compress_snappy(message),
        };

        result.map_err(|error| {
            ErrorKind::Internal {
                message: format!(
                    "Failed to compress message with {} compression: {}",
                    self.name(),
                    error
                ),
            }
            .into()
        })
    }
}

#[cfg(feature = "zstd-compression")]
fn compress_zstd(level: Option<i32>, message: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Write;

    use zstd::{Encoder, DEFAULT_COMPRESSION_LEVEL};

    let level = level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);
    let mut encoder = Encoder::new(Vec::new(), level)?;

    encoder.write_all(message)?;

    encoder.finish()
}

fn compress_zlib(level: Option<u32>, message: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Write;

    use flate2::{write::ZlibEncoder, Compression};

    let level = match level {
        Some(level) => Compression::new(level),
        None => Compression::default(),
    };
    let mut encoder = ZlibEncoder::new(Vec::new(), level);

    encoder.write_all(message)?;

    encoder.finish()
}

#[cfg(feature = "snappy-compression")]
fn compress_snappy(message: &[u8]) -> std::io::Result<Vec<u8>> {
    // The server doesn't use the snappy frame format, so this must be snap::raw rather
    // than snap::write::FrameEncoder. Likewise for decoding.
    use snap::raw::Encoder;

    let mut encoder = Encoder::new();
    Ok(encoder.compress_vec(message)?)
}
