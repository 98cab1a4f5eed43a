mod compress;
mod decompress;

use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

pub(crate) use decompress::decompress_message;

pub(crate) const NOOP_COMPRESSOR_ID: u8 = 0;
#[cfg(feature = "snappy-compression")]
pub(crate) const SNAPPY_COMPRESSOR_ID: u8 = 1;
pub(crate) const ZLIB_COMPRESSOR_ID: u8 = 2;
#[cfg(feature = "zstd-compression")]
pub(crate) const ZSTD_COMPRESSOR_ID: u8 = 3;

/// The compressors that may be used to compress messages sent to and decompress messages
/// returned from the server. `zlib` is always available; the other variants require
/// enabling a corresponding feature flag.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Compressor {
    /// `zstd` compression. See [the `zstd` manual](http://facebook.github.io/zstd/zstd_manual.html)
    /// for more information.
    #[cfg(feature = "zstd-compression")]
    Zstd {
        /// The compression level to use. It is an error to specify a value outside of the
        /// supported compression levels returned by [zstd::compression_level_range]. If no
        /// value is specified, [zstd::DEFAULT_COMPRESSION_LEVEL] will be used.
        level: Option<i32>,
    },
    /// `zlib` compression. See [the `zlib` documentation](https://zlib.net/) for more
    /// information.
    Zlib {
        /// The compression level to use, between 0 and 9 (inclusive). If no value is
        /// specified, the default value ([flate2::Compression::default]) will be used.
        level: Option<u32>,
    },
    /// `snappy` compression. See [the `snappy` documentation](http://google.github.io/snappy/)
    /// for more information.
    #[cfg(feature = "snappy-compression")]
    Snappy,
}

impl Compressor {
    pub(crate) fn name(&self) -> &'static str {
        match *self {
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { .. } => "zstd",
            Compressor::Zlib { .. } => "zlib",
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => "snappy",
        }
    }

    pub(crate) fn id(&self) -> u8 {
        match *self {
            #[cfg(feature = "zstd-compression")]
            Compressor::Zstd { .. } => ZSTD_COMPRESSOR_ID,
            Compressor::Zlib { .. } => ZLIB_COMPRESSOR_ID,
            #[cfg(feature = "snappy-compression")]
            Compressor::Snappy => SNAPPY_COMPRESSOR_ID,
        }
    }

    /// The names of the algorithms this build can actually compress with, in advertisement
    /// order.
    pub fn available_names() -> Vec<&'static str> {
        #[allow(unused_mut)]
        let mut names = vec!["zlib"];
        #[cfg(feature = "zstd-compression")]
        names.push("zstd");
        #[cfg(feature = "snappy-compression")]
        names.push("snappy");
        names
    }

    pub(crate) fn validate(&self) -> Result<()> {
        #[cfg(feature = "zstd-compression")]
        if let Self::Zstd { level: Some(level) } = self {
            let valid_levels = zstd::compression_level_range();
            if !valid_levels.contains(level) {
                return Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "Invalid zstd compression level {level}: compression level must be within \
                         the range {valid_levels:?}"
                    ),
                }
                .into());
            }
        }

        if let Self::Zlib { level: Some(level) } = self {
            if *level > 9 {
                return Err(ErrorKind::InvalidArgument {
                    message: format!(
                        "Invalid zlib compression level {level}: compression level must be \
                         between 0 and 9 (inclusive)"
                    ),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Picks the compressor to use for a session: the first of the server's supported
    /// names, in the order the server presented them, that matches one of the compressors
    /// the caller requested. Returns `None` when there is no overlap, which suppresses
    /// compression for the session.
    pub(crate) fn negotiate(
        requested: &[Compressor],
        server_supported: &[String],
    ) -> Option<Compressor> {
        server_supported
            .iter()
            .find_map(|name| requested.iter().find(|c| c.name() == name).cloned())
    }
}

impl FromStr for Compressor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "zstd-compression")]
            "zstd" => Ok(Self::Zstd { level: None }),
            "zlib" => Ok(Self::Zlib { level: None }),
            #[cfg(feature = "snappy-compression")]
            "snappy" => Ok(Self::Snappy),
            other if other == "zstd" || other == "snappy" => Err(ErrorKind::InvalidArgument {
                message: format!(
                    "Enable the {other}-compression feature flag to use {other} compression"
                ),
            }
            .into()),
            other => Err(ErrorKind::InvalidArgument {
                message: format!("Unsupported compressor: {other}"),
            }
            .into()),
        }
    }
}
