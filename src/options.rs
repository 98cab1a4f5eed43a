//! Contains the types for connection configuration.

use std::{fmt, str::FromStr};

use crate::error::{Error, ErrorKind, Result};

pub use crate::coll::options::{DeleteOptions, FindOptions, RenameOptions};
pub use crate::compression::Compressor;

/// The port a [`ServerAddress`] falls back to when the connection string names none.
pub const DEFAULT_PORT: u16 = 27017;

/// An address a server can be reached at.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port combination.
    Tcp {
        /// The hostname or IP address; `localhost` when the connection string leaves it
        /// out.
        host: String,

        /// The port. The default is 27017.
        port: Option<u16>,
    },
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl ServerAddress {
    /// Parses an address string into a `ServerAddress`.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let (hostname, port) = match address.split_once(':') {
            Some((hostname, port)) => {
                let port = u16::from_str(port).map_err(|_| {
                    ErrorKind::InvalidArgument {
                        message: format!(
                            "port must be an integer between 0 and 65535, got {}",
                            port
                        ),
                    }
                })?;
                (hostname, Some(port))
            }
            None => (address, None),
        };

        Ok(Self::Tcp {
            host: if hostname.is_empty() {
                "localhost".to_string()
            } else {
                hostname.to_string()
            },
            port,
        })
    }

    /// The hostname of this address.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host.as_str(),
        }
    }

    /// The port of this address, if one was specified.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Tcp { port, .. } => *port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => {
                write!(fmt, "{}:{}", host, port.unwrap_or(DEFAULT_PORT))
            }
        }
    }
}

/// The parsed form of a `mongodb://` connection string.
///
/// Only the host, port, path (the default database), and the `compressors` query option
/// are interpreted; other query options are ignored.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ConnectionString {
    /// The address of the server to connect to.
    pub host: ServerAddress,

    /// The database that unqualified operations target, from the connection string's
    /// path component.
    pub default_database: Option<String>,

    /// The compressors the caller is willing to use, in preference order, to be
    /// advertised during the handshake. When empty or absent, compression is never
    /// negotiated.
    pub compressors: Option<Vec<Compressor>>,
}

impl ConnectionString {
    /// Parses a connection string of the form
    /// `mongodb://host[:port][/defaultDb][?compressors=zstd,zlib]`.
    pub fn parse(uri: impl AsRef<str>) -> Result<Self> {
        let uri = uri.as_ref();
        let rest = uri.strip_prefix("mongodb://").ok_or_else(|| {
            Error::invalid_argument("connection string must begin with 'mongodb://'")
        })?;

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, Some(path)),
            None => (rest, None),
        };

        if authority.contains('@') {
            return Err(Error::invalid_argument(
                "connection string credentials are not supported",
            ));
        }

        let host = ServerAddress::parse(authority)?;

        let default_database = path
            .map(|path| path.trim_end_matches('/'))
            .filter(|path| !path.is_empty())
            .map(str::to_string);

        let mut compressors = None;
        if let Some(query) = query {
            for option in query.split('&') {
                let Some((key, value)) = option.split_once('=') else {
                    continue;
                };
                // Everything except `compressors` is outside this driver's scope.
                if key.eq_ignore_ascii_case("compressors") && !value.is_empty() {
                    compressors = Some(
                        value
                            .split(',')
                            .map(Compressor::from_str)
                            .collect::<Result<Vec<_>>>()?,
                    );
                }
            }
        }

        Ok(Self {
            host,
            default_database,
            compressors,
        })
    }
}
