#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::cast_possible_truncation)]

pub use ::bson;

mod bson_util;
mod coll;
mod compression;
mod conn;
mod cursor;
pub mod error;
mod hello;
pub mod options;
pub mod results;
#[cfg(test)]
mod test;

pub use crate::{
    coll::{Collection, Namespace},
    conn::Connection,
    cursor::Cursor,
    error::{Error, ErrorKind, Result},
};

/// A boxed future.
pub(crate) type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
