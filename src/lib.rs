// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! .NET Binary Resources

This crate defines and implements the binary data format used by the .NET
resource system to store sets of named, typed values. We call this data
format *binary resources data*; the runtime knows it as `.resources`
files.

The idea is that a producer collects the resources an application needs -
localized strings, primitive values, pre-serialized payloads of arbitrary
types - attaches a unique name to each, and then serializes all of them
out to a single self-describing binary container.

Later, this container is parsed back into its composite parts. The format
carries a sorted table of name hashes so a consumer can locate a single
resource by name via binary search, without deserializing the full set.

The writer and parser in this crate produce and consume containers that
are byte-for-byte compatible with the runtime's own reader and writer.
See the [specifications] module for the canonical description of the
wire format.
*/

mod parser;
mod resource;
mod serialization;
pub mod specifications;
mod writer;

pub use crate::{
    parser::{ResourceIterator, ResourceReader},
    resource::{Resource, Value},
    serialization::{resource_name_hash, TypeCode},
    writer::{write_resources, ResourceWriter},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("a resource named {0} has already been added")]
    DuplicateName(String),

    #[error("writer is no longer accepting resources")]
    NotOpen,

    #[error("resources were already generated")]
    AlreadyGenerated,

    #[error("writer closed with resources pending; buffered data was discarded")]
    PendingResources,

    #[error("writer was already closed after discarding pending data")]
    AlreadyClosed,

    #[error("char {0:?} is not representable as a single UTF-16 code unit")]
    UnrepresentableChar(char),

    #[error("{0} exceeds the maximum encodable size")]
    Oversized(&'static str),

    #[error("bad magic value encountered")]
    BadMagic,

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid or unsupported type code: {0}")]
    InvalidTypeCode(u32),

    #[error("string value is not valid for its declared encoding")]
    StringDecode,

    #[error("malformed resources data: {0}")]
    Malformed(&'static str),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
