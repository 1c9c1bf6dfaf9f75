//! Serializes values to YAML for manifests and Alertmanager configuration documents.
use std::io::Write;

use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to emit YAML"))]
    Emit { source: serde_yaml::Error },

    #[snafu(display("failed to write the document start marker"))]
    WriteDocumentStart { source: std::io::Error },

    #[snafu(display("emitted YAML is not valid UTF-8"))]
    NotUtf8 { source: std::string::FromUtf8Error },
}

/// Controls how values are serialized.
///
/// [`SerializeOptions::manifest()`] is meant for standalone Kubernetes manifests like CRDs,
/// [`SerializeOptions::plain()`] for configuration documents read by other programs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Starts the output with a document separator (`---`).
    pub explicit_document: bool,

    /// Writes enum variants as single entry maps keyed by the variant name.
    pub singleton_map: bool,
}

impl SerializeOptions {
    pub const fn manifest() -> Self {
        Self {
            explicit_document: true,
            singleton_map: true,
        }
    }

    /// Exactly what serde_yaml emits.
    pub const fn plain() -> Self {
        Self {
            explicit_document: false,
            singleton_map: false,
        }
    }
}

/// Serializes `value` into `writer`.
pub fn serialize<T, W>(value: &T, mut writer: W, options: SerializeOptions) -> Result<()>
where
    T: serde::Serialize,
    W: Write,
{
    if options.explicit_document {
        writer
            .write_all(b"---\n")
            .context(WriteDocumentStartSnafu)?;
    }

    let mut serializer = serde_yaml::Serializer::new(writer);
    if options.singleton_map {
        serde_yaml::with::singleton_map_recursive::serialize(value, &mut serializer)
    } else {
        value.serialize(&mut serializer)
    }
    .context(EmitSnafu)
}

/// Serializes `value` into a [`String`].
pub fn to_string<T>(value: &T, options: SerializeOptions) -> Result<String>
where
    T: serde::Serialize,
{
    let mut emitted = Vec::new();
    serialize(value, &mut emitted, options)?;

    String::from_utf8(emitted).context(NotUtf8Snafu)
}
