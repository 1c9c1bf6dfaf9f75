use std::io::Write;

use kube::CustomResourceExt;
use snafu::{ResultExt, Snafu};

use crate::yaml::{self, SerializeOptions};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize CustomResourceDefinition {name:?}"))]
    SerializeCrd { source: yaml::Error, name: String },
}

/// Renders the `CustomResourceDefinition` of `K` as a standalone YAML manifest.
pub fn manifest<K: CustomResourceExt>() -> Result<String, Error> {
    yaml::to_string(&K::crd(), SerializeOptions::manifest()).context(SerializeCrdSnafu {
        name: K::crd_name(),
    })
}

/// Writes the `CustomResourceDefinition` manifest of `K` to `writer`.
pub fn write_manifest<K: CustomResourceExt>(writer: impl Write) -> Result<(), Error> {
    yaml::serialize(&K::crd(), writer, SerializeOptions::manifest()).context(SerializeCrdSnafu {
        name: K::crd_name(),
    })
}
