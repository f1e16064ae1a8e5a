//! Attestation schema registry and data encoding.

mod encoder;
mod registry;

pub use encoder::{SchemaEncoder, SchemaField, SchemaItem};
pub use registry::{RegisteredSchema, SchemaRegistry};
