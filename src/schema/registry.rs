//! Named schema lookup.

use super::encoder::SchemaEncoder;
use crate::error::{Error, Result};
use alloy::primitives::{Address, B256};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// A schema registered on the attestation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSchema {
    /// Schema name in the registry source.
    pub name: String,
    /// Encoding string.
    pub encoding: String,
    /// On-chain schema identifier.
    pub uid: B256,
    /// Resolver contract attached to the schema.
    pub resolver: Address,
    encoder: SchemaEncoder,
}

impl RegisteredSchema {
    /// Build a schema entry, parsing its encoding string.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSchema` if the encoding string cannot be parsed.
    pub fn new(
        name: impl Into<String>,
        encoding: impl Into<String>,
        uid: B256,
        resolver: Address,
    ) -> Result<Self> {
        let encoding = encoding.into();
        let encoder = SchemaEncoder::parse(&encoding)?;
        Ok(Self {
            name: name.into(),
            encoding,
            uid,
            resolver,
            encoder,
        })
    }

    /// Encoder for this schema's data.
    #[must_use]
    pub fn encoder(&self) -> &SchemaEncoder {
        &self.encoder
    }
}

/// Registry source file entry.
#[derive(Debug, Deserialize)]
struct SchemaEntry {
    #[serde(rename = "schemaStr")]
    schema_str: String,
    #[serde(rename = "schemaUID")]
    schema_uid: String,
    #[serde(default)]
    resolver: String,
}

/// Immutable name → schema map, loaded once per process.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, RegisteredSchema>,
}

impl SchemaRegistry {
    /// Build a registry from already-parsed schemas.
    #[must_use]
    pub fn from_schemas(schemas: impl IntoIterator<Item = RegisteredSchema>) -> Self {
        Self {
            schemas: schemas.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// Parse a registry from its JSON source.
    ///
    /// The source maps each name to `{"schemaStr", "schemaUID", "resolver"}`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSchema` if an entry has an invalid identifier,
    /// resolver or encoding string, and `Serialization` if the JSON is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: HashMap<String, SchemaEntry> = serde_json::from_str(json)?;
        let mut schemas = HashMap::with_capacity(entries.len());
        for (name, entry) in entries {
            let uid = B256::from_str(&entry.schema_uid).map_err(|e| {
                Error::MalformedSchema(format!("schema {name}: invalid uid: {e}"))
            })?;
            let resolver = if entry.resolver.is_empty() {
                Address::ZERO
            } else {
                Address::from_str(&entry.resolver).map_err(|e| {
                    Error::MalformedSchema(format!("schema {name}: invalid resolver: {e}"))
                })?
            };
            let schema = RegisteredSchema::new(name.clone(), entry.schema_str, uid, resolver)?;
            schemas.insert(name, schema);
        }
        Ok(Self { schemas })
    }

    /// Load the registry from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read schema file {}: {e}", path.display()))
        })?;
        let registry = Self::from_json(&content)?;
        info!(
            "Loaded {} attestation schemas from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Resolve a schema by name.
    ///
    /// # Errors
    ///
    /// Returns `SchemaNotFound` if the name is absent.
    pub fn lookup(&self, name: &str) -> Result<&RegisteredSchema> {
        self.schemas
            .get(name)
            .ok_or_else(|| Error::SchemaNotFound(name.to_string()))
    }

    /// Number of registered schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
