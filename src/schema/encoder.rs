//! ABI encoding of attestation data against a registered encoding string.
//!
//! An encoding string lists comma-separated `type name` pairs, e.g.
//! `"bytes32 fingerprintHash,bytes32 contentFingerprint,bool isContentAddressed,uint256 priceAmount"`.
//! Data is supplied as ordered name/value items and encoded as the ABI
//! parameter tuple the attestation contract stores.

use crate::error::{Error, Result};
use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::Bytes;

/// One declared field of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    /// Field name.
    pub name: String,
    /// Solidity type.
    pub ty: DynSolType,
}

/// One value supplied for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaItem {
    /// Field name, must match the declared field at the same position.
    pub name: &'static str,
    /// Value, must match the declared type.
    pub value: DynSolValue,
}

impl SchemaItem {
    /// Create an item.
    #[must_use]
    pub fn new(name: &'static str, value: DynSolValue) -> Self {
        Self { name, value }
    }
}

/// Encoder for a parsed encoding string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEncoder {
    fields: Vec<SchemaField>,
}

impl SchemaEncoder {
    /// Parse an encoding string.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSchema` if a field is not a `type name` pair or
    /// names an unknown type.
    pub fn parse(encoding: &str) -> Result<Self> {
        let fields = encoding
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|field| {
                let mut parts = field.split_whitespace();
                let (Some(ty), Some(name), None) = (parts.next(), parts.next(), parts.next())
                else {
                    return Err(Error::MalformedSchema(format!(
                        "expected `type name`, got {field:?}"
                    )));
                };
                let ty = ty.parse::<DynSolType>().map_err(|e| {
                    Error::MalformedSchema(format!("unknown type in {field:?}: {e}"))
                })?;
                Ok(SchemaField {
                    name: name.to_string(),
                    ty,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if fields.is_empty() {
            return Err(Error::MalformedSchema("empty encoding string".to_string()));
        }
        Ok(Self { fields })
    }

    /// Declared fields, in order.
    #[must_use]
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Encode `items` as the ABI parameter tuple.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSchema` if the items do not match the declared
    /// fields in count, name or type.
    pub fn encode(&self, items: &[SchemaItem]) -> Result<Bytes> {
        if items.len() != self.fields.len() {
            return Err(Error::MalformedSchema(format!(
                "schema declares {} fields, {} supplied",
                self.fields.len(),
                items.len()
            )));
        }

        let mut values = Vec::with_capacity(items.len());
        for (field, item) in self.fields.iter().zip(items) {
            if field.name != item.name {
                return Err(Error::MalformedSchema(format!(
                    "expected field {}, got {}",
                    field.name, item.name
                )));
            }
            if !field.ty.matches(&item.value) {
                return Err(Error::MalformedSchema(format!(
                    "field {} expects {}",
                    field.name, field.ty
                )));
            }
            values.push(item.value.clone());
        }

        Ok(DynSolValue::Tuple(values).abi_encode_params().into())
    }

    /// Decode data previously produced by [`Self::encode`].
    ///
    /// # Errors
    ///
    /// Returns `MalformedSchema` if the data does not decode against the fields.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<DynSolValue>> {
        let tuple = DynSolType::Tuple(self.fields.iter().map(|f| f.ty.clone()).collect());
        match tuple.abi_decode_params(data) {
            Ok(DynSolValue::Tuple(values)) => Ok(values),
            Ok(other) => Ok(vec![other]),
            Err(e) => Err(Error::MalformedSchema(format!("undecodable data: {e}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use alloy::primitives::{B256, U256};

    const LISTING: &str =
        "bytes32 fingerprintHash,bytes32 contentFingerprint,bool isContentAddressed,uint256 priceAmount";

    fn listing_items(price: u64) -> Vec<SchemaItem> {
        vec![
            SchemaItem::new("fingerprintHash", DynSolValue::FixedBytes(B256::repeat_byte(1), 32)),
            SchemaItem::new("contentFingerprint", DynSolValue::FixedBytes(B256::repeat_byte(2), 32)),
            SchemaItem::new("isContentAddressed", DynSolValue::Bool(true)),
            SchemaItem::new("priceAmount", DynSolValue::Uint(U256::from(price), 256)),
        ]
    }

    #[test]
    fn test_parse_listing_schema() {
        let encoder = SchemaEncoder::parse(LISTING).unwrap();
        let names: Vec<&str> = encoder.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["fingerprintHash", "contentFingerprint", "isContentAddressed", "priceAmount"]
        );
        assert_eq!(encoder.fields()[2].ty, DynSolType::Bool);
    }

    #[test]
    fn test_encode_is_four_static_words() {
        let encoder = SchemaEncoder::parse(LISTING).unwrap();
        let data = encoder.encode(&listing_items(7)).unwrap();
        assert_eq!(data.len(), 4 * 32);
        assert_eq!(data[95], 1, "bool is right-aligned in its word");
        assert_eq!(data[127], 7);

        let decoded = encoder.decode(&data).unwrap();
        assert_eq!(decoded[3], DynSolValue::Uint(U256::from(7), 256));
    }

    #[test]
    fn test_mismatches_are_malformed_schema() {
        let encoder = SchemaEncoder::parse(LISTING).unwrap();

        let mut short = listing_items(1);
        short.pop();
        assert!(matches!(encoder.encode(&short), Err(Error::MalformedSchema(_))));

        let mut renamed = listing_items(1);
        renamed[0].name = "resourceIdHash";
        assert!(matches!(encoder.encode(&renamed), Err(Error::MalformedSchema(_))));

        let mut retyped = listing_items(1);
        retyped[2].value = DynSolValue::Uint(U256::from(1), 256);
        assert!(matches!(encoder.encode(&retyped), Err(Error::MalformedSchema(_))));
    }

    #[test]
    fn test_bad_encoding_strings() {
        for bad in ["", "bytes32", "bytes32 a b", "float x"] {
            assert!(
                matches!(SchemaEncoder::parse(bad), Err(Error::MalformedSchema(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
