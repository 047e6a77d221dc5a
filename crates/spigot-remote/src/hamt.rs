//! Decoding chain-state HAMT nodes fetched one block at a time.
//!
//! A node is the CBOR tuple `[bitfield, pointers]`. Each pointer is either a
//! link to a child node (a CID under tag 42) or an inline bucket of
//! `[key, value]` pairs. A full walk visits every pointer, so the bitfield
//! and the bit width are not needed.

use serde_cbor::Value;
use spigot_core::address::encode_base32;

use crate::{Error, Result};

/// One decoded node.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Node {
  /// Binary CIDs of child nodes.
  pub links:   Vec<Vec<u8>>,
  /// Inline entries. Values are kept as raw CBOR byte strings.
  pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

fn malformed(what: &str) -> Error { Error::Decode(format!("hamt node: {what}")) }

/// Tags are surfaced or skipped depending on how the decoder is built; only
/// the tagged value matters here.
fn untag(value: Value) -> Value {
  match value {
    Value::Tag(_, inner) => untag(*inner),
    other => other,
  }
}

pub fn decode_node(block: &[u8]) -> Result<Node> {
  let Value::Array(fields) = untag(serde_cbor::from_slice(block)?) else {
    return Err(malformed("not an array"));
  };
  let [_bitfield, pointers]: [Value; 2] =
    fields.try_into().map_err(|_| malformed("expected two fields"))?;
  let Value::Array(pointers) = untag(pointers) else {
    return Err(malformed("pointers are not an array"));
  };

  let mut node = Node::default();
  for pointer in pointers {
    match untag(pointer) {
      Value::Bytes(cid) => node.links.push(strip_multibase_prefix(cid)),
      Value::Array(bucket) => {
        for pair in bucket {
          let Value::Array(pair) = untag(pair) else {
            return Err(malformed("bucket entry is not an array"));
          };
          let [key, value]: [Value; 2] =
            pair.try_into().map_err(|_| malformed("bucket entry is not a pair"))?;
          match (untag(key), untag(value)) {
            (Value::Bytes(key), Value::Bytes(value)) => node.entries.push((key, value)),
            _ => return Err(malformed("entry key or value is not bytes")),
          }
        }
      }
      _ => return Err(malformed("pointer is neither link nor bucket")),
    }
  }
  Ok(node)
}

/// CIDs in DAG-CBOR carry a leading identity-multibase `0x00`.
fn strip_multibase_prefix(mut cid: Vec<u8>) -> Vec<u8> {
  if cid.first() == Some(&0) {
    cid.remove(0);
  }
  cid
}

/// The base32 string form of a binary CIDv1, as the node's JSON API takes it.
pub fn cid_string(cid: &[u8]) -> String { format!("b{}", encode_base32(cid)) }
