//! Ledger addresses.
//!
//! Targets arrive as path parameters in the textual Filecoin form:
//! a network prefix (`f` mainnet, `t` testnet), a protocol digit, and a
//! payload. Parsing normalises case so that blocklist lookups and "changed
//! target" comparisons are exact string matches.
//!
//! Every protocol except `Id` carries a 4-byte blake2b checksum of the
//! binary address at the end of its base32 payload, and parsing verifies it.

use std::{fmt, str::FromStr};

use blake2::{digest::consts::U4, Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Length of the base32 payload for secp256k1 and actor addresses
/// (20-byte hash + 4-byte checksum).
const HASH_PAYLOAD_LEN: usize = 39;
/// Length of the base32 payload for BLS addresses
/// (48-byte public key + 4-byte checksum).
const BLS_PAYLOAD_LEN: usize = 84;
const CHECKSUM_LEN: usize = 4;

type Blake2b32 = Blake2b<U4>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Network {
  Mainnet,
  Testnet,
}

impl Network {
  fn prefix(self) -> char {
    match self {
      Self::Mainnet => 'f',
      Self::Testnet => 't',
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
  /// `f0…`, an actor ID. Storage providers (operators) are addressed this
  /// way.
  Id,
  Secp256k1,
  Actor,
  Bls,
  Delegated,
}

impl Protocol {
  fn digit(self) -> u8 {
    match self {
      Self::Id => 0,
      Self::Secp256k1 => 1,
      Self::Actor => 2,
      Self::Bls => 3,
      Self::Delegated => 4,
    }
  }

  fn from_digit(d: char) -> Option<Self> {
    match d {
      '0' => Some(Self::Id),
      '1' => Some(Self::Secp256k1),
      '2' => Some(Self::Actor),
      '3' => Some(Self::Bls),
      '4' => Some(Self::Delegated),
      _ => None,
    }
  }
}

/// A validated, normalised ledger address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
  network:  Network,
  protocol: Protocol,
  payload:  String,
}

impl Address {
  pub fn parse(input: &str) -> Result<Self> {
    let invalid = |reason| Error::InvalidAddress { input: input.to_owned(), reason };

    let normalised = input.trim().to_ascii_lowercase();
    let mut chars = normalised.chars();

    let network = match chars.next() {
      Some('f') => Network::Mainnet,
      Some('t') => Network::Testnet,
      _ => return Err(invalid("unknown network prefix")),
    };
    let protocol = chars
      .next()
      .and_then(Protocol::from_digit)
      .ok_or_else(|| invalid("unknown protocol"))?;
    let payload = chars.as_str().to_owned();

    if payload.is_empty() {
      return Err(invalid("empty payload"));
    }

    match protocol {
      Protocol::Id => {
        payload.parse::<u64>().map_err(|_| invalid("actor id is not a u64"))?;
      }
      Protocol::Secp256k1 | Protocol::Actor => {
        check_base32(&payload, HASH_PAYLOAD_LEN).map_err(invalid)?;
      }
      Protocol::Bls => {
        check_base32(&payload, BLS_PAYLOAD_LEN).map_err(invalid)?;
      }
      Protocol::Delegated => {
        let (namespace, sub) = payload
          .split_once('f')
          .ok_or_else(|| invalid("delegated address has no namespace separator"))?;
        namespace
          .parse::<u64>()
          .map_err(|_| invalid("delegated namespace is not a u64"))?;
        if sub.len() <= CHECKSUM_LEN || decode_base32(sub).is_none() {
          return Err(invalid("delegated sub-address is not base32"));
        }
      }
    }

    let address = Self { network, protocol, payload };
    if let (bytes, Some(embedded)) = address.decode() {
      if Blake2b32::digest(&bytes).as_slice() != embedded.as_slice() {
        return Err(invalid("checksum mismatch"));
      }
    }
    Ok(address)
  }

  /// Rebuild the textual form from the binary one, computing the checksum.
  pub fn from_bytes(network: Network, bytes: &[u8]) -> Result<Self> {
    let invalid = |reason| Error::InvalidAddress { input: format!("{bytes:02x?}"), reason };

    let (&digit, rest) = bytes.split_first().ok_or_else(|| invalid("empty address bytes"))?;
    let checksummed = |body: &[u8]| {
      let mut raw = body.to_vec();
      raw.extend_from_slice(Blake2b32::digest(bytes).as_slice());
      encode_base32(&raw)
    };
    let payload = match digit {
      0 => read_uvarint(rest).ok_or_else(|| invalid("bad actor id varint"))?.0.to_string(),
      1..=3 => checksummed(rest),
      4 => {
        let (namespace, used) =
          read_uvarint(rest).ok_or_else(|| invalid("bad delegated namespace varint"))?;
        format!("{namespace}f{}", checksummed(&rest[used..]))
      }
      _ => return Err(invalid("unknown protocol")),
    };
    Self::parse(&format!("{}{digit}{payload}", network.prefix()))
  }

  pub fn network(&self) -> Network { self.network }

  pub fn protocol(&self) -> Protocol { self.protocol }

  /// Whether this is an actor-ID address (`f0…`).
  pub fn is_id(&self) -> bool { self.protocol == Protocol::Id }

  /// The binary form used inside message parameters: a protocol byte
  /// followed by the payload with its checksum stripped.
  pub fn to_bytes(&self) -> Vec<u8> { self.decode().0 }

  /// The binary form, plus the checksum the payload carries (`None` for
  /// `Id`).
  fn decode(&self) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut out = vec![self.protocol.digit()];
    let raw = match self.protocol {
      Protocol::Id => {
        // Validated in `parse`.
        let id = self.payload.parse::<u64>().unwrap_or_default();
        write_uvarint(&mut out, id);
        return (out, None);
      }
      Protocol::Secp256k1 | Protocol::Actor | Protocol::Bls => {
        decode_base32(&self.payload).unwrap_or_default()
      }
      Protocol::Delegated => {
        let (namespace, sub) = self.payload.split_once('f').unwrap_or_default();
        write_uvarint(&mut out, namespace.parse::<u64>().unwrap_or_default());
        decode_base32(sub).unwrap_or_default()
      }
    };
    let split = raw.len().saturating_sub(CHECKSUM_LEN);
    out.extend_from_slice(&raw[..split]);
    (out, Some(raw[split..].to_vec()))
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}{}", self.network.prefix(), self.protocol.digit(), self.payload)
  }
}

impl FromStr for Address {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl Serialize for Address {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for Address {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Self::parse(&s).map_err(serde::de::Error::custom)
  }
}

// ─── Encoding helpers ────────────────────────────────────────────────────────

fn check_base32(payload: &str, expected_len: usize) -> std::result::Result<(), &'static str> {
  if payload.len() != expected_len {
    return Err("payload has the wrong length");
  }
  if decode_base32(payload).is_none() {
    return Err("payload is not base32");
  }
  Ok(())
}

/// RFC 4648 base32, lowercase alphabet, no padding.
fn decode_base32(s: &str) -> Option<Vec<u8>> {
  let mut out = Vec::with_capacity(s.len() * 5 / 8);
  let mut buffer: u32 = 0;
  let mut bits: u32 = 0;
  for c in s.bytes() {
    let value = match c {
      b'a'..=b'z' => c - b'a',
      b'2'..=b'7' => c - b'2' + 26,
      _ => return None,
    };
    buffer = (buffer << 5) | u32::from(value);
    bits += 5;
    if bits >= 8 {
      bits -= 8;
      out.push((buffer >> bits) as u8);
      buffer &= (1 << bits) - 1;
    }
  }
  Some(out)
}

/// RFC 4648 base32, lowercase alphabet, no padding. The alphabet of
/// Filecoin address payloads and of CIDv1 strings.
pub fn encode_base32(bytes: &[u8]) -> String {
  const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
  let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
  let mut buffer: u32 = 0;
  let mut bits: u32 = 0;
  for &byte in bytes {
    buffer = (buffer << 8) | u32::from(byte);
    bits += 8;
    while bits >= 5 {
      bits -= 5;
      out.push(ALPHABET[((buffer >> bits) & 31) as usize] as char);
    }
    buffer &= (1 << bits) - 1;
  }
  if bits > 0 {
    out.push(ALPHABET[((buffer << (5 - bits)) & 31) as usize] as char);
  }
  out
}

/// Decode an unsigned LEB128 varint; returns the value and bytes consumed.
pub fn read_uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
  let mut value: u64 = 0;
  for (i, &byte) in bytes.iter().enumerate().take(10) {
    value |= u64::from(byte & 0x7f) << (7 * i);
    if byte & 0x80 == 0 {
      return Some((value, i + 1));
    }
  }
  None
}

fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
  while value >= 0x80 {
    out.push((value as u8) | 0x80);
    value >>= 7;
  }
  out.push(value as u8);
}

#[cfg(test)]
mod tests {
  use super::*;

  const SECP: &str = "f1abjxfbp274xpdqcpuaykwkfb43omjotacm2p3za";
  const BLS: &str =
    "t3vvmn62lofvhjd2ugzca6sof2j2ubwok6cj4xxbfzz4yuxfkgobpihhd2thlanmsh3w2ptld2gqkn2jvlss4a";

  #[test]
  fn parses_id_address() {
    let addr = Address::parse("f01234").unwrap();
    assert!(addr.is_id());
    assert_eq!(addr.to_string(), "f01234");
    assert_eq!(addr.to_bytes(), vec![0, 0xd2, 0x09]);
  }

  #[test]
  fn parses_and_normalises_case() {
    let addr = Address::parse(&SECP.to_uppercase()).unwrap();
    assert_eq!(addr.to_string(), SECP);
    assert_eq!(addr.protocol(), Protocol::Secp256k1);
    // protocol byte + 20-byte hash
    assert_eq!(addr.to_bytes().len(), 21);
  }

  #[test]
  fn parses_bls_testnet_address() {
    let addr = Address::parse(BLS).unwrap();
    assert_eq!(addr.network(), Network::Testnet);
    assert_eq!(addr.to_bytes().len(), 49);
  }

  #[test]
  fn rejects_garbage() {
    for bad in ["", "x01", "f9abc", "f0", "f0abc", "f1short", "f1!!!!"] {
      assert!(Address::parse(bad).is_err(), "{bad:?} should not parse");
    }
  }

  #[test]
  fn parses_delegated_address() {
    let addr = Address::parse("f410faebagbafaydqqcikbmga2dqpcaireeyumdtfc4y").unwrap();
    assert_eq!(addr.protocol(), Protocol::Delegated);
    // protocol byte + namespace varint + 20-byte sub-address
    assert_eq!(addr.to_bytes().len(), 22);
  }

  #[test]
  fn rebuilds_text_from_bytes() {
    for text in [SECP, BLS, "f01234", "f410faebagbafaydqqcikbmga2dqpcaireeyumdtfc4y"] {
      let addr = Address::parse(text).unwrap();
      let rebuilt = Address::from_bytes(addr.network(), &addr.to_bytes()).unwrap();
      assert_eq!(rebuilt, addr);
    }
    assert!(Address::from_bytes(Network::Mainnet, &[]).is_err());
    assert!(Address::from_bytes(Network::Mainnet, &[9, 1]).is_err());
  }

  #[test]
  fn base32_matches_rfc4648() {
    assert_eq!(encode_base32(b"foobar"), "mzxw6ytboi");
    assert_eq!(decode_base32("mzxw6ytboi").unwrap(), b"foobar");
  }

  #[test]
  fn rejects_bad_checksum() {
    for bad in [
      "f1bbjxfbp274xpdqcpuaykwkfb43omjotacm2p3za",
      "f410faebagbafaydqqcikbmga2dqpcaireeyumdtfc5y",
    ] {
      let err = Address::parse(bad).unwrap_err();
      assert!(err.to_string().contains("checksum"), "{bad:?}: {err}");
    }
  }

  #[test]
  fn rejects_wrong_length_payload() {
    let truncated = &SECP[..SECP.len() - 1];
    assert!(Address::parse(truncated).is_err());
  }
}
