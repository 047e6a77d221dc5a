//! [`LotusClient`]: the ledger client, speaking Lotus JSON-RPC.
//!
//! The node holds the sender keys and does nonce selection, gas estimation
//! and signing inside `MpoolPushMessage`; this client only builds the
//! unsigned message.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use spigot_core::{
  address::Address,
  amount::TokenAmount,
  ledger::{DataCapEntry, LedgerClient, OperationSpec, Outcome, RegistryReader},
  subject::OperationHandle,
};
use tracing::debug;

use crate::{
  hamt::{cid_string, decode_node},
  Error, Result,
};

/// `AddVerifiedClient` on the verified registry actor.
const METHOD_ADD_VERIFIED_CLIENT: u64 = 4;
const METHOD_SEND: u64 = 0;

/// Datacap token balances are denominated in 10^-18 of a byte.
const DATACAP_UNITS_PER_BYTE: u128 = 1_000_000_000_000_000_000;

fn default_registry() -> String { "f06".to_owned() }
fn default_datacap_actor() -> String { "f07".to_owned() }

/// Connection settings for the Lotus node.
#[derive(Debug, Clone, Deserialize)]
pub struct LotusConfig {
  /// JSON-RPC endpoint, e.g. `http://127.0.0.1:1234/rpc/v1`.
  pub endpoint:          String,
  /// API token with `sign` permission.
  #[serde(default)]
  pub token:             Option<String>,
  /// Notary address that signs data-cap allocations.
  pub allocation_sender: Address,
  /// Wallet that funds faucet transfers.
  pub faucet_sender:     Address,
  #[serde(default)]
  pub max_fee:           Option<TokenAmount>,
  #[serde(default = "default_registry")]
  pub registry:          String,
  /// Token actor holding verified clients' data cap balances.
  #[serde(default = "default_datacap_actor")]
  pub datacap_actor:     String,
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Cid {
  #[serde(rename = "/")]
  root: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Message {
  version:     u64,
  to:          String,
  from:        String,
  nonce:       u64,
  value:       TokenAmount,
  gas_limit:   i64,
  gas_fee_cap: TokenAmount,
  gas_premium: TokenAmount,
  method:      u64,
  params:      String,
}

#[derive(Debug, Deserialize)]
struct SignedMessage {
  #[serde(rename = "CID")]
  cid: Cid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MsgLookup {
  receipt: Receipt,
  height:  i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Receipt {
  exit_code: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MinerPowerResponse {
  miner_power: Claim,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Claim {
  raw_byte_power: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TipSet {
  cids: Vec<Cid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ActorState {
  state: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
  #[serde(default)]
  result: Value,
  #[serde(default)]
  error:  Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
  code:    i64,
  message: String,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct LotusClient {
  client: Client,
  config: LotusConfig,
}

impl LotusClient {
  pub fn new(config: LotusConfig) -> Result<Self> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    Ok(Self { client, config })
  }

  async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> Result<T> {
    let body = json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 });
    let mut req = self.client.post(&self.config.endpoint).json(&body);
    if let Some(token) = &self.config.token {
      req = req.bearer_auth(token);
    }

    let resp = req.send().await?;
    if !resp.status().is_success() {
      return Err(Error::Status { url: self.config.endpoint.clone(), status: resp.status() });
    }
    let rpc: RpcResponse = resp.json().await?;
    if let Some(err) = rpc.error {
      return Err(Error::Rpc { method, code: err.code, message: err.message });
    }
    Ok(serde_json::from_value(rpc.result)?)
  }

  fn message(&self, spec: &OperationSpec) -> Result<Message> {
    let (to, from, value, method, params) = match spec {
      OperationSpec::Allocation { client, amount } => (
        self.config.registry.clone(),
        &self.config.allocation_sender,
        TokenAmount::ZERO,
        METHOD_ADD_VERIFIED_CLIENT,
        BASE64.encode(add_verified_client_params(client, *amount)?),
      ),
      OperationSpec::Transfer { to, amount } => {
        (to.to_string(), &self.config.faucet_sender, *amount, METHOD_SEND, String::new())
      }
    };
    Ok(Message {
      version: 0,
      to,
      from: from.to_string(),
      nonce: 0,
      value,
      gas_limit: 0,
      gas_fee_cap: TokenAmount::ZERO,
      gas_premium: TokenAmount::ZERO,
      method,
      params,
    })
  }

  async fn tipset_key(&self, at_height: Option<i64>) -> Result<Vec<Cid>> {
    let Some(height) = at_height else {
      return Ok(Vec::new());
    };
    let tipset: TipSet = self.call("Filecoin.ChainGetTipSetByHeight", json!([height, []])).await?;
    Ok(tipset.cids)
  }
}

// ─── Registry reads ──────────────────────────────────────────────────────────

impl LotusClient {
  /// Root CID of the HAMT at `path` inside `actor`'s state.
  async fn state_root(&self, actor: &str, path: &[&str]) -> Result<String> {
    let actor_state: ActorState = self.call("Filecoin.StateReadState", json!([actor, []])).await?;
    let mut value = &actor_state.state;
    for key in path {
      value = &value[*key];
    }
    value["/"]
      .as_str()
      .map(str::to_owned)
      .ok_or_else(|| Error::Decode(format!("{actor} state has no link at {}", path.join("."))))
  }

  /// Every `(key, value)` entry under `root`, fetching nodes one by one.
  async fn hamt_entries(&self, root: String) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut entries = Vec::new();
    let mut pending = vec![root];
    while let Some(cid) = pending.pop() {
      let block: String = self.call("Filecoin.ChainReadObj", json!([{ "/": cid }])).await?;
      let block = BASE64
        .decode(block)
        .map_err(|e| Error::Decode(format!("block {cid} is not base64: {e}")))?;
      let node = decode_node(&block)?;
      pending.extend(node.links.iter().map(|link| cid_string(link)));
      entries.extend(node.entries);
    }
    Ok(entries)
  }

  fn address_from_key(&self, key: &[u8]) -> Result<Address> {
    Address::from_bytes(self.config.allocation_sender.network(), key)
      .map_err(|e| Error::Decode(e.to_string()))
  }
}

impl RegistryReader for LotusClient {
  type Error = Error;

  async fn client_data_cap(&self, client: &Address) -> Result<Option<TokenAmount>> {
    self.call("Filecoin.StateVerifiedClientStatus", json!([client, []])).await
  }

  async fn verifier_data_cap(&self, verifier: &Address) -> Result<Option<TokenAmount>> {
    self.call("Filecoin.StateVerifierStatus", json!([verifier, []])).await
  }

  /// Verifiers are keyed by address bytes, with their allowance in bytes.
  async fn verifiers(&self) -> Result<Vec<DataCapEntry>> {
    let root = self.state_root(&self.config.registry, &["Verifiers"]).await?;
    self
      .hamt_entries(root)
      .await?
      .into_iter()
      .map(|(key, value)| {
        Ok(DataCapEntry {
          address:  self.address_from_key(&key)?,
          data_cap: TokenAmount::new(decode_bigint(&value)?),
        })
      })
      .collect()
  }

  /// Client balances are keyed by actor-ID varint, in token units.
  async fn verified_clients(&self) -> Result<Vec<DataCapEntry>> {
    let root = self.state_root(&self.config.datacap_actor, &["Token", "Balances"]).await?;
    self
      .hamt_entries(root)
      .await?
      .into_iter()
      .map(|(key, value)| {
        let mut id_address = vec![0];
        id_address.extend_from_slice(&key);
        Ok(DataCapEntry {
          address:  self.address_from_key(&id_address)?,
          data_cap: TokenAmount::new(decode_bigint(&value)? / DATACAP_UNITS_PER_BYTE),
        })
      })
      .collect()
  }
}

impl LedgerClient for LotusClient {
  type Error = Error;

  async fn submit(&self, spec: &OperationSpec) -> Result<OperationHandle> {
    let message = self.message(spec)?;
    let send_spec = match self.config.max_fee {
      Some(fee) => json!({ "MaxFee": fee }),
      None => Value::Null,
    };
    let signed: SignedMessage =
      self.call("Filecoin.MpoolPushMessage", json!([message, send_spec])).await?;
    debug!(cid = %signed.cid.root, target = %spec.target(), "message pushed");
    Ok(OperationHandle(signed.cid.root))
  }

  async fn outcome(&self, handle: &OperationHandle) -> Result<Outcome> {
    let cid = Cid { root: handle.as_str().to_owned() };
    let lookup: Option<MsgLookup> =
      self.call("Filecoin.StateSearchMsg", json!([[], cid, -1, true])).await?;
    Ok(outcome_from_lookup(lookup))
  }

  async fn operator_power(
    &self,
    operator: &Address,
    at_height: Option<i64>,
  ) -> Result<Option<u128>> {
    let tsk = self.tipset_key(at_height).await?;
    let resp: MinerPowerResponse =
      match self.call("Filecoin.StateMinerPower", json!([operator, tsk])).await {
        Ok(resp) => resp,
        // The node refuses to load a miner actor that does not exist.
        Err(Error::Rpc { .. }) => return Ok(None),
        Err(e) => return Err(e),
      };
    let bytes = resp
      .miner_power
      .raw_byte_power
      .parse::<u128>()
      .map_err(|_| Error::Decode(format!("raw byte power {:?}", resp.miner_power.raw_byte_power)))?;
    Ok(Some(bytes))
  }
}

fn outcome_from_lookup(lookup: Option<MsgLookup>) -> Outcome {
  match lookup {
    None => Outcome::Pending,
    Some(l) if l.receipt.exit_code == 0 => Outcome::Success { height: l.height },
    Some(l) => Outcome::Failure { reason: format!("exit code {}", l.receipt.exit_code) },
  }
}

// ─── Parameter encoding ──────────────────────────────────────────────────────

/// CBOR `[address bytes, bigint bytes]`.
fn add_verified_client_params(client: &Address, amount: TokenAmount) -> Result<Vec<u8>> {
  let params = serde_cbor::Value::Array(vec![
    serde_cbor::Value::Bytes(client.to_bytes()),
    serde_cbor::Value::Bytes(encode_bigint(amount.value())),
  ]);
  Ok(serde_cbor::to_vec(&params)?)
}

/// Filecoin big integers: a sign byte followed by the big-endian magnitude.
/// Zero is the empty string.
fn encode_bigint(value: u128) -> Vec<u8> {
  if value == 0 {
    return Vec::new();
  }
  let bytes = value.to_be_bytes();
  let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
  let mut out = Vec::with_capacity(1 + bytes.len() - first);
  out.push(0);
  out.extend_from_slice(&bytes[first..]);
  out
}

/// Inverse of [`encode_bigint`]. Negative values are rejected.
fn decode_bigint(bytes: &[u8]) -> Result<u128> {
  let Some((&sign, magnitude)) = bytes.split_first() else {
    return Ok(0);
  };
  if sign != 0 {
    return Err(Error::Decode("negative big integer".into()));
  }
  if magnitude.len() > 16 {
    return Err(Error::Decode(format!("big integer of {} bytes", magnitude.len())));
  }
  Ok(magnitude.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bigint_encoding() {
    assert!(encode_bigint(0).is_empty());
    assert_eq!(encode_bigint(1), vec![0, 1]);
    assert_eq!(encode_bigint(1 << 40), vec![0, 1, 0, 0, 0, 0, 0]);
  }

  #[test]
  fn bigint_decoding() {
    assert_eq!(decode_bigint(&[]).unwrap(), 0);
    assert_eq!(decode_bigint(&encode_bigint(1 << 40)).unwrap(), 1 << 40);
    assert!(decode_bigint(&[1, 5]).is_err());
    assert!(decode_bigint(&[0; 18]).is_err());
  }

  #[test]
  fn allocation_params_are_a_two_element_array() {
    let client = Address::parse("f01234").unwrap();
    let params = add_verified_client_params(&client, TokenAmount::new(256)).unwrap();
    // 0x82 = array(2); 0x43 = bytes(3) f01234; 0x43 = bytes(3) bigint 256.
    assert_eq!(params, vec![0x82, 0x43, 0x00, 0xd2, 0x09, 0x43, 0x00, 0x01, 0x00]);
  }

  #[test]
  fn lookup_maps_to_outcome() {
    let ok: Option<MsgLookup> =
      serde_json::from_value(json!({ "Receipt": { "ExitCode": 0 }, "Height": 42 })).unwrap();
    assert_eq!(outcome_from_lookup(ok), Outcome::Success { height: 42 });

    let failed: Option<MsgLookup> =
      serde_json::from_value(json!({ "Receipt": { "ExitCode": 16 }, "Height": 42 })).unwrap();
    assert!(matches!(outcome_from_lookup(failed), Outcome::Failure { .. }));

    let missing: Option<MsgLookup> = serde_json::from_value(Value::Null).unwrap();
    assert_eq!(outcome_from_lookup(missing), Outcome::Pending);
  }

  #[test]
  fn transfer_message_carries_value() {
    let client = LotusClient::new(LotusConfig {
      endpoint:          "http://127.0.0.1:1234/rpc/v1".into(),
      token:             None,
      allocation_sender: Address::parse("f0100").unwrap(),
      faucet_sender:     Address::parse("f0101").unwrap(),
      max_fee:           None,
      registry:          default_registry(),
      datacap_actor:     default_datacap_actor(),
    })
    .unwrap();
    let spec = OperationSpec::Transfer {
      to:     Address::parse("f01234").unwrap(),
      amount: TokenAmount::new(7),
    };
    let msg = serde_json::to_value(client.message(&spec).unwrap()).unwrap();
    assert_eq!(msg["To"], "f01234");
    assert_eq!(msg["From"], "f0101");
    assert_eq!(msg["Value"], "7");
    assert_eq!(msg["Method"], 0);
  }
}
