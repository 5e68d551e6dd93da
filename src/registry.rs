/// Address/role and token resolution.
///
/// A registry answers two pure lookups: `(protocol, role, chain_id)` to a
/// contract address and `(symbol, chain_id)` to token metadata. Schema
/// documents and registries frequently disagree on protocol spelling
/// (`aave` vs `aave_v3` vs `aave-v3`), so every call site that feeds a
/// protocol name into a registry goes through [`protocol_lookup_keys`]: one
/// ordered canonicalization rule rather than ad hoc retries scattered
/// through the pipeline.
use crate::domain::address::parse_address;
use crate::domain::types::TokenInfo;
use crate::error::{Error, Result};
use alloy_primitives::Address;
use serde_json::Value;
use std::collections::BTreeMap;

/// Pure lookup interface over externally supplied address tables.
pub trait AddressRegistry {
    /// e.g. `("uniswap_v3", "router", 1)` → `0x…`. Fails with
    /// [`Error::UnknownRole`] when no entry exists.
    fn contract(&self, protocol: &str, role: &str, chain_id: u64) -> Result<Address>;

    /// e.g. `("USDC", 1)` → `{ address, decimals }`. Fails with
    /// [`Error::UnknownToken`] when no entry exists.
    fn token(&self, symbol: &str, chain_id: u64) -> Result<TokenInfo>;
}

// ── Protocol-name canonicalization ───────────────────────────────────────────

/// Map a schema/directory protocol spelling to the registry key spelling.
pub fn canonicalize_protocol(raw: &str) -> String {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "aave_v3" => "aave".to_string(),
        "uniswap_v3" => "uniswap".to_string(),
        _ => normalized,
    }
}

/// Ordered, deduplicated protocol-name variants to try against a registry:
/// canonical, raw, hyphenated, version-stripped.
pub fn protocol_lookup_keys(raw: &str) -> Vec<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return Vec::new();
    }
    let canonical = canonicalize_protocol(&lowered);
    let hyphenated = lowered.replace('_', "-");
    let version_stripped = strip_version_suffix(&lowered);

    let mut out = Vec::new();
    for candidate in [canonical, lowered, hyphenated, version_stripped] {
        if !candidate.is_empty() && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

fn strip_version_suffix(name: &str) -> String {
    if let Some(position) = name.rfind("_v") {
        let suffix = &name[position + 2..];
        if !suffix.is_empty() && suffix.bytes().all(|byte| byte.is_ascii_digit()) {
            return name[..position].to_string();
        }
    }
    name.to_string()
}

/// Try each protocol variant against the registry, returning the first hit.
pub fn resolve_role_via_registry(
    registry: &dyn AddressRegistry,
    protocols: &[String],
    role: &str,
    chain_id: u64,
) -> Option<Address> {
    for protocol in protocols {
        if let Ok(address) = registry.contract(protocol, role, chain_id) {
            return Some(address);
        }
    }
    None
}

// ── Index-document registry ──────────────────────────────────────────────────

/// Registry backed by per-protocol `index.json` documents and a token table.
///
/// A role value may be a flat address string or a map keyed by chain id;
/// roles live under `roles`, with the legacy `addresses` / `address` /
/// `contracts` / `routers` maps accepted as fallbacks, in that order.
#[derive(Clone, Debug, Default)]
pub struct IndexRegistry {
    indexes: BTreeMap<String, Value>,
    tokens: BTreeMap<(String, u64), TokenInfo>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protocol index document under its directory name.
    pub fn insert_index(&mut self, protocol: &str, document: Value) {
        self.indexes
            .insert(protocol.trim().to_ascii_lowercase(), document);
    }

    pub fn insert_token(&mut self, symbol: &str, chain_id: u64, info: TokenInfo) {
        self.tokens
            .insert((symbol.trim().to_ascii_lowercase(), chain_id), info);
    }

    fn pick_address(value: &Value, chain_id: u64) -> Option<&str> {
        match value {
            Value::String(address) => Some(address.as_str()),
            Value::Object(by_chain) => by_chain
                .get(&chain_id.to_string())
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

impl AddressRegistry for IndexRegistry {
    fn contract(&self, protocol: &str, role: &str, chain_id: u64) -> Result<Address> {
        let miss = || Error::UnknownRole {
            protocol: protocol.to_string(),
            role: role.to_string(),
            chain_id,
        };
        let index = self
            .indexes
            .get(&protocol.trim().to_ascii_lowercase())
            .ok_or_else(miss)?;

        let mut candidates = Vec::new();
        if let Some(roles) = index.get("roles") {
            candidates.push(roles);
        }
        for legacy_key in ["addresses", "address", "contracts", "routers"] {
            if let Some(map) = index.get(legacy_key) {
                candidates.push(map);
            }
        }

        for map in candidates {
            if let Some(value) = map.get(role) {
                if let Some(raw) = Self::pick_address(value, chain_id) {
                    return parse_address(raw).map_err(|_error| miss());
                }
            }
        }
        Err(miss())
    }

    fn token(&self, symbol: &str, chain_id: u64) -> Result<TokenInfo> {
        self.tokens
            .get(&(symbol.trim().to_ascii_lowercase(), chain_id))
            .copied()
            .ok_or_else(|| Error::UnknownToken {
                symbol: symbol.to_string(),
                chain_id,
            })
    }
}

// ── Composite registry ───────────────────────────────────────────────────────

/// Chains a primary and fallback source. Contract lookups try the primary
/// first; token lookups stay on the primary, which owns the canonical token
/// list.
pub struct CompositeRegistry<'a> {
    primary: &'a dyn AddressRegistry,
    fallback: Option<&'a dyn AddressRegistry>,
}

impl<'a> CompositeRegistry<'a> {
    pub fn new(primary: &'a dyn AddressRegistry, fallback: Option<&'a dyn AddressRegistry>) -> Self {
        CompositeRegistry { primary, fallback }
    }
}

impl AddressRegistry for CompositeRegistry<'_> {
    fn contract(&self, protocol: &str, role: &str, chain_id: u64) -> Result<Address> {
        match self.primary.contract(protocol, role, chain_id) {
            Ok(address) => Ok(address),
            Err(primary_error) => match self.fallback {
                Some(fallback) => fallback.contract(protocol, role, chain_id),
                None => Err(primary_error),
            },
        }
    }

    fn token(&self, symbol: &str, chain_id: u64) -> Result<TokenInfo> {
        self.primary.token(symbol, chain_id)
    }
}
