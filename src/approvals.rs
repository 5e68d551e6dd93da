/// Automatic token-allowance insertion.
///
/// Contracts that pull ERC-20 tokens from the caller need an allowance
/// first. For each planned step this engine reads the descriptor's debit
/// hints, resolves the spending contract and the debited token, and inserts
/// a maximal-allowance `erc20/approve` step immediately before the first
/// step that needs it. Insertion is deduplicated by exact `(token, spender)`
/// address pair within one compilation: repeated debits of the same pair
/// share one approval. Native-asset debits never produce an approval, and a
/// debit whose spender or token cannot be resolved is skipped rather than
/// failing the compilation.
use crate::builder::{coerce_address_or_role, AddressCoercion};
use crate::domain::address::is_native_token;
use crate::domain::types::{InputMap, PlanStep, SchemaRef};
use crate::error::Result;
use crate::registry::{
    canonicalize_protocol, protocol_lookup_keys, resolve_role_via_registry, AddressRegistry,
};
use crate::schema::SchemaLoader;
use alloy_primitives::{Address, U256};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::debug;

pub fn expand_with_approvals(
    steps: Vec<PlanStep>,
    loader: &SchemaLoader<'_>,
    registry: &dyn AddressRegistry,
    chain_id: u64,
) -> Result<Vec<PlanStep>> {
    let mut out = Vec::with_capacity(steps.len());
    let mut seen_pairs: BTreeSet<(Address, Address)> = BTreeSet::new();

    for step in steps {
        let descriptor = loader.load(&step.schema_ref, Some(&step.inputs))?;

        let protocol_keys = protocol_lookup_keys(&descriptor.protocol);
        let mut keys_with_erc20 = protocol_keys.clone();
        if !keys_with_erc20.iter().any(|key| key == "erc20") {
            keys_with_erc20.push("erc20".to_string());
        }

        let spender = match descriptor.spender_role.as_deref() {
            Some(role) => {
                resolve_role_via_registry(registry, &protocol_keys, role, chain_id)
                    .or(descriptor.execution.target.address)
            }
            None => descriptor.execution.target.address,
        };

        for debit in &descriptor.debits {
            let token = resolve_debited_token(
                &step.inputs,
                debit.token_param.as_deref(),
                debit.token_role.as_deref(),
                &descriptor.protocol,
                &keys_with_erc20,
                registry,
                chain_id,
            );

            let (Some(spender), Some(token)) = (spender, token) else {
                // Nothing to approve.
                continue;
            };
            if is_native_token(&format!("{token:#x}")) {
                continue;
            }

            if seen_pairs.insert((token, spender)) {
                debug!(
                    step = %step.schema_ref,
                    token = %format!("{token:#x}"),
                    spender = %format!("{spender:#x}"),
                    "inserting allowance approval"
                );
                out.push(approval_step(token, spender));
            }
        }

        out.push(step);
    }

    Ok(out)
}

/// Debited-token resolution, in declared priority: explicit parameter,
/// declared role (protocol variants plus the `erc20` bucket), the
/// `assetSymbol` planner convention, a generic `token` input, and finally an
/// address-valued `contract` input. Unresolvable candidates are skipped.
fn resolve_debited_token(
    inputs: &InputMap,
    token_param: Option<&str>,
    token_role: Option<&str>,
    protocol: &str,
    keys_with_erc20: &[String],
    registry: &dyn AddressRegistry,
    chain_id: u64,
) -> Option<Address> {
    let canonical_protocol = canonicalize_protocol(protocol);
    let coerce = |value: &Value, param_name: &str| -> Option<Address> {
        coerce_address_or_role(
            value,
            &AddressCoercion {
                allow_zero_default: false,
                param_name,
                default_protocol: Some(&canonical_protocol),
                chain_id,
                registry,
            },
        )
        .ok()
    };

    if let Some(param) = token_param {
        if let Some(value) = inputs.get(param) {
            if let Some(address) = coerce(value, param) {
                return Some(address);
            }
        }
    }

    if let Some(role) = token_role {
        if let Some(address) =
            resolve_role_via_registry(registry, keys_with_erc20, role, chain_id)
        {
            return Some(address);
        }
    }

    if let Some(value) = inputs.get("assetSymbol") {
        if let Some(address) = coerce(value, "assetSymbol") {
            return Some(address);
        }
    }

    if let Some(value) = inputs.get("token") {
        if let Some(address) = coerce(value, "token") {
            return Some(address);
        }
    }

    if let Some(value) = inputs.get("contract").filter(|value| {
        value
            .as_str()
            .is_some_and(crate::domain::address::is_address)
    }) {
        if let Some(address) = coerce(value, "contract") {
            return Some(address);
        }
    }

    None
}

fn approval_step(token: Address, spender: Address) -> PlanStep {
    PlanStep {
        schema_ref: SchemaRef::new("erc20", "approve"),
        inputs: json!({
            "contract": format!("{token:#x}"),
            "spender": format!("{spender:#x}"),
            "amount": U256::MAX.to_string(),
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
        meta: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::address::parse_address;
    use crate::domain::types::TokenInfo;
    use crate::registry::IndexRegistry;
    use crate::schema::InMemorySchemaStore;

    fn registry() -> IndexRegistry {
        let mut registry = IndexRegistry::new();
        registry.insert_index(
            "aave",
            json!({ "roles": { "pool": "0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2" } }),
        );
        registry.insert_index(
            "erc20",
            json!({ "roles": { "weth": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2" } }),
        );
        registry.insert_token(
            "WETH",
            1,
            TokenInfo {
                address: parse_address("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2")
                    .expect("address should parse"),
                decimals: 18,
            },
        );
        registry
    }

    fn store() -> InMemorySchemaStore {
        let mut store = InMemorySchemaStore::new();
        store.insert_index("aave_v3", json!({ "protocol": "aave_v3", "chainId": 1 }));
        store.insert_index("erc20", json!({ "protocol": "erc20", "chainId": 1 }));
        store.insert_action(
            "aave_v3",
            "supply",
            json!({
                "contract": "pool",
                "method": "supply",
                "params": {
                    "asset": { "type": "string", "pattern": "^0x[a-fA-F0-9]{40}$" },
                    "amount": { "type": "integer" }
                },
                "x-abi": "supply(address asset, uint256 amount, address onBehalfOf, uint16 referralCode)",
                "x-spenderRole": "pool",
                "x-debitAmountKey": "amount",
                "x-debitTokenParam": "asset"
            }),
        );
        store.insert_action(
            "erc20",
            "approve",
            json!({
                "contract": "token",
                "method": "approve",
                "params": {
                    "spender": { "type": "string", "pattern": "^0x[a-fA-F0-9]{40}$" },
                    "amount": { "type": "integer" }
                },
                "x-abi": "approve(address spender, uint256 amount)"
            }),
        );
        store.insert_action(
            "lido",
            "submit",
            json!({
                "contract": "0xae7ab96520de3a18e5e111b5eaab095312d7fe84",
                "method": "submit",
                "params": { "referral": { "type": "string" } },
                "x-abi": "submit(address referral) payable returns (uint256)"
            }),
        );
        store.insert_index("lido", json!({ "protocol": "lido", "chainId": 1 }));
        store
    }

    fn supply_step() -> PlanStep {
        PlanStep {
            schema_ref: SchemaRef::new("aave_v3", "supply"),
            inputs: json!({
                "assetSymbol": "WETH",
                "amount": { "kind": "wei", "value": "1000" }
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            meta: None,
        }
    }

    #[test]
    fn debiting_step_gets_one_approval_before_it() {
        let registry = registry();
        let store = store();
        let loader = SchemaLoader::new(&store, &registry, 1);
        let expanded =
            expand_with_approvals(vec![supply_step()], &loader, &registry, 1)
                .expect("expansion should succeed");
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].schema_ref, SchemaRef::new("erc20", "approve"));
        assert_eq!(
            expanded[0].inputs.get("contract"),
            Some(&json!("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"))
        );
        assert_eq!(
            expanded[0].inputs.get("spender"),
            Some(&json!("0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2"))
        );
        assert_eq!(
            expanded[0].inputs.get("amount"),
            Some(&json!(U256::MAX.to_string()))
        );
        assert_eq!(expanded[1].schema_ref, SchemaRef::new("aave_v3", "supply"));
    }

    #[test]
    fn repeated_debits_of_the_same_pair_share_one_approval() {
        let registry = registry();
        let store = store();
        let loader = SchemaLoader::new(&store, &registry, 1);
        let expanded = expand_with_approvals(
            vec![supply_step(), supply_step()],
            &loader,
            &registry,
            1,
        )
        .expect("expansion should succeed");
        let approvals = expanded
            .iter()
            .filter(|step| step.schema_ref == SchemaRef::new("erc20", "approve"))
            .count();
        assert_eq!(approvals, 1);
        assert_eq!(expanded.len(), 3);
        assert_eq!(expanded[0].schema_ref, SchemaRef::new("erc20", "approve"));
    }

    #[test]
    fn steps_without_declared_debits_insert_nothing() {
        let registry = registry();
        let store = store();
        let loader = SchemaLoader::new(&store, &registry, 1);
        let step = PlanStep {
            schema_ref: SchemaRef::new("lido", "submit"),
            inputs: json!({ "referral": "0x0000000000000000000000000000000000000000", "value": "1" })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            meta: None,
        };
        let expanded = expand_with_approvals(vec![step], &loader, &registry, 1)
            .expect("expansion should succeed");
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].schema_ref, SchemaRef::new("lido", "submit"));
    }

    #[test]
    fn native_token_debits_are_skipped() {
        let registry = registry();
        let mut store = store();
        store.insert_action(
            "wrapper",
            "wrap",
            json!({
                "contract": "0x7a250d5630b4cf539739df2c5dacb4c659f2488d",
                "method": "wrap",
                "params": { "amount": { "type": "integer" } },
                "x-abi": "wrap(uint256 amount)",
                "x-debitAmountKey": "amount",
                "x-debitTokenParam": "token"
            }),
        );
        store.insert_index("wrapper", json!({ "protocol": "wrapper", "chainId": 1 }));
        let loader = SchemaLoader::new(&store, &registry, 1);
        let step = PlanStep {
            schema_ref: SchemaRef::new("wrapper", "wrap"),
            inputs: json!({ "token": "0x0000000000000000000000000000000000000000", "amount": "5" })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            meta: None,
        };
        let expanded = expand_with_approvals(vec![step], &loader, &registry, 1)
            .expect("expansion should succeed");
        assert_eq!(expanded.len(), 1, "native debit must not insert approval");
    }
}
