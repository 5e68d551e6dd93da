//! End-to-end pipeline tests: intent in, encoded transactions (or executed
//! steps) out, against in-memory registries, schema stores, and a mock chain.
use alloy_primitives::{Address, U256};
use serde_json::json;
use std::str::FromStr;
use txforge::registry::IndexRegistry;
use txforge::schema::InMemorySchemaStore;
use txforge::test_support::{MockBalanceProvider, MockChainClient};
use txforge::{
    compile, compile_and_build, compile_and_execute, Action, Error, Intent, IrNode, IrPlan,
    PipelineCtx, SchemaRef, StepStatus, TokenInfo,
};

const LIDO_STETH: &str = "0xae7ab96520de3a18e5e111b5eaab095312d7fe84";
const AAVE_POOL: &str = "0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2";
const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
const UNISWAP_ROUTER: &str = "0xe592427a0aece92de3edee1f18e0157c05861564";
const CALLER: &str = "0x1111111111111111111111111111111111111111";

fn addr(raw: &str) -> Address {
    Address::from_str(raw).expect("fixture address should parse")
}

fn fixture_registry() -> IndexRegistry {
    let mut registry = IndexRegistry::new();
    registry.insert_index("aave", json!({ "roles": { "pool": AAVE_POOL } }));
    registry.insert_index("lido", json!({ "roles": { "steth": LIDO_STETH } }));
    registry.insert_index("erc20", json!({ "roles": { "weth": WETH } }));
    registry.insert_index("uniswap", json!({ "routers": { "router": UNISWAP_ROUTER } }));
    registry.insert_token(
        "WETH",
        1,
        TokenInfo {
            address: addr(WETH),
            decimals: 18,
        },
    );
    registry
}

fn fixture_store() -> InMemorySchemaStore {
    let mut store = InMemorySchemaStore::new();

    store.insert_index("lido", json!({ "protocol": "lido", "version": "1", "chainId": 1 }));
    store.insert_action(
        "lido",
        "submit",
        json!({
            "contract": LIDO_STETH,
            "method": "submit",
            "params": { "referral": { "type": "string", "pattern": "^0x[a-fA-F0-9]{40}$" } },
            "x-abi": "submit(address referral) payable returns (uint256)"
        }),
    );

    store.insert_index("aave_v3", json!({ "protocol": "aave_v3", "version": "3", "chainId": 1 }));
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
        "aave_v3",
        "borrow",
        json!({
            "contract": "pool",
            "method": "borrow",
            "params": {
                "asset": { "type": "string", "pattern": "^0x[a-fA-F0-9]{40}$" },
                "amount": { "type": "integer" }
            },
            "x-abi": "borrow(address asset, uint256 amount, uint256 interestRateMode, uint16 referralCode, address onBehalfOf)"
        }),
    );

    store.insert_index("erc20", json!({ "protocol": "erc20", "version": "1", "chainId": 1 }));
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

    store.insert_index("unknownproto", json!({ "protocol": "unknownproto", "chainId": 1 }));
    store.insert_action(
        "unknownproto",
        "borrow",
        json!({
            "contract": "pool",
            "method": "borrow",
            "params": { "amount": { "type": "integer" } },
            "x-abi": "borrow(uint256 amount)"
        }),
    );

    store.insert_index("uniswap_v3", json!({ "protocol": "uniswap_v3", "version": "3", "chainId": 1 }));
    store.insert_action(
        "uniswap_v3",
        "swap",
        json!({
            "dsl_version": "0.1",
            "protocol": { "name": "uniswap_v3", "version": "3", "chainId": 1 },
            "action": { "name": "swap", "summary": "single-hop exact-input swap" },
            "io": { "inputs": {
                "token_in": { "type": "address" },
                "token_out": { "type": "address" },
                "amountIn": { "type": "uint" },
                "recipient": { "type": "address" },
                "slippage_bps": { "type": "bps", "required": false }
            } },
            "execution": {
                "evm": {
                    "chainId": 1,
                    "contract": UNISWAP_ROUTER,
                    "method": "exactInputSingle",
                    "structure": "object",
                    "signature": "exactInputSingle((address tokenIn, address tokenOut, uint24 fee, address recipient, uint256 amountIn, uint256 amountOutMinimum, uint160 sqrtPriceLimitX96) params) payable returns (uint256 amountOut)",
                    "arg_object": {
                        "tokenIn": "{token_in}",
                        "tokenOut": "{token_out}",
                        "fee": 3000,
                        "recipient": "{recipient}",
                        "amountIn": "{amountIn}",
                        "amountOutMinimum": "{min_out_computed}",
                        "sqrtPriceLimitX96": 0
                    }
                }
            }
        }),
    );

    store
}

fn lido_submit_intent() -> Intent {
    Intent {
        actions: vec![Action {
            protocol: "lido".to_string(),
            action: "submit".to_string(),
            params: json!({
                "referral": "0x0000000000000000000000000000000000000000",
                "value": { "kind": "ether", "value": 1 }
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    }
}

#[test]
fn lido_submit_compiles_to_one_step_with_no_approvals() {
    let registry = fixture_registry();
    let store = fixture_store();
    let ctx = PipelineCtx::new(&registry, &store).with_auto_approvals();

    let steps = compile(lido_submit_intent(), &ctx).expect("intent should compile");
    assert_eq!(steps.len(), 1, "no ERC-20 debit, so no approval step");
    assert_eq!(steps[0].schema_ref, SchemaRef::new("lido", "submit"));
}

#[tokio::test]
async fn lido_submit_builds_a_payable_transaction() {
    let registry = fixture_registry();
    let store = fixture_store();
    let ctx = PipelineCtx::new(&registry, &store).with_caller(addr(CALLER));

    let built = compile_and_build(lido_submit_intent(), &ctx)
        .await
        .expect("intent should build");
    assert_eq!(built.len(), 1);
    let tx = &built[0].tx;
    assert_eq!(tx.to, addr(LIDO_STETH));
    assert_eq!(tx.value, U256::from(10u64).pow(U256::from(18u64)));
    assert!(tx.data.starts_with("0x"));
    assert_eq!(tx.chain_id, 1);
}

#[tokio::test]
async fn aave_supply_of_full_balance_resolves_amount_and_inserts_one_approval() {
    let registry = fixture_registry();
    let store = fixture_store();
    let balance = U256::from(10u64).pow(U256::from(18u64));
    let balances = MockBalanceProvider::new().with_balance(addr(WETH), balance);
    let ctx = PipelineCtx::new(&registry, &store)
        .with_caller(addr(CALLER))
        .with_balances(&balances)
        .with_auto_approvals();

    let intent = Intent {
        actions: vec![Action {
            protocol: "aave".to_string(),
            action: "supply".to_string(),
            params: json!({
                "assetSymbol": "WETH",
                "amount": { "kind": "percent_of_balance", "value": 100 }
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    };

    let built = compile_and_build(intent, &ctx)
        .await
        .expect("supply intent should build");
    assert_eq!(built.len(), 2, "one approval plus the supply itself");

    let approval = &built[0];
    assert_eq!(approval.step.schema_ref, SchemaRef::new("erc20", "approve"));
    assert_eq!(approval.tx.to, addr(WETH));
    assert_eq!(approval.tx.args[0], json!(AAVE_POOL));
    assert_eq!(approval.tx.args[1], json!(U256::MAX.to_string()));

    let supply = &built[1];
    assert_eq!(supply.tx.to, addr(AAVE_POOL));
    assert_eq!(supply.tx.args[0], json!(WETH));
    assert_eq!(supply.tx.args[1], json!(balance.to_string()));
}

#[test]
fn loop_of_three_borrows_unrolls_in_order() {
    let registry = fixture_registry();
    let store = fixture_store();
    let ctx = PipelineCtx::new(&registry, &store);

    let plan = IrPlan {
        plan: vec![IrNode::Loop {
            times: Some(3),
            until: None,
            steps: vec![IrNode::Action {
                action: Action {
                    protocol: "aave_v3".to_string(),
                    action: "borrow".to_string(),
                    params: json!({ "assetSymbol": "WETH", "amount": "1000" })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    chain_id: Some(1),
                    id: None,
                },
            }],
        }],
        meta: Default::default(),
    };

    let steps = compile(plan, &ctx).expect("plan should compile");
    assert_eq!(steps.len(), 3);
    assert!(steps
        .iter()
        .all(|step| step.schema_ref == SchemaRef::new("aave_v3", "borrow")));
}

#[tokio::test]
async fn unresolvable_role_fails_before_any_transaction_is_sent() {
    let registry = fixture_registry();
    let store = fixture_store();
    let chain = MockChainClient::new();
    let ctx = PipelineCtx::new(&registry, &store)
        .with_caller(addr(CALLER))
        .with_chain(&chain);

    let intent = Intent {
        actions: vec![Action {
            protocol: "unknownproto".to_string(),
            action: "borrow".to_string(),
            params: json!({ "amount": "1" }).as_object().cloned().unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    };

    let err = compile_and_execute(intent, &ctx)
        .await
        .expect_err("unknown role must abort the run");
    assert!(matches!(err, Error::UnknownRole { ref protocol, ref role, .. }
        if protocol == "unknownproto" && role == "pool"));
    assert!(
        chain.sent_transactions().is_empty(),
        "nothing may reach the chain after a resolution failure"
    );
}

#[tokio::test]
async fn equivalent_schema_shapes_produce_byte_identical_calldata() {
    let registry = fixture_registry();

    let instance_doc = json!({
        "contract": LIDO_STETH,
        "method": "submit",
        "params": { "referral": { "type": "string", "pattern": "^0x[a-fA-F0-9]{40}$" } },
        "x-abi": "submit(address referral) payable returns (uint256)"
    });
    let schema_doc = json!({
        "properties": {
            "contract": { "const": LIDO_STETH },
            "method": { "const": "submit" },
            "params": {
                "properties": {
                    "referral": { "type": "string", "pattern": "^0x[a-fA-F0-9]{40}$" }
                },
                "required": ["referral"]
            },
            "x-abi": { "const": "submit(address referral) payable returns (uint256)" }
        }
    });
    let full_doc = json!({
        "dsl_version": "0.1",
        "protocol": { "name": "lido", "version": "1", "chainId": 1 },
        "action": { "name": "submit", "summary": "stake ether" },
        "io": { "inputs": { "referral": { "type": "address" } } },
        "execution": {
            "evm": {
                "chainId": 1,
                "contract": LIDO_STETH,
                "method": "submit",
                "signature": "submit(address referral) payable returns (uint256)"
            }
        }
    });

    let mut calldatas = Vec::new();
    for document in [instance_doc, schema_doc, full_doc] {
        let mut store = InMemorySchemaStore::new();
        store.insert_index("lido", json!({ "protocol": "lido", "version": "1", "chainId": 1 }));
        store.insert_action("lido", "submit", document);
        let ctx = PipelineCtx::new(&registry, &store).with_caller(addr(CALLER));
        let built = compile_and_build(lido_submit_intent(), &ctx)
            .await
            .expect("each shape should build");
        calldatas.push(built[0].tx.data.clone());
    }
    assert_eq!(calldatas[0], calldatas[1]);
    assert_eq!(calldatas[1], calldatas[2]);
}

#[tokio::test]
async fn built_calldata_decodes_back_to_the_coerced_args() {
    let registry = fixture_registry();
    let store = fixture_store();
    let balances = MockBalanceProvider::new();
    let ctx = PipelineCtx::new(&registry, &store)
        .with_caller(addr(CALLER))
        .with_balances(&balances);

    let intent = Intent {
        actions: vec![Action {
            protocol: "aave".to_string(),
            action: "supply".to_string(),
            params: json!({ "assetSymbol": "WETH", "amount": "123456789" })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    };
    let built = compile_and_build(intent, &ctx)
        .await
        .expect("supply should build");
    let tx = &built[0].tx;

    let function = txforge::abi::parse_signature(
        "supply(address asset, uint256 amount, address onBehalfOf, uint16 referralCode)",
    )
    .expect("signature should parse");
    let calldata = hex::decode(tx.data.trim_start_matches("0x")).expect("data should be hex");
    let decoded = function
        .decode_call_args(&calldata)
        .expect("calldata should decode");
    assert_eq!(decoded, tx.args);
}

#[tokio::test]
async fn slippage_bound_is_recomputed_from_the_simulated_output() {
    let registry = fixture_registry();
    let store = fixture_store();
    let chain = MockChainClient::new();
    // Router simulation reports an expected output of 1000.
    chain.set_call_result_uint(addr(UNISWAP_ROUTER), U256::from(1000u64));
    let ctx = PipelineCtx::new(&registry, &store)
        .with_caller(addr(CALLER))
        .with_chain(&chain)
        .simulate_only();

    let intent = Intent {
        actions: vec![Action {
            protocol: "uniswap_v3".to_string(),
            action: "swap".to_string(),
            params: json!({
                "token_in": WETH,
                "token_out": "0x6b175474e89094c44da98b954eedeac495271d0f",
                "amountIn": "1000000",
                "recipient": CALLER
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    };

    let outcomes = compile_and_execute(intent, &ctx)
        .await
        .expect("swap should simulate");
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.status, StepStatus::Simulated);
    assert_eq!(outcome.simulated_output, Some(U256::from(1000u64)));

    // Default 50 bps tolerance: 1000 * 9950 / 10000 = 995, rebuilt in place
    // of the zero placeholder.
    let tuple = outcome.tx.args[0]
        .as_array()
        .expect("object-structure args should be a tuple");
    assert_eq!(tuple[5], json!("995"));
    assert!(
        chain.sent_transactions().is_empty(),
        "simulate-only must not broadcast"
    );
}

#[tokio::test]
async fn simulation_without_output_leaves_minimum_unconstrained() {
    let registry = fixture_registry();
    let store = fixture_store();
    // No scripted call result: the mock answers 0x, decoding yields nothing.
    let chain = MockChainClient::new();
    let ctx = PipelineCtx::new(&registry, &store)
        .with_caller(addr(CALLER))
        .with_chain(&chain)
        .simulate_only();

    let intent = Intent {
        actions: vec![Action {
            protocol: "uniswap_v3".to_string(),
            action: "swap".to_string(),
            params: json!({
                "token_in": WETH,
                "token_out": "0x6b175474e89094c44da98b954eedeac495271d0f",
                "amountIn": "1000000",
                "recipient": CALLER
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    };

    let outcomes = compile_and_execute(intent, &ctx)
        .await
        .expect("swap should still produce an outcome");
    let tuple = outcomes[0].tx.args[0]
        .as_array()
        .expect("object-structure args should be a tuple");
    assert_eq!(tuple[5], json!("0"), "unconstrained minimum on no simulation");
}

#[tokio::test]
async fn execution_confirms_steps_sequentially() {
    let registry = fixture_registry();
    let store = fixture_store();
    let chain = MockChainClient::new();
    let ctx = PipelineCtx::new(&registry, &store)
        .with_caller(addr(CALLER))
        .with_chain(&chain);

    let intent = Intent {
        actions: vec![
            lido_submit_intent().actions.remove(0),
            lido_submit_intent().actions.remove(0),
        ],
        meta: Default::default(),
    };
    let outcomes = compile_and_execute(intent, &ctx)
        .await
        .expect("execution should run");
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|outcome| matches!(outcome.status, StepStatus::Confirmed { .. })));
    assert_eq!(chain.sent_transactions().len(), 2);
}

#[tokio::test]
async fn receipt_failure_halts_the_remaining_steps() {
    let registry = fixture_registry();
    let store = fixture_store();
    let chain = MockChainClient::reverting_receipts();
    let ctx = PipelineCtx::new(&registry, &store)
        .with_caller(addr(CALLER))
        .with_chain(&chain);

    let intent = Intent {
        actions: vec![
            lido_submit_intent().actions.remove(0),
            lido_submit_intent().actions.remove(0),
        ],
        meta: Default::default(),
    };
    let outcomes = compile_and_execute(intent, &ctx)
        .await
        .expect("driver should report outcomes");
    assert_eq!(outcomes.len(), 1, "second step never runs");
    assert!(matches!(outcomes[0].status, StepStatus::Failed { ref error }
        if error.contains("reverted")));
    assert_eq!(chain.sent_transactions().len(), 1);
}

#[tokio::test]
async fn out_of_range_slippage_is_rejected_before_building() {
    let registry = fixture_registry();
    let store = fixture_store();
    let ctx = PipelineCtx::new(&registry, &store).with_caller(addr(CALLER));

    let swap = |bps: u64| Intent {
        actions: vec![Action {
            protocol: "uniswap_v3".to_string(),
            action: "swap".to_string(),
            params: json!({
                "token_in": WETH,
                "token_out": "0x6b175474e89094c44da98b954eedeac495271d0f",
                "amountIn": "1000000",
                "recipient": CALLER,
                "slippage_bps": bps
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    };

    assert!(compile_and_build(swap(5000), &ctx).await.is_ok());
    let err = compile_and_build(swap(5001), &ctx)
        .await
        .expect_err("5001 bps must be rejected");
    assert!(matches!(err, Error::ConstraintViolation(_)));
}

#[tokio::test]
async fn percent_of_balance_doubles_with_the_balance() {
    let registry = fixture_registry();
    let store = fixture_store();

    let supply = Intent {
        actions: vec![Action {
            protocol: "aave".to_string(),
            action: "supply".to_string(),
            params: json!({
                "assetSymbol": "WETH",
                "amount": { "kind": "percent_of_balance", "value": 37 }
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    };

    let mut resolved = Vec::new();
    for balance in [1_000_000u64, 2_000_000u64] {
        let balances =
            MockBalanceProvider::new().with_balance(addr(WETH), U256::from(balance));
        let ctx = PipelineCtx::new(&registry, &store)
            .with_caller(addr(CALLER))
            .with_balances(&balances);
        let built = compile_and_build(supply.clone(), &ctx)
            .await
            .expect("supply should build");
        let amount = built[0].tx.args[1]
            .as_str()
            .expect("amount arg should be a decimal string")
            .parse::<u128>()
            .expect("amount should parse");
        resolved.push(amount);
    }
    assert!(resolved[1] >= resolved[0] * 2);
}

#[tokio::test]
async fn percent_of_balance_without_a_provider_is_a_typed_error() {
    let registry = fixture_registry();
    let store = fixture_store();
    let ctx = PipelineCtx::new(&registry, &store).with_caller(addr(CALLER));

    let intent = Intent {
        actions: vec![Action {
            protocol: "aave".to_string(),
            action: "supply".to_string(),
            params: json!({
                "assetSymbol": "WETH",
                "amount": { "kind": "percent_of_balance", "value": 50 }
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            chain_id: Some(1),
            id: None,
        }],
        meta: Default::default(),
    };
    let err = compile_and_build(intent, &ctx)
        .await
        .expect_err("missing balance provider must fail");
    assert!(matches!(err, Error::MissingBalanceProvider(_)));
}
