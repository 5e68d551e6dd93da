/// Intent expansion into ordered plan steps.
///
/// Flat action lists plan directly; structured plans walk the IR depth-first
/// (`Seq` flattens in order, `Loop` unrolls eagerly). Planning is pure: it
/// touches no network and leaves `percent_of_balance` amounts unresolved,
/// marking them in step metadata so later stages know resolution is pending.
///
/// Two canonicalization passes run on every action, carried over from how
/// strategies name things in the wild: action aliases (`lido stake` →
/// `submit`, `aave deposit` → `supply`, `etherfi stake` → `deposit`) and the
/// rule that any `approve` runs through the `erc20` schema.
use crate::domain::types::{
    Action, Amount, InputMap, Intent, IrNode, IrPlan, PendingPercent, PlanStep, SchemaRef,
    StepMeta,
};
use crate::error::{Error, Result};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

/// Iteration cap applied when a loop declares a guard but no explicit
/// `max_loops`. Guards themselves are metadata only; see [`IrNode::Loop`].
const DEFAULT_GUARD_LOOP_CAP: u32 = 10;

/// Map planner/caller action aliases onto schema filenames.
pub fn canonicalize_action_name(protocol: &str, action: &str) -> String {
    let protocol = protocol.to_ascii_lowercase();
    let action_lower = action.to_ascii_lowercase();
    match (protocol.as_str(), action_lower.as_str()) {
        ("lido", "stake") | ("lido", "deposit") => "submit".to_string(),
        ("aave", "deposit") | ("aave_v3", "deposit") => "supply".to_string(),
        ("etherfi", "stake") => "deposit".to_string(),
        _ => action.to_string(),
    }
}

/// Approvals always execute through the ERC-20 schema.
pub fn canonicalize_protocol_for_action(protocol: &str, action: &str) -> String {
    if action.eq_ignore_ascii_case("approve") {
        return "erc20".to_string();
    }
    protocol.to_string()
}

/// Plan a single action: one action becomes exactly one step.
pub fn plan_from_action(action: &Action) -> PlanStep {
    let canonical_action = canonicalize_action_name(&action.protocol, &action.action);
    let canonical_protocol =
        canonicalize_protocol_for_action(&action.protocol, &canonical_action);

    let (inputs, meta) = normalize_inputs(&action.params);
    PlanStep {
        schema_ref: SchemaRef::new(canonical_protocol, canonical_action),
        inputs,
        meta,
    }
}

/// Copy params through verbatim, collecting `percent_of_balance` occurrences
/// into step metadata for the later resolution pass.
fn normalize_inputs(params: &InputMap) -> (InputMap, Option<StepMeta>) {
    let mut meta = StepMeta::default();
    for (key, value) in params {
        if let Some(amount) = Amount::from_value(value) {
            if amount.is_percent_of_balance() {
                meta.percent_of_balance.push(PendingPercent {
                    key: key.clone(),
                    spec: amount,
                });
            }
        }
    }
    let meta = if meta.is_empty() { None } else { Some(meta) };
    (params.clone(), meta)
}

/// Plan a flat action list.
pub fn plan_actions(actions: &[Action]) -> Vec<PlanStep> {
    actions.iter().map(plan_from_action).collect()
}

/// Plan a caller intent.
pub fn plan_intent(intent: &Intent) -> Vec<PlanStep> {
    plan_actions(&intent.actions)
}

/// Plan a structured IR plan, walking depth-first and unrolling loops.
pub fn plan_ir(plan: &IrPlan) -> Vec<PlanStep> {
    let mut out = Vec::new();
    for node in &plan.plan {
        walk(node, &mut out);
    }
    out
}

fn walk(node: &IrNode, out: &mut Vec<PlanStep>) {
    match node {
        IrNode::Action { action } => out.push(plan_from_action(action)),
        IrNode::Seq { steps } => {
            for step in steps {
                walk(step, out);
            }
        }
        IrNode::Loop { times, until, steps } => {
            // Fixed count wins; a guard alone iterates to its cap. The guard
            // condition is NOT evaluated against live state.
            let iterations = times
                .or_else(|| {
                    until
                        .as_ref()
                        .map(|guard| guard.max_loops.unwrap_or(DEFAULT_GUARD_LOOP_CAP))
                })
                .unwrap_or(1);
            for _ in 0..iterations {
                for step in steps {
                    walk(step, out);
                }
            }
        }
    }
}

// ── Heuristic prompt planning ────────────────────────────────────────────────

fn stake_prompt_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)(stake|deposit)\s+([\d.]+)\s*(eth|wei)?\s*(?:in|to)?\s*lido")
            .expect("stake prompt regex should compile")
    })
}

/// Parse a free-text prompt of the form "stake 1 eth in lido" into plan
/// steps. Anything the heuristic cannot parse is an error directing the
/// caller to a structured intent.
pub fn plan_from_prompt(prompt: &str, chain_id_default: u64) -> Result<Vec<PlanStep>> {
    let normalized = prompt.trim().to_ascii_lowercase();
    let Some(captures) = stake_prompt_regex().captures(&normalized) else {
        return Err(Error::ConstraintViolation(
            "cannot heuristically parse prompt; pass a structured intent instead".to_string(),
        ));
    };

    let amount_raw = captures
        .get(2)
        .map(|capture| capture.as_str())
        .unwrap_or_default();
    let unit = captures
        .get(3)
        .map(|capture| capture.as_str())
        .unwrap_or("eth");
    let wei = if unit.contains("eth") {
        crate::amount::parse_decimal_units(amount_raw, 18)
            .map_err(|reason| Error::InvalidArgument {
                name: "amount".to_string(),
                expected: reason,
                value: amount_raw.to_string(),
            })?
            .to_string()
    } else {
        amount_raw.to_string()
    };

    let action = Action {
        protocol: "lido".to_string(),
        action: "submit".to_string(),
        params: json!({
            "referral": "0x0000000000000000000000000000000000000000",
            "value": wei,
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
        chain_id: Some(chain_id_default),
        id: None,
    };
    Ok(vec![plan_from_action(&action)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{IntentMeta, LoopGuard};
    use serde_json::json;

    fn action(protocol: &str, name: &str, params: serde_json::Value) -> Action {
        Action {
            protocol: protocol.to_string(),
            action: name.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
            chain_id: None,
            id: None,
        }
    }

    #[test]
    fn each_action_becomes_exactly_one_step() {
        let intent = Intent {
            actions: vec![
                action("lido", "submit", json!({ "value": "1000" })),
                action("aave", "supply", json!({ "assetSymbol": "WETH" })),
            ],
            meta: IntentMeta::default(),
        };
        let steps = plan_intent(&intent);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].schema_ref, SchemaRef::new("lido", "submit"));
        assert_eq!(steps[1].schema_ref, SchemaRef::new("aave", "supply"));
    }

    #[test]
    fn action_aliases_canonicalize_to_schema_names() {
        assert_eq!(canonicalize_action_name("lido", "stake"), "submit");
        assert_eq!(canonicalize_action_name("lido", "deposit"), "submit");
        assert_eq!(canonicalize_action_name("aave", "deposit"), "supply");
        assert_eq!(canonicalize_action_name("etherfi", "stake"), "deposit");
        assert_eq!(canonicalize_action_name("uniswap", "swap"), "swap");
        assert_eq!(canonicalize_protocol_for_action("aave", "approve"), "erc20");
    }

    #[test]
    fn percent_of_balance_params_are_flagged_in_step_meta() {
        let steps = plan_actions(&[action(
            "aave",
            "supply",
            json!({
                "assetSymbol": "WETH",
                "amount": { "kind": "percent_of_balance", "value": 100 }
            }),
        )]);
        let meta = steps[0].meta.as_ref().expect("meta should be present");
        assert_eq!(meta.percent_of_balance.len(), 1);
        assert_eq!(meta.percent_of_balance[0].key, "amount");
        // The input itself stays untouched until the resolution pass.
        assert_eq!(
            steps[0].inputs.get("amount"),
            Some(&json!({ "kind": "percent_of_balance", "value": 100 }))
        );
    }

    #[test]
    fn loop_with_times_three_unrolls_to_three_steps() {
        let plan = IrPlan {
            plan: vec![IrNode::Loop {
                times: Some(3),
                until: None,
                steps: vec![IrNode::Action {
                    action: action("aave", "borrow", json!({ "assetSymbol": "USDC" })),
                }],
            }],
            meta: IntentMeta::default(),
        };
        let steps = plan_ir(&plan);
        assert_eq!(steps.len(), 3);
        assert!(steps
            .iter()
            .all(|step| step.schema_ref == SchemaRef::new("aave", "borrow")));
    }

    #[test]
    fn guard_only_loop_iterates_to_its_cap() {
        let capped = IrPlan {
            plan: vec![IrNode::Loop {
                times: None,
                until: Some(LoopGuard {
                    target_ltv_bps: Some(7000),
                    min_health_factor: None,
                    max_loops: Some(4),
                }),
                steps: vec![IrNode::Action {
                    action: action("aave", "borrow", json!({})),
                }],
            }],
            meta: IntentMeta::default(),
        };
        assert_eq!(plan_ir(&capped).len(), 4);

        let uncapped = IrPlan {
            plan: vec![IrNode::Loop {
                times: None,
                until: Some(LoopGuard::default()),
                steps: vec![IrNode::Action {
                    action: action("aave", "borrow", json!({})),
                }],
            }],
            meta: IntentMeta::default(),
        };
        assert_eq!(plan_ir(&uncapped).len(), DEFAULT_GUARD_LOOP_CAP as usize);
    }

    #[test]
    fn seq_nodes_flatten_in_order() {
        let plan = IrPlan {
            plan: vec![IrNode::Seq {
                steps: vec![
                    IrNode::Action {
                        action: action("lido", "submit", json!({})),
                    },
                    IrNode::Action {
                        action: action("aave", "supply", json!({})),
                    },
                ],
            }],
            meta: IntentMeta::default(),
        };
        let steps = plan_ir(&plan);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].schema_ref.protocol, "lido");
        assert_eq!(steps[1].schema_ref.protocol, "aave");
    }

    #[test]
    fn stake_prompt_parses_into_a_lido_submit_step() {
        let steps = plan_from_prompt("Stake 1.5 ETH in Lido", 1).expect("prompt should parse");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].schema_ref, SchemaRef::new("lido", "submit"));
        assert_eq!(
            steps[0].inputs.get("value"),
            Some(&json!("1500000000000000000"))
        );

        let err = plan_from_prompt("buy the dip", 1).expect_err("unparseable prompt must fail");
        assert!(err.to_string().contains("structured intent"));
    }
}
