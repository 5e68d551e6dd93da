/// Declared business-rule enforcement.
///
/// Runs strictly before any network call that mutates state: a plan that
/// violates a declared whitelist, range, or caller set never reaches the
/// builder. Checks cover the descriptor-level constraint block (token
/// whitelist, named numeric ranges, allowed addresses, allowed callers), the
/// conventional `slippage_bps` bound, and per-input min/max/enum
/// declarations.
use crate::domain::types::{ActionDescriptor, InputMap};
use crate::error::{Error, Result};
use serde_json::Value;

const MAX_SLIPPAGE_BPS: f64 = 5_000.0;

pub fn enforce(
    descriptor: &ActionDescriptor,
    inputs: &InputMap,
    caller: Option<&str>,
) -> Result<()> {
    let constraints = &descriptor.constraints;

    if let Some(whitelist) = constraints.token_whitelist.as_deref() {
        let allowed = whitelist
            .iter()
            .map(|token| token.address.to_ascii_lowercase())
            .collect::<Vec<_>>();
        for key in ["token_in", "token_out"] {
            if let Some(token) = inputs.get(key).and_then(Value::as_str) {
                if !allowed.contains(&token.to_ascii_lowercase()) {
                    return Err(Error::ConstraintViolation(format!(
                        "{key} not in token whitelist"
                    )));
                }
            }
        }
    }

    if let Some(raw) = inputs.get("slippage_bps") {
        match value_as_f64(raw) {
            Some(slippage) if (0.0..=MAX_SLIPPAGE_BPS).contains(&slippage) => {}
            _ => {
                return Err(Error::ConstraintViolation(
                    "slippage_bps out of range".to_string(),
                ))
            }
        }
    }

    for (key, range) in &constraints.numeric_ranges {
        let Some(value) = inputs.get(key).and_then(value_as_f64) else {
            continue;
        };
        if range.min.is_some_and(|min| value < min) {
            return Err(Error::ConstraintViolation(format!("{key} below minimum")));
        }
        if range.max.is_some_and(|max| value > max) {
            return Err(Error::ConstraintViolation(format!("{key} above maximum")));
        }
    }

    for (key, allowed) in &constraints.allowed_addresses {
        if let Some(value) = inputs.get(key).and_then(Value::as_str) {
            let normalized = value.to_ascii_lowercase();
            if !allowed
                .iter()
                .any(|entry| entry.to_ascii_lowercase() == normalized)
            {
                return Err(Error::ConstraintViolation(format!(
                    "{key} not in allowed addresses"
                )));
            }
        }
    }

    if let Some(allowed_callers) = constraints.allowed_callers.as_deref() {
        let authorized = caller.is_some_and(|caller| {
            let normalized = caller.to_ascii_lowercase();
            allowed_callers
                .iter()
                .any(|entry| entry.to_ascii_lowercase() == normalized)
        });
        if !authorized {
            return Err(Error::ConstraintViolation("caller not allowed".to_string()));
        }
    }

    for (key, spec) in &descriptor.inputs {
        let Some(value) = inputs.get(key) else {
            continue;
        };
        if let Some(numeric) = value_as_f64(value) {
            if spec.min.is_some_and(|min| numeric < min) {
                return Err(Error::ConstraintViolation(format!("{key} below minimum")));
            }
            if spec.max.is_some_and(|max| numeric > max) {
                return Err(Error::ConstraintViolation(format!("{key} above maximum")));
            }
        }
        if let Some(allowed) = spec.enum_values.as_deref() {
            let as_text = value_as_display(value);
            if !allowed.iter().any(|entry| value_as_display(entry) == as_text) {
                return Err(Error::ConstraintViolation(format!("{key} not in enum")));
            }
        }
    }

    Ok(())
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_as_display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{
        ArgStructure, Constraints, ExecutionSpec, InputSpec, NumericRange, TargetSpec, TokenRef,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn descriptor_with(constraints: Constraints) -> ActionDescriptor {
        ActionDescriptor {
            protocol: "uniswap".to_string(),
            version: "3".to_string(),
            chain_id: 1,
            inputs: BTreeMap::new(),
            defaults: Default::default(),
            constraints,
            debits: Vec::new(),
            spender_role: None,
            arg_map: BTreeMap::new(),
            execution: ExecutionSpec {
                target: TargetSpec {
                    address: None,
                    role: Some("router".to_string()),
                },
                method: "swap".to_string(),
                structure: ArgStructure::Tuple,
                signature: "swap(uint256 amountIn)".to_string(),
                arg_order: vec!["amountIn".to_string()],
                value: None,
                gas_limit: None,
                slippage_param: None,
            },
        }
    }

    fn inputs(raw: Value) -> InputMap {
        raw.as_object().expect("inputs should be an object").clone()
    }

    #[test]
    fn slippage_boundary_accepts_5000_and_rejects_5001() {
        let descriptor = descriptor_with(Constraints::default());
        assert!(enforce(
            &descriptor,
            &inputs(json!({ "slippage_bps": 5000 })),
            None
        )
        .is_ok());
        let err = enforce(&descriptor, &inputs(json!({ "slippage_bps": 5001 })), None)
            .expect_err("5001 bps must be rejected");
        assert!(matches!(err, Error::ConstraintViolation(ref message)
            if message.contains("slippage_bps")));
        assert!(enforce(
            &descriptor,
            &inputs(json!({ "slippage_bps": "not-a-number" })),
            None
        )
        .is_err());
    }

    #[test]
    fn token_whitelist_rejects_unlisted_tokens() {
        let descriptor = descriptor_with(Constraints {
            token_whitelist: Some(vec![TokenRef {
                address: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string(),
                symbol: Some("WETH".to_string()),
            }]),
            ..Constraints::default()
        });
        assert!(enforce(
            &descriptor,
            &inputs(json!({ "token_in": "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2" })),
            None
        )
        .is_ok());
        assert!(enforce(
            &descriptor,
            &inputs(json!({ "token_out": "0x6b175474e89094c44da98b954eedeac495271d0f" })),
            None
        )
        .is_err());
    }

    #[test]
    fn numeric_ranges_and_input_bounds_are_enforced() {
        let mut descriptor = descriptor_with(Constraints {
            numeric_ranges: BTreeMap::from([(
                "amountIn".to_string(),
                NumericRange {
                    min: Some(1.0),
                    max: Some(100.0),
                },
            )]),
            ..Constraints::default()
        });
        descriptor.inputs.insert(
            "fee".to_string(),
            InputSpec {
                kind: "enum".to_string(),
                enum_values: Some(vec![json!(500), json!(3000), json!(10000)]),
                ..InputSpec::default()
            },
        );

        assert!(enforce(
            &descriptor,
            &inputs(json!({ "amountIn": 50, "fee": 3000 })),
            None
        )
        .is_ok());
        assert!(enforce(&descriptor, &inputs(json!({ "amountIn": 0 })), None).is_err());
        assert!(enforce(&descriptor, &inputs(json!({ "amountIn": 101 })), None).is_err());
        assert!(enforce(&descriptor, &inputs(json!({ "fee": 1234 })), None).is_err());
    }

    #[test]
    fn allowed_callers_require_a_listed_caller() {
        let descriptor = descriptor_with(Constraints {
            allowed_callers: Some(vec![
                "0x1111111111111111111111111111111111111111".to_string()
            ]),
            ..Constraints::default()
        });
        assert!(enforce(
            &descriptor,
            &inputs(json!({})),
            Some("0x1111111111111111111111111111111111111111")
        )
        .is_ok());
        assert!(enforce(&descriptor, &inputs(json!({})), None).is_err());
        assert!(enforce(
            &descriptor,
            &inputs(json!({})),
            Some("0x2222222222222222222222222222222222222222")
        )
        .is_err());
    }

    #[test]
    fn allowed_addresses_check_matching_inputs_only() {
        let descriptor = descriptor_with(Constraints {
            allowed_addresses: BTreeMap::from([(
                "recipient".to_string(),
                vec!["0x1111111111111111111111111111111111111111".to_string()],
            )]),
            ..Constraints::default()
        });
        assert!(enforce(
            &descriptor,
            &inputs(json!({ "recipient": "0x1111111111111111111111111111111111111111" })),
            None
        )
        .is_ok());
        assert!(enforce(
            &descriptor,
            &inputs(json!({ "recipient": "0x2222222222222222222222222222222222222222" })),
            None
        )
        .is_err());
        // Inputs without a declared allow-list are untouched.
        assert!(enforce(&descriptor, &inputs(json!({ "other": "x" })), None).is_ok());
    }
}
