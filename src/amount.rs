/// Unit-tagged amount resolution.
///
/// Converts an [`Amount`] into an exact integer base-unit quantity. `wei`
/// passes through, `ether` scales by 18 decimals, `units` by the declared or
/// token decimals, and `percent_of_balance` needs a live balance. The
/// percent value accepts two spellings: a fraction `<= 1`
/// (`0.1` => 10%) or a percent (`10` => 10%); both land on basis points.
/// Callers must preserve this dual interpretation; strategies in the wild
/// rely on it.
use crate::chain::BalanceProvider;
use crate::domain::address::{is_address, parse_address};
use crate::domain::types::{Amount, PlanStep};
use crate::error::{Error, Result};
use crate::registry::AddressRegistry;
use alloy_primitives::U256;
use serde_json::{json, Value};
use tracing::debug;

const BPS_DENOMINATOR: u64 = 10_000;

/// Input keys consulted, in order, when a percent amount needs the debited
/// token identified from the step inputs.
const TOKEN_KEYS: [&str; 4] = ["assetSymbol", "token", "asset", "contract"];

/// Resolve an amount to base units. `field` names the input being resolved
/// for error messages; `default_decimals` is the token's decimals (18 for
/// the native asset).
pub fn to_base_units(
    amount: &Amount,
    default_decimals: u32,
    balance: Option<U256>,
    field: &str,
) -> Result<U256> {
    match amount {
        Amount::Wei { value } => numeric_value_to_u256(value, field),
        Amount::Ether { value } => scale_decimal_value(value, 18, field),
        Amount::Units { value, decimals } => {
            scale_decimal_value(value, decimals.unwrap_or(default_decimals), field)
        }
        Amount::PercentOfBalance { value } => {
            let balance =
                balance.ok_or_else(|| Error::MissingBalanceProvider(field.to_string()))?;
            let basis_points = percent_value_to_bps(value, field)?;
            let scaled = balance
                .checked_mul(U256::from(basis_points))
                .ok_or_else(|| Error::InvalidArgument {
                    name: field.to_string(),
                    expected: "percentage that does not overflow".to_string(),
                    value: value.to_string(),
                })?;
            Ok(scaled / U256::from(BPS_DENOMINATOR))
        }
    }
}

/// Fraction (`<= 1`, scaled ×10000) or percent (scaled ×100) to basis points.
fn percent_value_to_bps(value: &Value, field: &str) -> Result<u64> {
    let raw = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::InvalidArgument {
        name: field.to_string(),
        expected: "numeric percentage".to_string(),
        value: value.to_string(),
    })?;
    if !raw.is_finite() || raw < 0.0 {
        return Err(Error::InvalidArgument {
            name: field.to_string(),
            expected: "non-negative percentage".to_string(),
            value: value.to_string(),
        });
    }
    let basis_points = if raw <= 1.0 {
        (raw * 10_000.0).round()
    } else {
        (raw * 100.0).round()
    };
    Ok(basis_points as u64)
}

/// Parse a JSON value as a raw integer quantity (decimal string, 0x-hex
/// string, or unsigned number).
pub fn numeric_value_to_u256(value: &Value, field: &str) -> Result<U256> {
    let parsed = match value {
        Value::String(text) => crate::abi::parse_u256_from_decimal_or_hex(text, field).ok(),
        Value::Number(number) => number.as_u64().map(U256::from),
        _ => None,
    };
    parsed.ok_or_else(|| Error::InvalidArgument {
        name: field.to_string(),
        expected: "integer quantity".to_string(),
        value: value.to_string(),
    })
}

/// Scale a decimal value (possibly fractional, e.g. `"1.5"`) by 10^decimals.
fn scale_decimal_value(value: &Value, decimals: u32, field: &str) -> Result<U256> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        _ => String::new(),
    };
    parse_decimal_units(&text, decimals).map_err(|reason| Error::InvalidArgument {
        name: field.to_string(),
        expected: reason,
        value: value.to_string(),
    })
}

/// `"1.5"` at 18 decimals → `1500000000000000000`. Rejects fractional parts
/// longer than the decimal precision rather than silently truncating.
pub fn parse_decimal_units(raw: &str, decimals: u32) -> std::result::Result<U256, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("decimal amount cannot be empty".to_string());
    }
    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (trimmed, ""),
    };
    if !int_part.bytes().all(|byte| byte.is_ascii_digit())
        || !frac_part.bytes().all(|byte| byte.is_ascii_digit())
        || (int_part.is_empty() && frac_part.is_empty())
    {
        return Err("decimal amount with digits required".to_string());
    }
    if frac_part.len() > decimals as usize {
        return Err(format!(
            "fractional part exceeds {decimals} decimals: {trimmed}"
        ));
    }

    let scale = U256::from(10u64).pow(U256::from(decimals));
    let int_value = if int_part.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(int_part, 10)
            .map_err(|error| format!("invalid integer part: {error}"))?
    };
    let frac_value = if frac_part.is_empty() {
        U256::ZERO
    } else {
        let padded = format!("{frac_part:0<width$}", width = decimals as usize);
        U256::from_str_radix(&padded, 10)
            .map_err(|error| format!("invalid fractional part: {error}"))?
    };
    int_value
        .checked_mul(scale)
        .and_then(|scaled| scaled.checked_add(frac_value))
        .ok_or_else(|| format!("decimal amount overflows 256 bits: {trimmed}"))
}

// ── Pending percent_of_balance resolution pass ───────────────────────────────

/// Resolve every `percent_of_balance` input the planner flagged, replacing
/// it with an exact `wei` amount. Runs before descriptor loading so the
/// builder only ever sees statically resolvable amounts.
pub async fn resolve_pending_amounts(
    steps: &mut [PlanStep],
    registry: &dyn AddressRegistry,
    balances: Option<&dyn BalanceProvider>,
    chain_id: u64,
) -> Result<()> {
    for step in steps.iter_mut() {
        let Some(meta) = step.meta.as_ref() else {
            continue;
        };
        if meta.percent_of_balance.is_empty() {
            continue;
        }

        let pending = meta.percent_of_balance.clone();
        let balances = balances
            .ok_or_else(|| Error::MissingBalanceProvider(pending[0].key.clone()))?;
        let (token, decimals) =
            debited_token_for_step(step, registry, chain_id).ok_or_else(|| {
                Error::UnknownToken {
                    symbol: format!("<debit token for {}>", step.schema_ref),
                    chain_id,
                }
            })?;

        // Balance reads are read-only and independent; issue them together
        // and await jointly before touching the step.
        let lookups = futures::future::try_join_all(
            pending.iter().map(|_entry| balances.balance_of(token)),
        )
        .await?;

        for (entry, balance) in pending.iter().zip(lookups) {
            let resolved = to_base_units(&entry.spec, decimals, Some(balance), &entry.key)?;
            debug!(
                step = %step.schema_ref,
                key = %entry.key,
                %balance,
                %resolved,
                "resolved percent_of_balance input"
            );
            step.inputs.insert(
                entry.key.clone(),
                json!({ "kind": "wei", "value": resolved.to_string() }),
            );
        }
        if let Some(meta) = step.meta.as_mut() {
            meta.percent_of_balance.clear();
        }
    }
    Ok(())
}

/// Identify the token a percent amount is denominated in: the first
/// address-or-symbol input among the conventional token keys.
fn debited_token_for_step(
    step: &PlanStep,
    registry: &dyn AddressRegistry,
    chain_id: u64,
) -> Option<(alloy_primitives::Address, u32)> {
    for key in TOKEN_KEYS {
        let Some(value) = step.inputs.get(key).and_then(Value::as_str) else {
            continue;
        };
        if is_address(value) {
            if let Ok(address) = parse_address(value) {
                return Some((address, 18));
            }
        }
        if let Ok(info) = registry.token(value, chain_id) {
            return Some((info.address, u32::from(info.decimals)));
        }
    }
    None
}
