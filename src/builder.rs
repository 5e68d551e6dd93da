/// Transaction assembly: target resolution, argument mapping, wire-type
/// coercion, native-value inference, calldata encoding.
///
/// The `to` address resolves in priority order: explicit address on the
/// descriptor, role-based resolution through the protocol-name variants
/// (plus the `lido` and `erc20` generic buckets), and, for generic token
/// actions, the token/asset-like input itself.
///
/// Argument lookup is tolerant: strategy inputs and ABI parameter
/// names rarely agree (`stETHAmount` vs `amount`, `asset` vs `assetSymbol`).
/// The fallback order per parameter is: exact input key, schema-declared
/// arg map, the alias table below, schema default, conventional zero
/// defaults for well-known names, positional `arg{i}`, then
/// [`Error::MissingArgument`].
use crate::abi::{parse_signature, AbiParam};
use crate::amount::{numeric_value_to_u256, to_base_units};
use crate::domain::address::{is_address, parse_address};
use crate::domain::types::{
    ActionDescriptor, Amount, ArgStructure, InputMap, PlanStep, ResolvedTransaction,
};
use crate::error::{Error, Result};
use crate::registry::{
    canonicalize_protocol, protocol_lookup_keys, resolve_role_via_registry, AddressRegistry,
};
use alloy_primitives::{Address, U256};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Per-build context: explicit configuration, no globals.
pub struct BuildCtx<'a> {
    pub registry: &'a dyn AddressRegistry,
    pub chain_id: u64,
    pub caller: Option<Address>,
}

/// Parameter names whose absent address values default to the zero address
/// instead of failing.
const ZERO_DEFAULT_PARAMS: [&str; 4] = ["referral", "onBehalfOf", "recipient", "owner"];

/// Generic role buckets tried after the step's own protocol variants.
const GENERIC_ROLE_PROTOCOLS: [&str; 2] = ["lido", "erc20"];

// ── Data-driven alias table ──────────────────────────────────────────────────

/// Parameter-shape → ordered input keys. One table, applied uniformly, so
/// the resolution order is a single testable function instead of string
/// matching scattered through the builder.
struct AliasRule {
    applies: fn(&str) -> bool,
    keys: &'static [&'static str],
}

fn amount_shaped(name: &str) -> bool {
    name.contains("amount") || name.ends_with("amt")
}
fn recipient_shaped(name: &str) -> bool {
    name == "recipient" || name == "to"
}
fn owner_shaped(name: &str) -> bool {
    name == "owner" || name == "from"
}
fn token_shaped(name: &str) -> bool {
    name == "token" || name == "asset" || name.ends_with("token")
}
fn pool_shaped(name: &str) -> bool {
    name == "pool" || name == "poolid"
}

static ALIAS_TABLE: &[AliasRule] = &[
    AliasRule {
        applies: amount_shaped,
        keys: &["amount", "amountIn", "amountOut", "value", "assets", "shares"],
    },
    AliasRule {
        applies: recipient_shaped,
        keys: &["recipient", "to"],
    },
    AliasRule {
        applies: owner_shaped,
        keys: &["owner", "from"],
    },
    AliasRule {
        applies: token_shaped,
        keys: &["asset", "token", "assetSymbol", "tokenIn", "contract"],
    },
    AliasRule {
        applies: pool_shaped,
        keys: &["pool", "poolId"],
    },
];

fn normalize_param_name(name: &str) -> String {
    name.chars()
        .filter(|char| char.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Exact lookup, tolerant of punctuation differences between ABI parameter
/// names and input keys (`_referral` ↔ `referral`).
fn exact_input_value(param_name: &str, inputs: &InputMap) -> Option<Value> {
    if let Some(value) = inputs.get(param_name) {
        return Some(value.clone());
    }
    let normalized = normalize_param_name(param_name);
    inputs
        .iter()
        .find(|(key, _)| normalize_param_name(key) == normalized)
        .map(|(_, value)| value.clone())
}

/// Alias-table lookup for one ABI parameter name, after exact matching has
/// already failed.
fn aliased_input_value(
    param_name: &str,
    inputs: &InputMap,
    descriptor: &ActionDescriptor,
) -> Option<Value> {
    if let Some(mapped_key) = descriptor.arg_map.get(param_name) {
        if let Some(value) = inputs.get(mapped_key) {
            return Some(value.clone());
        }
    }

    let normalized = normalize_param_name(param_name);
    for rule in ALIAS_TABLE {
        if (rule.applies)(&normalized) {
            for key in rule.keys {
                if let Some(value) = inputs.get(*key) {
                    return Some(value.clone());
                }
            }
        }
    }

    inputs.get(&format!("arg{param_name}")).cloned()
}

// ── Public build entry points ────────────────────────────────────────────────

pub fn build(
    step: &PlanStep,
    descriptor: &ActionDescriptor,
    ctx: &BuildCtx<'_>,
) -> Result<ResolvedTransaction> {
    build_internal(step, descriptor, ctx, None)
}

/// Rebuild with one input overridden, used to fill the slippage-computed
/// minimum after simulation. The original transaction is left untouched.
pub fn build_with_override(
    step: &PlanStep,
    descriptor: &ActionDescriptor,
    ctx: &BuildCtx<'_>,
    param: &str,
    value: Value,
) -> Result<ResolvedTransaction> {
    build_internal(step, descriptor, ctx, Some((param, value)))
}

fn build_internal(
    step: &PlanStep,
    descriptor: &ActionDescriptor,
    ctx: &BuildCtx<'_>,
    override_arg: Option<(&str, Value)>,
) -> Result<ResolvedTransaction> {
    let function = parse_signature(&descriptor.execution.signature)
        .map_err(|reason| Error::schema_invalid(step.schema_ref.to_string(), reason))?;
    let canonical_protocol = canonicalize_protocol(&descriptor.protocol);

    let to = resolve_target(step, descriptor, ctx, &canonical_protocol)?;

    let args = match descriptor.execution.structure {
        ArgStructure::Object => {
            let tuple_param = function
                .inputs
                .first()
                .filter(|param| param.spec.is_tuple())
                .ok_or_else(|| {
                    Error::schema_invalid(
                        step.schema_ref.to_string(),
                        "object argument structure requires a single tuple parameter",
                    )
                })?;
            let components = &tuple_param.spec.components;
            let tuple = build_args(
                components,
                step,
                descriptor,
                ctx,
                &canonical_protocol,
                &override_arg,
            )?;
            vec![Value::Array(tuple)]
        }
        ArgStructure::Tuple => build_args(
            &function.inputs,
            step,
            descriptor,
            ctx,
            &canonical_protocol,
            &override_arg,
        )?,
    };

    let value = resolve_native_value(step, descriptor, function.payable)?;

    let data = function
        .encode_call(&args)
        .map_err(|reason| Error::schema_invalid(step.schema_ref.to_string(), reason))?;
    let signature = function
        .canonical_signature()
        .map_err(|reason| Error::schema_invalid(step.schema_ref.to_string(), reason))?;

    debug!(
        step = %step.schema_ref,
        to = %format!("{to:#x}"),
        function = %signature,
        "built transaction"
    );

    Ok(ResolvedTransaction {
        chain_id: ctx.chain_id,
        to,
        data: format!("0x{}", hex::encode(data)),
        value,
        function_signature: signature,
        args,
    })
}

// ── Target resolution ────────────────────────────────────────────────────────

fn resolve_target(
    step: &PlanStep,
    descriptor: &ActionDescriptor,
    ctx: &BuildCtx<'_>,
    canonical_protocol: &str,
) -> Result<Address> {
    if let Some(address) = descriptor.execution.target.address {
        return Ok(address);
    }

    if let Some(role) = descriptor.execution.target.role.as_deref() {
        let mut candidates = protocol_lookup_keys(&descriptor.protocol);
        for generic in GENERIC_ROLE_PROTOCOLS {
            if !candidates.iter().any(|candidate| candidate == generic) {
                candidates.push(generic.to_string());
            }
        }
        if let Some(address) = resolve_role_via_registry(
            ctx.registry,
            &candidates,
            &role.to_ascii_lowercase(),
            ctx.chain_id,
        ) {
            return Ok(address);
        }
        // Generic token actions: the token itself is the target.
        if canonical_protocol == "erc20" {
            if let Some(address) = token_like_target(step, ctx, canonical_protocol)? {
                return Ok(address);
            }
        }
        return Err(Error::UnknownRole {
            protocol: descriptor.protocol.clone(),
            role: role.to_string(),
            chain_id: ctx.chain_id,
        });
    }

    if canonical_protocol == "erc20" {
        if let Some(address) = token_like_target(step, ctx, canonical_protocol)? {
            return Ok(address);
        }
    }

    Err(Error::UnknownRole {
        protocol: descriptor.protocol.clone(),
        role: "contract".to_string(),
        chain_id: ctx.chain_id,
    })
}

fn token_like_target(
    step: &PlanStep,
    ctx: &BuildCtx<'_>,
    canonical_protocol: &str,
) -> Result<Option<Address>> {
    for key in ["contract", "token", "asset", "assetSymbol"] {
        if let Some(raw) = step.inputs.get(key) {
            let address = coerce_address_or_role(
                raw,
                &AddressCoercion {
                    allow_zero_default: false,
                    param_name: key,
                    default_protocol: Some(canonical_protocol),
                    chain_id: ctx.chain_id,
                    registry: ctx.registry,
                },
            )?;
            return Ok(Some(address));
        }
    }
    Ok(None)
}

// ── Argument assembly ────────────────────────────────────────────────────────

fn build_args(
    params: &[AbiParam],
    step: &PlanStep,
    descriptor: &ActionDescriptor,
    ctx: &BuildCtx<'_>,
    canonical_protocol: &str,
    override_arg: &Option<(&str, Value)>,
) -> Result<Vec<Value>> {
    let function_label = &descriptor.execution.method;
    let mut out = Vec::with_capacity(params.len());

    for (index, param) in params.iter().enumerate() {
        let param_name = param.name.trim();

        let mut resolved = match override_arg {
            Some((name, value)) if *name == param_name => Some(value.clone()),
            _ => exact_input_value(param_name, &step.inputs),
        };

        // The slippage-computed minimum encodes as zero on the first build
        // (the executor rebuilds with the real bound after simulation). This
        // takes precedence over the alias table, which would otherwise let
        // an `amountOutMinimum` parameter swallow `amountIn`.
        if resolved.is_none()
            && descriptor.execution.slippage_param.as_deref() == Some(param_name)
        {
            resolved = Some(json!("0"));
        }

        if resolved.is_none() {
            resolved = aliased_input_value(param_name, &step.inputs, descriptor);
        }

        if resolved.is_none() {
            resolved = descriptor
                .inputs
                .get(param_name)
                .and_then(|spec| spec.default.clone())
                .or_else(|| descriptor.defaults.get(param_name).cloned())
                .map(|default| materialize_template(default, ctx.caller))
                .transpose()?;
        }

        // Conventional zero-defaults for well-known EVM parameter shapes.
        if resolved.is_none() {
            resolved = match normalize_param_name(param_name).as_str() {
                "referral" => Some(json!(format!("{:#x}", Address::ZERO))),
                "referralcode" => Some(json!(0)),
                "onbehalfof" => Some(json!(format!(
                    "{:#x}",
                    ctx.caller.ok_or_else(|| Error::MissingArgument {
                        name: "onBehalfOf".to_string(),
                        function: function_label.clone(),
                    })?
                ))),
                _ => None,
            };
        }

        if resolved.is_none() {
            resolved = step.inputs.get(&format!("arg{index}")).cloned();
        }

        let Some(raw) = resolved else {
            return Err(Error::MissingArgument {
                name: if param_name.is_empty() {
                    format!("arg{index}")
                } else {
                    param_name.to_string()
                },
                function: function_label.clone(),
            });
        };

        out.push(coerce_for_abi(
            &raw,
            param,
            descriptor,
            ctx,
            canonical_protocol,
        )?);
    }

    Ok(out)
}

/// Materialize `{caller}` and `{now}[+|-<seconds>s]` templates in schema
/// defaults. Environment-variable templates are not supported; configuration
/// flows through the explicit context only.
fn materialize_template(value: Value, caller: Option<Address>) -> Result<Value> {
    let Some(text) = value.as_str() else {
        return Ok(value);
    };
    if text == "{caller}" {
        let caller = caller.ok_or_else(|| Error::MissingArgument {
            name: "caller".to_string(),
            function: "{caller} template".to_string(),
        })?;
        return Ok(json!(format!("{caller:#x}")));
    }
    if let Some(rest) = text.strip_prefix("{now}") {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);
        let trimmed = rest.trim_end_matches('s');
        let shifted = if let Some(delta) = trimmed.strip_prefix('+') {
            now + delta.parse::<i64>().unwrap_or(0)
        } else if let Some(delta) = trimmed.strip_prefix('-') {
            now - delta.parse::<i64>().unwrap_or(0)
        } else {
            now
        };
        return Ok(json!(shifted));
    }
    Ok(value)
}

// ── Wire-type coercion ───────────────────────────────────────────────────────

fn coerce_for_abi(
    value: &Value,
    param: &AbiParam,
    descriptor: &ActionDescriptor,
    ctx: &BuildCtx<'_>,
    canonical_protocol: &str,
) -> Result<Value> {
    let name = param.name.trim();
    let kind = param.spec.kind.as_str();

    // Arrays recurse element-wise.
    if kind.ends_with("[]") {
        let inner = AbiParam {
            name: name.to_string(),
            spec: crate::abi::AbiTypeSpec {
                kind: kind[..kind.len() - 2].to_string(),
                components: param.spec.components.clone(),
            },
        };
        let items = value.as_array().ok_or_else(|| Error::InvalidArgument {
            name: name.to_string(),
            expected: "array".to_string(),
            value: value.to_string(),
        })?;
        let coerced = items
            .iter()
            .map(|item| coerce_for_abi(item, &inner, descriptor, ctx, canonical_protocol))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::Array(coerced));
    }

    if kind.starts_with("tuple") {
        let items = value.as_array().ok_or_else(|| Error::InvalidArgument {
            name: name.to_string(),
            expected: "tuple array".to_string(),
            value: value.to_string(),
        })?;
        let coerced = param
            .spec
            .components
            .iter()
            .zip(items.iter())
            .map(|(component, item)| {
                coerce_for_abi(item, component, descriptor, ctx, canonical_protocol)
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Value::Array(coerced));
    }

    if kind == "address" {
        let allow_zero_default = ZERO_DEFAULT_PARAMS.contains(&name);
        let address = coerce_address_or_role(
            value,
            &AddressCoercion {
                allow_zero_default,
                param_name: if name.is_empty() { "address" } else { name },
                default_protocol: Some(canonical_protocol),
                chain_id: ctx.chain_id,
                registry: ctx.registry,
            },
        )?;
        return Ok(json!(format!("{address:#x}")));
    }

    if kind.starts_with("uint") || kind.starts_with("int") {
        let label = if name.is_empty() { "amount" } else { name };
        let quantity = coerce_integer(value, descriptor, label)?;
        return Ok(Value::String(quantity.to_string()));
    }

    if kind == "bytes" || (kind.starts_with("bytes") && kind.len() > 5) {
        let text = value.as_str().unwrap_or_default();
        if !text.starts_with("0x") {
            return Err(Error::InvalidArgument {
                name: name.to_string(),
                expected: format!("{kind} hex string"),
                value: value.to_string(),
            });
        }
        return Ok(value.clone());
    }

    if kind == "bool" {
        return match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(text) if text == "true" || text == "false" => {
                Ok(Value::Bool(text == "true"))
            }
            _ => Err(Error::InvalidArgument {
                name: name.to_string(),
                expected: "bool".to_string(),
                value: value.to_string(),
            }),
        };
    }

    Ok(value.clone())
}

/// Integer coercion: raw integers, decimal strings, 0x-hex strings, or
/// unit-tagged `Amount` objects. A `percent_of_balance` amount reaching this
/// point means the resolution pass never ran; fail loudly rather than encode
/// a wrong quantity.
fn coerce_integer(value: &Value, descriptor: &ActionDescriptor, label: &str) -> Result<U256> {
    if let Some(amount) = Amount::from_value(value) {
        if amount.is_percent_of_balance() {
            return Err(Error::UnresolvedAmount(label.to_string()));
        }
        let decimals = descriptor
            .inputs
            .get(label)
            .and_then(|spec| spec.decimals)
            .unwrap_or(18);
        return to_base_units(&amount, decimals, None, label);
    }
    numeric_value_to_u256(value, label)
}

// ── Address / role / symbol coercion ─────────────────────────────────────────

pub(crate) struct AddressCoercion<'a> {
    pub allow_zero_default: bool,
    pub param_name: &'a str,
    pub default_protocol: Option<&'a str>,
    pub chain_id: u64,
    pub registry: &'a dyn AddressRegistry,
}

/// Accepts a plain address, a `proto.role[.qualifier]` path, or a bare
/// symbol (`WSTETH`), resolving the latter two through the registry: the
/// named (or default) protocol first, then the generic `lido`/`erc20` role
/// buckets, then the token table.
pub(crate) fn coerce_address_or_role(value: &Value, opts: &AddressCoercion<'_>) -> Result<Address> {
    let Some(text) = value.as_str() else {
        return Err(Error::InvalidArgument {
            name: opts.param_name.to_string(),
            expected: "address or role".to_string(),
            value: value.to_string(),
        });
    };

    if is_address(text) {
        return parse_address(text).map_err(|reason| Error::InvalidArgument {
            name: opts.param_name.to_string(),
            expected: reason,
            value: text.to_string(),
        });
    }

    if let Some((protocol, role)) = parse_role_path(text, opts.default_protocol) {
        if let Some(address) = resolve_role_via_registry(
            opts.registry,
            &protocol_lookup_keys(&protocol),
            &role,
            opts.chain_id,
        ) {
            return Ok(address);
        }
    }

    // Bare symbol: generic role buckets, then the token table.
    let symbol = text.trim().to_ascii_lowercase();
    if !symbol.is_empty() && !symbol.starts_with("0x") {
        for protocol in GENERIC_ROLE_PROTOCOLS {
            if let Some(address) = resolve_role_via_registry(
                opts.registry,
                &protocol_lookup_keys(protocol),
                &symbol,
                opts.chain_id,
            ) {
                return Ok(address);
            }
        }
        if let Ok(info) = opts.registry.token(&symbol, opts.chain_id) {
            return Ok(info.address);
        }
    }

    if opts.allow_zero_default {
        return Ok(Address::ZERO);
    }
    Err(Error::InvalidArgument {
        name: opts.param_name.to_string(),
        expected: "address or resolvable role".to_string(),
        value: text.to_string(),
    })
}

/// `"aave.pool.wsteth"` → `(aave, pool)`; `"pool"` → `(default, pool)`.
/// Trailing qualifiers are ignored. Hex strings are not role paths.
fn parse_role_path(text: &str, default_protocol: Option<&str>) -> Option<(String, String)> {
    if text.starts_with("0x") || text.starts_with("0X") {
        return None;
    }
    let parts = text
        .split('.')
        .map(|part| part.trim().to_ascii_lowercase())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    match parts.len() {
        0 => None,
        1 => default_protocol.map(|protocol| (protocol.to_string(), parts[0].clone())),
        _ => Some((parts[0].clone(), parts[1].clone())),
    }
}

// ── Native value inference ───────────────────────────────────────────────────

fn resolve_native_value(
    step: &PlanStep,
    descriptor: &ActionDescriptor,
    payable: bool,
) -> Result<U256> {
    if let Some(raw) = step.inputs.get("value") {
        if let Some(amount) = Amount::from_value(raw) {
            if amount.is_percent_of_balance() {
                return Err(Error::UnresolvedAmount("value".to_string()));
            }
            return to_base_units(&amount, 18, None, "value");
        }
        return numeric_value_to_u256(raw, "value");
    }
    if let Some(declared) = descriptor.execution.value.as_deref() {
        return crate::abi::parse_u256_from_decimal_or_hex(declared, "declared value")
            .map_err(Error::Rpc);
    }
    if payable {
        if let Some(raw) = step.inputs.get("amount") {
            if let Some(amount) = Amount::from_value(raw) {
                if amount.is_percent_of_balance() {
                    return Err(Error::UnresolvedAmount("value".to_string()));
                }
                return to_base_units(&amount, 18, None, "value");
            }
        }
    }
    Ok(U256::ZERO)
}
