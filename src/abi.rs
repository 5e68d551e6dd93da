/// Function-signature parsing and Solidity ABI encoding/decoding.
///
/// Schema documents declare functions as human-readable signature strings
/// (`supply(address asset, uint256 amount, address onBehalfOf, uint16
/// referralCode)`, optionally prefixed with `function` and suffixed with
/// `payable` / `returns (...)`). This module parses those strings into
/// [`AbiFunction`]s, canonicalizes type names, recomputes 4-byte selectors,
/// and implements the full head/tail ABI layout in both directions. Dynamic
/// types (unsized arrays, `bytes`, `string`) contribute a 32-byte offset word
/// to the head section with their payload in the tail; static types are
/// written directly into the head.
///
/// Values travel as `serde_json::Value` in canonical wire form: addresses as
/// lowercase 0x-hex strings, integers as decimal strings, fixed and dynamic
/// bytes as 0x-hex, tuples as JSON arrays. Decoding produces exactly this
/// form, so encode → decode round-trips are value-identical.
use alloy_primitives::{keccak256, U256};
use serde_json::Value;
use std::str::FromStr;

/// One named parameter in a function signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbiParam {
    /// Declared parameter name; empty when the signature omits it.
    pub name: String,
    pub spec: AbiTypeSpec,
}

/// Canonicalized ABI type: `uint256`, `address`, `tuple[2]`, `bytes`, …
/// Tuple kinds carry their components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbiTypeSpec {
    pub kind: String,
    pub components: Vec<AbiParam>,
}

impl AbiTypeSpec {
    pub fn simple(kind: impl Into<String>) -> Self {
        AbiTypeSpec {
            kind: kind.into(),
            components: Vec::new(),
        }
    }

    pub fn is_tuple(&self) -> bool {
        self.kind.starts_with("tuple")
    }
}

/// A parsed function: name, named inputs, outputs, payability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbiFunction {
    pub name: String,
    pub inputs: Vec<AbiParam>,
    pub outputs: Vec<AbiTypeSpec>,
    pub payable: bool,
}

impl AbiFunction {
    /// Canonical signature string, e.g. `swap((address,uint24)[],uint256)`.
    pub fn canonical_signature(&self) -> Result<String, String> {
        canonical_signature(
            &self.name,
            &self
                .inputs
                .iter()
                .map(|param| param.spec.clone())
                .collect::<Vec<_>>(),
        )
    }

    /// 4-byte selector recomputed from the canonical signature.
    pub fn selector(&self) -> Result<[u8; 4], String> {
        let signature = self.canonical_signature()?;
        let hash = keccak256(signature.as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash.as_slice()[..4]);
        Ok(selector)
    }

    /// Encode a full call: selector followed by ABI-encoded arguments.
    pub fn encode_call(&self, values: &[Value]) -> Result<Vec<u8>, String> {
        let specs = self
            .inputs
            .iter()
            .map(|param| param.spec.clone())
            .collect::<Vec<_>>();
        let mut out = self.selector()?.to_vec();
        out.extend_from_slice(&encode_abi_params(&specs, values)?);
        Ok(out)
    }

    /// Decode calldata (without inspecting the selector) back into canonical
    /// wire-form values, one per input parameter.
    pub fn decode_call_args(&self, calldata: &[u8]) -> Result<Vec<Value>, String> {
        if calldata.len() < 4 {
            return Err("calldata must include at least a 4-byte selector".to_string());
        }
        let specs = self
            .inputs
            .iter()
            .map(|param| param.spec.clone())
            .collect::<Vec<_>>();
        decode_abi_params(&specs, &calldata[4..])
    }

    /// Decode a call result and return the first output as a `U256`, when
    /// the first output is integer-shaped. Used to recover simulated output
    /// amounts.
    pub fn decode_first_output_uint(&self, data: &[u8]) -> Result<Option<U256>, String> {
        let Some(first) = self.outputs.first() else {
            return Ok(None);
        };
        let kind = first.kind.as_str();
        if !(kind.starts_with("uint") || kind.starts_with("int")) || kind.ends_with(']') {
            return Ok(None);
        }
        if data.len() < 32 {
            return Err("call result shorter than one ABI word".to_string());
        }
        Ok(Some(U256::from_be_slice(&data[..32])))
    }
}

// ── Signature parsing ────────────────────────────────────────────────────────

/// Parse a human-readable function signature into an [`AbiFunction`].
///
/// Accepts an optional `function` keyword, data-location keywords on
/// parameters (`memory`, `calldata`), a `payable` mutability marker, and an
/// optional `returns (...)` clause.
pub fn parse_signature(raw: &str) -> Result<AbiFunction, String> {
    let mut rest = raw.trim();
    while let Some(stripped) = rest.strip_prefix("function ") {
        rest = stripped.trim_start();
    }

    let open = rest
        .find('(')
        .ok_or_else(|| format!("signature missing parameter list: {raw}"))?;
    let name = rest[..open].trim();
    if name.is_empty() {
        return Err(format!("signature missing function name: {raw}"));
    }
    if !name
        .chars()
        .all(|char| char.is_ascii_alphanumeric() || char == '_')
    {
        return Err(format!("invalid function name in signature: {name}"));
    }

    let close = matching_paren(rest, open)?;
    let inputs = parse_param_list(&rest[open + 1..close])?;

    let trailer = rest[close + 1..].trim();
    let payable = trailer
        .split(|char: char| !char.is_ascii_alphanumeric())
        .any(|word| word == "payable");

    let outputs = if let Some(returns_at) = trailer.find("returns") {
        let after = trailer[returns_at + "returns".len()..].trim_start();
        let ret_open = after
            .find('(')
            .ok_or_else(|| "returns clause missing parameter list".to_string())?;
        let ret_close = matching_paren(after, ret_open)?;
        parse_param_list(&after[ret_open + 1..ret_close])?
            .into_iter()
            .map(|param| param.spec)
            .collect()
    } else {
        Vec::new()
    };

    Ok(AbiFunction {
        name: name.to_string(),
        inputs,
        outputs,
        payable,
    })
}

/// Extract the function name from a signature string without full parsing.
pub fn method_name_from_signature(raw: &str) -> Option<String> {
    parse_signature(raw).ok().map(|function| function.name)
}

fn matching_paren(text: &str, open: usize) -> Result<usize, String> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    for (index, byte) in bytes.iter().enumerate().skip(open) {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(index);
                }
            }
            _ => {}
        }
    }
    Err(format!("unbalanced parentheses in signature: {text}"))
}

fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, byte) in list.bytes().enumerate() {
        match byte {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&list[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    if start < list.len() || !parts.is_empty() {
        parts.push(&list[start..]);
    } else if !list.trim().is_empty() {
        parts.push(list);
    }
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

fn parse_param_list(list: &str) -> Result<Vec<AbiParam>, String> {
    split_top_level(list).into_iter().map(parse_param).collect()
}

fn parse_param(raw: &str) -> Result<AbiParam, String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('(') {
        // Tuple parameter: "(address a, uint256 b)[2] name"
        let close = matching_paren(trimmed, 0)?;
        let components = parse_param_list(&trimmed[1..close])?;
        let after = trimmed[close + 1..].trim();
        let (suffix, name) = split_suffix_and_name(after)?;
        validate_array_suffix(&suffix)?;
        return Ok(AbiParam {
            name,
            spec: AbiTypeSpec {
                kind: format!("tuple{suffix}"),
                components,
            },
        });
    }

    let mut tokens = trimmed
        .split_whitespace()
        .filter(|token| !matches!(*token, "memory" | "calldata" | "storage" | "indexed"));
    let kind_raw = tokens
        .next()
        .ok_or_else(|| format!("empty parameter in signature: {raw}"))?;
    let name = tokens.next().unwrap_or("").to_string();
    if tokens.next().is_some() {
        return Err(format!("unexpected tokens in parameter: {raw}"));
    }
    Ok(AbiParam {
        name,
        spec: AbiTypeSpec::simple(normalize_raw_kind(kind_raw)?),
    })
}

fn split_suffix_and_name(after: &str) -> Result<(String, String), String> {
    let trimmed = after.trim();
    let suffix_end = trimmed
        .find(|char: char| !matches!(char, '[' | ']') && !char.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let suffix = trimmed[..suffix_end].to_string();
    let name = trimmed[suffix_end..].trim();
    let name = name
        .split_whitespace()
        .find(|token| !matches!(*token, "memory" | "calldata" | "storage"))
        .unwrap_or("");
    Ok((suffix, name.to_string()))
}

// ── Type canonicalization (uint → uint256, whitespace stripping) ─────────────

pub fn normalize_raw_kind(raw_kind: &str) -> Result<String, String> {
    let compact = raw_kind
        .chars()
        .filter(|char| !char.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    if compact.is_empty() {
        return Err("abi type must be non-empty".to_string());
    }

    if let Some(suffix) = compact.strip_prefix("tuple") {
        validate_array_suffix(suffix)?;
        return Ok(format!("tuple{suffix}"));
    }

    let (base, suffix) = split_base_and_suffix(&compact);
    validate_array_suffix(suffix)?;
    let canonical_base = match base {
        "uint" => "uint256".to_string(),
        "int" => "int256".to_string(),
        _ => base.to_string(),
    };
    if canonical_base.is_empty() {
        return Err("abi type base must be non-empty".to_string());
    }
    Ok(format!("{canonical_base}{suffix}"))
}

pub fn canonical_signature(
    function_name: &str,
    inputs: &[AbiTypeSpec],
) -> Result<String, String> {
    let trimmed_name = function_name.trim();
    if trimmed_name.is_empty() {
        return Err("function name must be non-empty".to_string());
    }
    let mut normalized_args = Vec::with_capacity(inputs.len());
    for input in inputs {
        normalized_args.push(canonicalize_type_spec(input)?);
    }
    Ok(format!("{trimmed_name}({})", normalized_args.join(",")))
}

fn canonicalize_type_spec(spec: &AbiTypeSpec) -> Result<String, String> {
    let normalized_kind = normalize_raw_kind(&spec.kind)?;
    if let Some(suffix) = normalized_kind.strip_prefix("tuple") {
        if spec.components.is_empty() {
            return Err("tuple type spec must include components".to_string());
        }
        let mut components = Vec::with_capacity(spec.components.len());
        for component in &spec.components {
            components.push(canonicalize_type_spec(&component.spec)?);
        }
        return Ok(format!("({}){suffix}", components.join(",")));
    }
    Ok(normalized_kind)
}

fn split_base_and_suffix(kind: &str) -> (&str, &str) {
    if let Some(start) = kind.find('[') {
        (&kind[..start], &kind[start..])
    } else {
        (kind, "")
    }
}

fn validate_array_suffix(raw_suffix: &str) -> Result<(), String> {
    if raw_suffix.is_empty() {
        return Ok(());
    }
    let bytes = raw_suffix.as_bytes();
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index] != b'[' {
            return Err(format!("invalid array suffix in abi type: {raw_suffix}"));
        }
        index = index.saturating_add(1);
        while index < bytes.len() && bytes[index].is_ascii_digit() {
            index = index.saturating_add(1);
        }
        if index >= bytes.len() || bytes[index] != b']' {
            return Err(format!("invalid array suffix in abi type: {raw_suffix}"));
        }
        index = index.saturating_add(1);
    }
    Ok(())
}

fn split_array_type(kind: &str) -> Option<(String, Option<usize>)> {
    if !kind.ends_with(']') {
        return None;
    }
    let start = kind.rfind('[')?;
    let base = kind[..start].to_string();
    let len_raw = &kind[start + 1..kind.len().saturating_sub(1)];
    if len_raw.is_empty() {
        return Some((base, None));
    }
    len_raw.parse::<usize>().ok().map(|len| (base, Some(len)))
}

fn element_spec_of(spec: &AbiTypeSpec, element_kind: String) -> AbiTypeSpec {
    AbiTypeSpec {
        kind: element_kind,
        components: spec.components.clone(),
    }
}

fn is_dynamic_type(spec: &AbiTypeSpec) -> Result<bool, String> {
    Ok(static_word_size(spec)?.is_none())
}

fn static_word_size(spec: &AbiTypeSpec) -> Result<Option<usize>, String> {
    if let Some((element_kind, maybe_len)) = split_array_type(spec.kind.trim()) {
        let Some(array_len) = maybe_len else {
            return Ok(None);
        };
        let element = element_spec_of(spec, element_kind);
        let Some(element_words) = static_word_size(&element)? else {
            return Ok(None);
        };
        return Ok(Some(element_words.saturating_mul(array_len)));
    }

    let kind = spec.kind.trim().to_ascii_lowercase();
    if kind == "string" || kind == "bytes" {
        return Ok(None);
    }
    if kind == "tuple" {
        let mut words = 0usize;
        for component in &spec.components {
            let Some(component_words) = static_word_size(&component.spec)? else {
                return Ok(None);
            };
            words = words.saturating_add(component_words);
        }
        return Ok(Some(words));
    }
    Ok(Some(1))
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encode a slice of typed values according to the Solidity ABI head/tail
/// layout.
pub fn encode_abi_params(specs: &[AbiTypeSpec], values: &[Value]) -> Result<Vec<u8>, String> {
    if specs.len() != values.len() {
        return Err(format!(
            "abi encode arity mismatch: expected {} values, got {}",
            specs.len(),
            values.len()
        ));
    }

    // First pass: compute head section size so tail offsets can be
    // pre-calculated.
    let mut head_size_words = 0usize;
    for spec in specs {
        if is_dynamic_type(spec)? {
            head_size_words = head_size_words.saturating_add(1);
        } else {
            let Some(words) = static_word_size(spec)? else {
                return Err("failed to compute static abi word size".to_string());
            };
            head_size_words = head_size_words.saturating_add(words);
        }
    }

    let head_size_bytes = head_size_words.saturating_mul(32);
    let mut heads: Vec<Vec<u8>> = Vec::with_capacity(specs.len());
    let mut tails: Vec<Vec<u8>> = Vec::new();
    let mut tail_size_bytes = 0usize;

    for (index, (spec, value)) in specs.iter().zip(values.iter()).enumerate() {
        if is_dynamic_type(spec)? {
            let tail = encode_abi_dynamic(spec, value, &format!("arg[{index}]"))?;
            let offset = head_size_bytes.saturating_add(tail_size_bytes);
            heads.push(encode_u256_word(U256::from(offset)));
            tail_size_bytes = tail_size_bytes.saturating_add(tail.len());
            tails.push(tail);
        } else {
            heads.push(encode_abi_static(spec, value, &format!("arg[{index}]"))?);
        }
    }

    let mut out = Vec::with_capacity(head_size_bytes.saturating_add(tail_size_bytes));
    for head in heads {
        out.extend_from_slice(&head);
    }
    for tail in tails {
        out.extend_from_slice(&tail);
    }
    Ok(out)
}

fn encode_abi_static(spec: &AbiTypeSpec, value: &Value, field: &str) -> Result<Vec<u8>, String> {
    if is_dynamic_type(spec)? {
        return Err(format!("{field} is dynamic and cannot be encoded as static"));
    }

    if let Some((element_kind, Some(array_len))) = split_array_type(spec.kind.trim()) {
        let values = value
            .as_array()
            .ok_or_else(|| format!("{field} must be an array for fixed-size ABI array"))?;
        if values.len() != array_len {
            return Err(format!(
                "{field} length mismatch: expected {array_len} got {}",
                values.len()
            ));
        }
        let element_spec = element_spec_of(spec, element_kind);
        let mut out = Vec::new();
        for (idx, item) in values.iter().enumerate() {
            out.extend_from_slice(&encode_abi_static(
                &element_spec,
                item,
                &format!("{field}[{idx}]"),
            )?);
        }
        return Ok(out);
    }

    let kind = spec.kind.trim().to_ascii_lowercase();
    if kind == "tuple" {
        let values = tuple_values(value, field)?;
        if values.len() != spec.components.len() {
            return Err(format!(
                "{field} tuple arity mismatch: expected {} got {}",
                spec.components.len(),
                values.len()
            ));
        }
        let mut out = Vec::new();
        for (idx, (component, component_value)) in
            spec.components.iter().zip(values.iter()).enumerate()
        {
            out.extend_from_slice(&encode_abi_static(
                &component.spec,
                component_value,
                &format!("{field}.{idx}"),
            )?);
        }
        return Ok(out);
    }

    encode_abi_primitive_word(&kind, value, field)
}

fn encode_abi_dynamic(spec: &AbiTypeSpec, value: &Value, field: &str) -> Result<Vec<u8>, String> {
    if !is_dynamic_type(spec)? {
        return Err(format!("{field} is static and cannot be encoded as dynamic"));
    }

    if let Some((element_kind, maybe_len)) = split_array_type(spec.kind.trim()) {
        let values = value
            .as_array()
            .ok_or_else(|| format!("{field} must be an array for ABI array type"))?;
        if let Some(expected_len) = maybe_len {
            if values.len() != expected_len {
                return Err(format!(
                    "{field} length mismatch: expected {expected_len} got {}",
                    values.len()
                ));
            }
        }
        let element_spec = element_spec_of(spec, element_kind);
        let repeated_specs = vec![element_spec; values.len()];
        let encoded_elements = encode_abi_params(&repeated_specs, values)?;
        let mut out = Vec::new();
        if maybe_len.is_none() {
            out.extend_from_slice(&encode_u256_word(U256::from(values.len())));
        }
        out.extend_from_slice(&encoded_elements);
        return Ok(out);
    }

    let kind = spec.kind.trim().to_ascii_lowercase();
    if kind == "tuple" {
        let values = tuple_values(value, field)?;
        let specs = spec
            .components
            .iter()
            .map(|component| component.spec.clone())
            .collect::<Vec<_>>();
        return encode_abi_params(&specs, values);
    }
    if kind == "bytes" {
        let raw = value
            .as_str()
            .ok_or_else(|| format!("{field} must be a 0x-prefixed hex string"))?;
        let bytes = decode_hex_blob(raw, field)?;
        return Ok(encode_dynamic_bytes(&bytes));
    }
    if kind == "string" {
        let text = value
            .as_str()
            .ok_or_else(|| format!("{field} must be a string"))?;
        return Ok(encode_dynamic_bytes(text.as_bytes()));
    }
    Err(format!("unsupported dynamic abi type: {kind}"))
}

/// Length word followed by the payload zero-padded to the next 32-byte
/// boundary.
fn encode_dynamic_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&encode_u256_word(U256::from(bytes.len())));
    out.extend_from_slice(bytes);
    let padding = (32usize.saturating_sub(bytes.len() % 32)) % 32;
    if padding > 0 {
        out.extend(vec![0u8; padding]);
    }
    out
}

fn encode_abi_primitive_word(kind: &str, value: &Value, field: &str) -> Result<Vec<u8>, String> {
    match kind {
        "address" => {
            let raw = value
                .as_str()
                .ok_or_else(|| format!("{field} address must be a string"))?;
            let normalized = normalize_address_hex(raw)?;
            let mut word = vec![0u8; 32];
            let bytes = hex::decode(normalized.trim_start_matches("0x"))
                .map_err(|error| format!("failed to decode {field} address: {error}"))?;
            word[12..].copy_from_slice(&bytes);
            Ok(word)
        }
        "bool" => {
            let raw = value
                .as_bool()
                .ok_or_else(|| format!("{field} bool must be true/false"))?;
            Ok(encode_u256_word(U256::from(u8::from(raw))))
        }
        _ if kind.starts_with("uint") => {
            let parsed = parse_u256_from_json(value, field)?;
            Ok(encode_u256_word(parsed))
        }
        _ if kind.starts_with("int") => {
            let parsed = parse_i128_from_json(value, field)?;
            if parsed < 0 {
                return Err(format!(
                    "{field} negative signed integers are not supported"
                ));
            }
            Ok(encode_u256_word(U256::from(parsed as u128)))
        }
        _ if kind.starts_with("bytes") => {
            let width = fixed_bytes_width(kind)?;
            let raw = value
                .as_str()
                .ok_or_else(|| format!("{field} fixed bytes must be a hex string"))?;
            let bytes = decode_hex_blob(raw, field)?;
            if bytes.len() > width {
                return Err(format!(
                    "{field} length exceeds bytes{width}: {} bytes",
                    bytes.len()
                ));
            }
            let mut word = vec![0u8; 32];
            word[..bytes.len()].copy_from_slice(&bytes);
            Ok(word)
        }
        _ => Err(format!("unsupported abi primitive type: {kind}")),
    }
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decode ABI-encoded data back into canonical wire-form JSON values.
pub fn decode_abi_params(specs: &[AbiTypeSpec], data: &[u8]) -> Result<Vec<Value>, String> {
    let mut out = Vec::with_capacity(specs.len());
    let mut head_offset = 0usize;
    for (index, spec) in specs.iter().enumerate() {
        let field = format!("arg[{index}]");
        if is_dynamic_type(spec)? {
            let offset = read_usize_word(data, head_offset, &field)?;
            let tail = data
                .get(offset..)
                .ok_or_else(|| format!("{field} tail offset {offset} out of range"))?;
            out.push(decode_abi_dynamic(spec, tail, &field)?);
            head_offset = head_offset.saturating_add(32);
        } else {
            let words = static_word_size(spec)?
                .ok_or_else(|| "failed to compute static abi word size".to_string())?;
            let end = head_offset.saturating_add(words.saturating_mul(32));
            let slice = data
                .get(head_offset..end)
                .ok_or_else(|| format!("{field} truncated static data"))?;
            out.push(decode_abi_static(spec, slice, &field)?);
            head_offset = end;
        }
    }
    Ok(out)
}

fn decode_abi_static(spec: &AbiTypeSpec, data: &[u8], field: &str) -> Result<Value, String> {
    if let Some((element_kind, Some(array_len))) = split_array_type(spec.kind.trim()) {
        let element_spec = element_spec_of(spec, element_kind);
        let element_words = static_word_size(&element_spec)?
            .ok_or_else(|| format!("{field} fixed array of dynamic elements is not static"))?;
        let stride = element_words.saturating_mul(32);
        let mut items = Vec::with_capacity(array_len);
        for idx in 0..array_len {
            let start = idx.saturating_mul(stride);
            let slice = data
                .get(start..start + stride)
                .ok_or_else(|| format!("{field}[{idx}] truncated array data"))?;
            items.push(decode_abi_static(
                &element_spec,
                slice,
                &format!("{field}[{idx}]"),
            )?);
        }
        return Ok(Value::Array(items));
    }

    let kind = spec.kind.trim().to_ascii_lowercase();
    if kind == "tuple" {
        let mut items = Vec::with_capacity(spec.components.len());
        let mut offset = 0usize;
        for (idx, component) in spec.components.iter().enumerate() {
            let words = static_word_size(&component.spec)?
                .ok_or_else(|| format!("{field}.{idx} dynamic component in static tuple"))?;
            let end = offset.saturating_add(words.saturating_mul(32));
            let slice = data
                .get(offset..end)
                .ok_or_else(|| format!("{field}.{idx} truncated tuple data"))?;
            items.push(decode_abi_static(
                &component.spec,
                slice,
                &format!("{field}.{idx}"),
            )?);
            offset = end;
        }
        return Ok(Value::Array(items));
    }

    decode_abi_primitive_word(&kind, data, field)
}

fn decode_abi_dynamic(spec: &AbiTypeSpec, data: &[u8], field: &str) -> Result<Value, String> {
    if let Some((element_kind, maybe_len)) = split_array_type(spec.kind.trim()) {
        let element_spec = element_spec_of(spec, element_kind);
        let (length, body) = match maybe_len {
            Some(fixed) => (fixed, data),
            None => {
                let length = read_usize_word(data, 0, field)?;
                (length, data.get(32..).unwrap_or(&[]))
            }
        };
        let specs = vec![element_spec; length];
        let items = decode_abi_params(&specs, body)?;
        return Ok(Value::Array(items));
    }

    let kind = spec.kind.trim().to_ascii_lowercase();
    if kind == "tuple" {
        let specs = spec
            .components
            .iter()
            .map(|component| component.spec.clone())
            .collect::<Vec<_>>();
        return Ok(Value::Array(decode_abi_params(&specs, data)?));
    }
    if kind == "bytes" {
        let length = read_usize_word(data, 0, field)?;
        let payload = data
            .get(32..32 + length)
            .ok_or_else(|| format!("{field} truncated bytes payload"))?;
        return Ok(Value::String(format!("0x{}", hex::encode(payload))));
    }
    if kind == "string" {
        let length = read_usize_word(data, 0, field)?;
        let payload = data
            .get(32..32 + length)
            .ok_or_else(|| format!("{field} truncated string payload"))?;
        let text = std::str::from_utf8(payload)
            .map_err(|error| format!("{field} invalid utf-8 string: {error}"))?;
        return Ok(Value::String(text.to_string()));
    }
    Err(format!("unsupported dynamic abi type: {kind}"))
}

fn decode_abi_primitive_word(kind: &str, data: &[u8], field: &str) -> Result<Value, String> {
    let word = data
        .get(..32)
        .ok_or_else(|| format!("{field} truncated word"))?;
    match kind {
        "address" => Ok(Value::String(format!("0x{}", hex::encode(&word[12..])))),
        "bool" => Ok(Value::Bool(word[31] != 0)),
        _ if kind.starts_with("uint") || kind.starts_with("int") => {
            Ok(Value::String(U256::from_be_slice(word).to_string()))
        }
        _ if kind.starts_with("bytes") => {
            let width = fixed_bytes_width(kind)?;
            Ok(Value::String(format!("0x{}", hex::encode(&word[..width]))))
        }
        _ => Err(format!("unsupported abi primitive type: {kind}")),
    }
}

fn read_usize_word(data: &[u8], offset: usize, field: &str) -> Result<usize, String> {
    let word = data
        .get(offset..offset + 32)
        .ok_or_else(|| format!("{field} truncated offset word"))?;
    let value = U256::from_be_slice(word);
    usize::try_from(value).map_err(|_error| format!("{field} offset exceeds usize"))
}

// ── Shared primitive helpers ─────────────────────────────────────────────────

fn fixed_bytes_width(kind: &str) -> Result<usize, String> {
    let width_raw = kind.trim_start_matches("bytes");
    let width = width_raw
        .parse::<usize>()
        .map_err(|_error| format!("unsupported abi type: {kind}"))?;
    if !(1..=32).contains(&width) {
        return Err(format!("fixed bytes width must be in 1..=32, got {width}"));
    }
    Ok(width)
}

fn tuple_values<'a>(value: &'a Value, field: &str) -> Result<&'a [Value], String> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| format!("{field} must be a JSON array"))
}

fn normalize_address_hex(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let valid = trimmed.len() == 42
        && trimmed.starts_with("0x")
        && trimmed
            .as_bytes()
            .iter()
            .skip(2)
            .all(|byte| byte.is_ascii_hexdigit());
    if !valid {
        return Err("address must be a 0x-prefixed 20-byte hex string".to_string());
    }
    Ok(trimmed)
}

fn decode_hex_blob(raw: &str, field: &str) -> Result<Vec<u8>, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    if without_prefix.len() % 2 != 0 {
        return Err(format!("{field} hex length must be even"));
    }
    hex::decode(without_prefix).map_err(|error| format!("{field} must be valid hex: {error}"))
}

pub fn parse_u256_from_decimal_or_hex(raw: &str, field: &str) -> Result<U256, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    if let Some(hex_digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if hex_digits.is_empty() {
            return Ok(U256::ZERO);
        }
        if !hex_digits.as_bytes().iter().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(format!("{field} must be valid hex"));
        }
        return U256::from_str_radix(hex_digits, 16)
            .map_err(|error| format!("failed to parse {field} as hex quantity: {error}"));
    }
    if !trimmed.as_bytes().iter().all(|byte| byte.is_ascii_digit()) {
        return Err(format!("{field} must be a decimal string or hex quantity"));
    }
    U256::from_str(trimmed).map_err(|error| format!("failed to parse {field}: {error}"))
}

fn parse_u256_from_json(value: &Value, field: &str) -> Result<U256, String> {
    if let Some(raw) = value.as_str() {
        return parse_u256_from_decimal_or_hex(raw, field);
    }
    if let Some(raw) = value.as_u64() {
        return Ok(U256::from(raw));
    }
    Err(format!("{field} must be a string or unsigned integer"))
}

fn parse_i128_from_json(value: &Value, field: &str) -> Result<i128, String> {
    if let Some(raw) = value.as_i64() {
        return Ok(i128::from(raw));
    }
    let raw = value
        .as_str()
        .ok_or_else(|| format!("{field} must be a string or integer"))?;
    raw.parse::<i128>()
        .map_err(|error| format!("failed to parse {field} as signed integer: {error}"))
}

/// Encode a `U256` as a big-endian 32-byte ABI word.
pub fn encode_u256_word(value: U256) -> Vec<u8> {
    value.to_be_bytes::<32>().to_vec()
}
