/// Schema document loading and normalization.
///
/// Action schema documents arrive in three shapes, and callers never know
/// which one a given document uses:
///
/// 1. **Full descriptor** — `dsl_version` + `protocol` + `execution`; already
///    structured, passed through after validation.
/// 2. **Validation-schema style** — contract/method/params expressed as
///    `const`/`enum` values inside a JSON-Schema-like `properties` wrapper.
/// 3. **Instance style** — `contract`/`method`/`params` as direct values.
///
/// All three normalize into one canonical [`ActionDescriptor`]; downstream
/// code depends only on that type. The loader also owns the per-run
/// descriptor cache and the two document-location conveniences carried over
/// from the on-disk layout: `approve` actions always load from the `erc20`
/// protocol directory, and logical protocol names map onto versioned
/// directories (`aave` → `aave_v3`).
use crate::abi::{method_name_from_signature, parse_signature, AbiFunction};
use crate::domain::address::{is_address, parse_address};
use crate::domain::types::{
    ActionDescriptor, ArgStructure, Constraints, DebitHint, ExecutionSpec, InputMap, InputSpec,
    SchemaRef, TargetSpec,
};
use crate::error::{Error, Result};
use crate::registry::{protocol_lookup_keys, resolve_role_via_registry, AddressRegistry};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Logical protocol → on-disk directory aliases.
const PROTOCOL_DIR_ALIASES: [(&str, &str); 2] = [("aave", "aave_v3"), ("uniswap", "uniswap_v3")];

// ── Document source ──────────────────────────────────────────────────────────

/// Source of raw schema documents, external to the core.
pub trait SchemaStore: Send + Sync {
    /// The document at `<protocol>/actions/<action>.json`.
    fn action_document(&self, protocol: &str, action: &str) -> Result<Value>;

    /// The sibling `<protocol>/index.json` declaring role/address maps.
    fn protocol_index(&self, protocol: &str) -> Result<Value>;
}

/// Document store over in-memory JSON values.
#[derive(Clone, Debug, Default)]
pub struct InMemorySchemaStore {
    actions: BTreeMap<(String, String), Value>,
    indexes: BTreeMap<String, Value>,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_action(&mut self, protocol: &str, action: &str, document: Value) {
        self.actions
            .insert((protocol.to_string(), action.to_string()), document);
    }

    pub fn insert_index(&mut self, protocol: &str, document: Value) {
        self.indexes.insert(protocol.to_string(), document);
    }
}

impl SchemaStore for InMemorySchemaStore {
    fn action_document(&self, protocol: &str, action: &str) -> Result<Value> {
        self.actions
            .get(&(protocol.to_string(), action.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::schema_invalid(
                    format!("{protocol}/actions/{action}.json"),
                    "action document not found",
                )
            })
    }

    fn protocol_index(&self, protocol: &str) -> Result<Value> {
        self.indexes.get(protocol).cloned().ok_or_else(|| {
            Error::schema_invalid(format!("{protocol}/index.json"), "protocol index not found")
        })
    }
}

/// Document store over a schemas directory following the
/// `<root>/<protocol>/actions/<action>.json` convention.
#[derive(Clone, Debug)]
pub struct FsSchemaStore {
    root: PathBuf,
}

impl FsSchemaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsSchemaStore { root: root.into() }
    }

    fn read_json(&self, relative: PathBuf) -> Result<Value> {
        let path = self.root.join(relative);
        let raw = std::fs::read_to_string(&path).map_err(|error| {
            Error::schema_invalid(path.display().to_string(), format!("read failed: {error}"))
        })?;
        serde_json::from_str(&raw).map_err(|error| {
            Error::schema_invalid(path.display().to_string(), format!("invalid JSON: {error}"))
        })
    }
}

impl SchemaStore for FsSchemaStore {
    fn action_document(&self, protocol: &str, action: &str) -> Result<Value> {
        self.read_json(
            PathBuf::from(protocol)
                .join("actions")
                .join(format!("{action}.json")),
        )
    }

    fn protocol_index(&self, protocol: &str) -> Result<Value> {
        self.read_json(PathBuf::from(protocol).join("index.json"))
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// Loads, normalizes, and caches action descriptors for one compilation run.
pub struct SchemaLoader<'a> {
    store: &'a dyn SchemaStore,
    registry: &'a dyn AddressRegistry,
    chain_id_default: u64,
    cache: Mutex<HashMap<SchemaRef, Arc<ActionDescriptor>>>,
}

impl<'a> SchemaLoader<'a> {
    pub fn new(
        store: &'a dyn SchemaStore,
        registry: &'a dyn AddressRegistry,
        chain_id_default: u64,
    ) -> Self {
        SchemaLoader {
            store,
            registry,
            chain_id_default,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load the canonical descriptor for a schema reference. `runtime_inputs`
    /// may supply `contract`/`method`/`value` for documents that defer those
    /// to the caller.
    pub fn load(
        &self,
        schema_ref: &SchemaRef,
        runtime_inputs: Option<&InputMap>,
    ) -> Result<Arc<ActionDescriptor>> {
        let resolved_ref = resolve_document_ref(schema_ref);
        if let Some(cached) = self
            .cache
            .lock()
            .expect("descriptor cache lock should not be poisoned")
            .get(&resolved_ref)
        {
            return Ok(Arc::clone(cached));
        }

        let (stored_ref, document) = self.fetch_document(&resolved_ref)?;
        let descriptor = self.normalize(&stored_ref, &document, runtime_inputs)?;
        validate_descriptor(&descriptor)
            .map_err(|reason| Error::schema_invalid(stored_ref.to_string(), reason))?;

        let shared = Arc::new(descriptor);
        self.cache
            .lock()
            .expect("descriptor cache lock should not be poisoned")
            .insert(resolved_ref, Arc::clone(&shared));
        Ok(shared)
    }

    fn fetch_document(&self, schema_ref: &SchemaRef) -> Result<(SchemaRef, Value)> {
        match self
            .store
            .action_document(&schema_ref.protocol, &schema_ref.action)
        {
            Ok(document) => Ok((schema_ref.clone(), document)),
            Err(original_error) => {
                for (logical, directory) in PROTOCOL_DIR_ALIASES {
                    if schema_ref.protocol == logical {
                        if let Ok(document) =
                            self.store.action_document(directory, &schema_ref.action)
                        {
                            debug!(
                                from = %schema_ref.protocol,
                                to = directory,
                                "resolved schema through protocol directory alias"
                            );
                            return Ok((
                                SchemaRef::new(directory, schema_ref.action.clone()),
                                document,
                            ));
                        }
                    }
                }
                Err(original_error)
            }
        }
    }

    fn normalize(
        &self,
        schema_ref: &SchemaRef,
        document: &Value,
        runtime_inputs: Option<&InputMap>,
    ) -> Result<ActionDescriptor> {
        if is_full_descriptor(document) {
            self.normalize_full(schema_ref, document)
        } else {
            self.normalize_adapter(schema_ref, document, runtime_inputs)
        }
    }

    // Shape (a): already-canonical document.
    fn normalize_full(&self, schema_ref: &SchemaRef, document: &Value) -> Result<ActionDescriptor> {
        let execution = document
            .get("execution")
            .ok_or_else(|| Error::schema_invalid(schema_ref.to_string(), "missing execution"))?;
        let evm = match execution.get("evm") {
            Some(evm) => evm,
            None => {
                let environment = ["aptos", "sui"]
                    .iter()
                    .find(|key| execution.get(**key).is_some())
                    .copied()
                    .unwrap_or("unknown");
                return Err(Error::UnsupportedExecution(environment.to_string()));
            }
        };

        let protocol_block = document.get("protocol").cloned().unwrap_or(Value::Null);
        let protocol = protocol_block
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&schema_ref.protocol)
            .to_string();
        let version = protocol_block
            .get("version")
            .map(value_to_display_string)
            .unwrap_or_else(|| "1".to_string());
        let chain_id = evm
            .get("chainId")
            .or_else(|| protocol_block.get("chainId"))
            .and_then(Value::as_u64)
            .unwrap_or(self.chain_id_default);

        let signature_raw = schema_signature(document).ok_or_else(|| {
            Error::schema_invalid(schema_ref.to_string(), "missing function signature or abi")
        })?;
        let function = parse_function(&signature_raw)
            .map_err(|reason| Error::schema_invalid(schema_ref.to_string(), reason))?;
        let method = evm
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or(&function.name)
            .to_string();
        if method != function.name {
            return Err(Error::schema_invalid(
                schema_ref.to_string(),
                format!(
                    "declared method {method} does not match signature function {}",
                    function.name
                ),
            ));
        }

        let structure = match evm.get("structure").and_then(Value::as_str) {
            Some("object") => ArgStructure::Object,
            Some("tuple") => ArgStructure::Tuple,
            Some(other) => {
                return Err(Error::schema_invalid(
                    schema_ref.to_string(),
                    format!("unknown structure: {other}"),
                ))
            }
            None => infer_structure(&function),
        };

        let inputs: BTreeMap<String, InputSpec> = document
            .pointer("/io/inputs")
            .map(|raw| {
                serde_json::from_value(raw.clone()).map_err(|error| {
                    Error::schema_invalid(
                        schema_ref.to_string(),
                        format!("invalid io.inputs: {error}"),
                    )
                })
            })
            .transpose()?
            .unwrap_or_default();

        let mut defaults: InputMap = document
            .get("defaults")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut arg_map = schema_arg_map(document);
        let mut slippage_param = None;
        let mut arg_order = Vec::new();

        // Fold arg_object / arg_tuple templates into the canonical model:
        // "{key}" renames, literals become defaults, and the
        // "{min_out_computed}" marker names the slippage-computed parameter.
        if let Some(arg_object) = evm.get("arg_object").and_then(Value::as_object) {
            for (param, template) in arg_object {
                arg_order.push(param.clone());
                fold_template(
                    param,
                    template,
                    &mut arg_map,
                    &mut defaults,
                    &mut slippage_param,
                );
            }
        }
        if let Some(arg_tuple) = evm.get("arg_tuple").and_then(Value::as_array) {
            for (index, template) in arg_tuple.iter().enumerate() {
                let param = function
                    .inputs
                    .get(index)
                    .map(|input| input.name.clone())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("arg{index}"));
                arg_order.push(param.clone());
                fold_template(
                    &param,
                    template,
                    &mut arg_map,
                    &mut defaults,
                    &mut slippage_param,
                );
            }
        }
        if arg_order.is_empty() {
            arg_order = ordered_input_keys(&inputs, &[]);
        }

        let hints = extract_hints(document);
        let target = target_from_declared(
            evm.get("contract"),
            document,
            &protocol,
            chain_id,
            self.registry,
        );

        Ok(ActionDescriptor {
            protocol,
            version,
            chain_id,
            inputs,
            defaults,
            constraints: parse_constraints(document.get("constraints")),
            debits: hints.debits,
            spender_role: hints.spender_role,
            arg_map,
            execution: ExecutionSpec {
                target,
                method,
                structure,
                signature: signature_raw,
                arg_order,
                value: evm.get("value").map(value_to_display_string),
                gas_limit: evm.get("gas_limit").and_then(Value::as_u64),
                slippage_param,
            },
        })
    }

    // Shapes (b) and (c): adapter normalization. The two differ only in
    // where contract/method/params/value live.
    fn normalize_adapter(
        &self,
        schema_ref: &SchemaRef,
        document: &Value,
        runtime_inputs: Option<&InputMap>,
    ) -> Result<ActionDescriptor> {
        let runtime = |key: &str| runtime_inputs.and_then(|inputs| inputs.get(key)).cloned();

        let (contract_raw, method_raw, params_schema, value_raw) =
            if let Some(properties) = document.get("properties") {
                let contract = const_or_enum(properties.get("contract"))
                    .or_else(|| runtime("contract"))
                    .or_else(|| properties.get("contract").cloned());
                let method = const_or_enum(properties.get("method"))
                    .or_else(|| runtime("method"))
                    .or_else(|| properties.get("method").cloned());
                let params = properties.get("params").cloned().unwrap_or(Value::Null);
                let value = properties
                    .pointer("/value/const")
                    .or_else(|| properties.pointer("/value/default"))
                    .cloned()
                    .or_else(|| runtime("value"));
                (contract, method, params, value)
            } else {
                (
                    document.get("contract").cloned(),
                    document.get("method").cloned(),
                    document.get("params").cloned().unwrap_or(Value::Null),
                    document.get("value").cloned(),
                )
            };

        let signature_raw = schema_signature(document).ok_or_else(|| {
            Error::schema_invalid(schema_ref.to_string(), "action schema missing x-abi")
        })?;

        // Derive the method from the declared low-level signature when the
        // document leaves it out.
        let method = method_raw
            .as_ref()
            .and_then(|value| value.as_str().map(str::to_string))
            .or_else(|| method_name_from_signature(&signature_raw))
            .ok_or_else(|| {
                Error::schema_invalid(schema_ref.to_string(), "action schema missing method")
            })?;

        let contract_value = match contract_raw {
            Some(Value::String(text)) => text,
            Some(Value::Object(map)) => match map.get("const").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => {
                    return Err(Error::schema_invalid(
                        schema_ref.to_string(),
                        "action schema missing contract value (provide inputs.contract)",
                    ))
                }
            },
            _ => {
                return Err(Error::schema_invalid(
                    schema_ref.to_string(),
                    "action schema missing contract",
                ))
            }
        };

        let function = parse_function(&signature_raw)
            .map_err(|reason| Error::schema_invalid(schema_ref.to_string(), reason))?;
        if function.name != method {
            return Err(Error::schema_invalid(
                schema_ref.to_string(),
                format!(
                    "declared method {method} does not match signature function {}",
                    function.name
                ),
            ));
        }

        // Params: raw map or JSON-Schema `{properties, required}` wrapper.
        let (params, required) = match &params_schema {
            Value::Object(map) if map.get("properties").is_some() => {
                let properties = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let required = map
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_else(|| properties.keys().cloned().collect());
                (properties, required)
            }
            Value::Object(map) => (map.clone(), map.keys().cloned().collect()),
            _ => (Map::new(), Vec::new()),
        };

        let mut inputs = BTreeMap::new();
        let mut defaults = InputMap::new();
        for (name, param_schema) in &params {
            let mut spec = InputSpec {
                kind: guess_type_from_param_schema(param_schema),
                required: required.contains(name),
                ..InputSpec::default()
            };
            if let Some(description) = param_schema.get("description").and_then(Value::as_str) {
                spec.description = Some(description.to_string());
            }
            if let Some(enum_values) = param_schema.get("enum").and_then(Value::as_array) {
                spec.enum_values = Some(enum_values.clone());
            }
            if let Some(default) = param_schema.get("default") {
                spec.default = Some(default.clone());
                defaults.insert(name.clone(), default.clone());
            }
            if let Some(min) = param_schema.get("min").and_then(Value::as_f64) {
                spec.min = Some(min);
            }
            if let Some(max) = param_schema.get("max").and_then(Value::as_f64) {
                spec.max = Some(max);
            }
            inputs.insert(name.clone(), spec);
        }
        if value_raw.is_some() {
            inputs.insert(
                "value".to_string(),
                InputSpec {
                    kind: "uint".to_string(),
                    required: false,
                    description: Some("native value to send in wei".to_string()),
                    ..InputSpec::default()
                },
            );
        }

        // Protocol index: names, version, chain id, role→address maps.
        let index = self.store.protocol_index(&schema_ref.protocol)?;
        let protocol = index
            .get("protocol")
            .or_else(|| index.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(&schema_ref.protocol)
            .to_string();
        let version = index
            .get("version")
            .map(value_to_display_string)
            .unwrap_or_else(|| "1".to_string())
            .trim_start_matches(['v', 'V'])
            .to_string();
        let chain_id = index
            .get("chainId")
            .or_else(|| index.get("chain_id"))
            .and_then(Value::as_u64)
            .unwrap_or(self.chain_id_default);

        let target = if is_address(&contract_value) {
            TargetSpec {
                address: parse_address(&contract_value).ok(),
                role: None,
            }
        } else {
            // Role name: resolve through the registry with the document's
            // protocol and chain id; kept as a role for the builder when the
            // registry has no entry yet.
            let address = resolve_role_via_registry(
                self.registry,
                &protocol_lookup_keys(&protocol),
                &contract_value,
                chain_id,
            );
            TargetSpec {
                address,
                role: Some(contract_value.clone()),
            }
        };

        let structure = infer_structure(&function);
        let arg_order = if signature_has_all_names(&function) {
            function
                .inputs
                .iter()
                .map(|input| input.name.clone())
                .collect()
        } else {
            ordered_input_keys(&inputs, &required)
        };

        let hints = extract_hints(document);

        Ok(ActionDescriptor {
            protocol,
            version,
            chain_id,
            inputs,
            defaults,
            constraints: parse_constraints(document.get("constraints")),
            debits: hints.debits,
            spender_role: hints.spender_role,
            arg_map: schema_arg_map(document),
            execution: ExecutionSpec {
                target,
                method,
                structure,
                signature: signature_raw,
                arg_order,
                value: value_raw.map(|raw| value_to_display_string(&raw)),
                gas_limit: None,
                slippage_param: None,
            },
        })
    }
}

/// Approve actions always execute through the ERC-20 schema, whatever
/// protocol the intent named.
pub fn resolve_document_ref(schema_ref: &SchemaRef) -> SchemaRef {
    if schema_ref.action.eq_ignore_ascii_case("approve") && schema_ref.protocol != "erc20" {
        return SchemaRef::new("erc20", schema_ref.action.to_ascii_lowercase());
    }
    schema_ref.clone()
}

// ── Shape helpers ────────────────────────────────────────────────────────────

fn is_full_descriptor(document: &Value) -> bool {
    document.get("dsl_version").is_some()
        && document.get("protocol").is_some()
        && document.get("execution").is_some()
}

fn const_or_enum(value: Option<&Value>) -> Option<Value> {
    let value = value?;
    if let Some(constant) = value.get("const") {
        return Some(constant.clone());
    }
    value
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .cloned()
}

/// Locate the declared low-level signature: root `x-abi`/`xAbi`/`abi`,
/// `execution.evm.signature`, or the same keys under `properties` as
/// const/enum values. Arrays take their first string entry.
fn schema_signature(document: &Value) -> Option<String> {
    let direct = ["x-abi", "xAbi", "abi"]
        .iter()
        .find_map(|key| document.get(*key))
        .cloned();
    let from_execution = document
        .pointer("/execution/evm/signature")
        .cloned()
        .or_else(|| document.pointer("/execution/evm/abi").cloned());
    let from_properties = document.get("properties").and_then(|properties| {
        ["x-abi", "xAbi", "abi"]
            .iter()
            .find_map(|key| const_or_enum(properties.get(*key)))
    });

    let raw = direct.or(from_execution).or(from_properties)?;
    let text = match raw {
        Value::String(text) => text,
        Value::Array(entries) => entries.first().and_then(Value::as_str)?.to_string(),
        _ => return None,
    };
    let trimmed = text.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_function(signature_raw: &str) -> std::result::Result<AbiFunction, String> {
    parse_signature(signature_raw)
}

fn infer_structure(function: &AbiFunction) -> ArgStructure {
    if function.inputs.len() == 1 && function.inputs[0].spec.is_tuple() {
        ArgStructure::Object
    } else {
        ArgStructure::Tuple
    }
}

fn signature_has_all_names(function: &AbiFunction) -> bool {
    !function.inputs.is_empty() && function.inputs.iter().all(|input| !input.name.is_empty())
}

/// Declared-required keys first, then the remaining declared params, deduped.
fn ordered_input_keys(inputs: &BTreeMap<String, InputSpec>, required: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for key in required {
        if !out.contains(key) {
            out.push(key.clone());
        }
    }
    for key in inputs.keys() {
        if key != "value" && !out.contains(key) {
            out.push(key.clone());
        }
    }
    out
}

fn guess_type_from_param_schema(param_schema: &Value) -> String {
    if let Some(pattern) = param_schema.get("pattern").and_then(Value::as_str) {
        if pattern.contains("{40}") {
            return "address".to_string();
        }
    }
    if param_schema.get("enum").is_some() {
        return "enum".to_string();
    }
    match param_schema.get("type").and_then(Value::as_str) {
        Some("integer") => "uint".to_string(),
        Some("string") => {
            let pattern = param_schema.get("pattern").and_then(Value::as_str);
            if pattern.is_some_and(|pattern| {
                pattern
                    .trim_start_matches(['^', '['])
                    .starts_with(|char: char| char.is_ascii_digit())
            }) {
                "uint".to_string()
            } else {
                "string".to_string()
            }
        }
        _ => "string".to_string(),
    }
}

fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

struct SchemaHints {
    spender_role: Option<String>,
    debits: Vec<DebitHint>,
}

/// Approval hints, tolerated in three historical spellings.
fn extract_hints(document: &Value) -> SchemaHints {
    let spender_role = document
        .get("x-spenderRole")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut debits = Vec::new();
    if let Some(entries) = document.get("x-hints-debits").and_then(Value::as_array) {
        for entry in entries {
            if let Ok(hint) = serde_json::from_value::<DebitHint>(entry.clone()) {
                debits.push(hint);
            }
        }
    } else if let Some(entries) = document
        .pointer("/x-debits/x-hints")
        .and_then(Value::as_array)
    {
        for entry in entries {
            if let Ok(hint) = serde_json::from_value::<DebitHint>(entry.clone()) {
                debits.push(hint);
            }
        }
    } else if let Some(amount_key) = document.get("x-debitAmountKey").and_then(Value::as_str) {
        debits.push(DebitHint {
            amount_key: Some(amount_key.to_string()),
            token_param: document
                .get("x-debitTokenParam")
                .and_then(Value::as_str)
                .map(str::to_string),
            token_role: document
                .get("x-debitTokenRole")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    SchemaHints {
        spender_role,
        debits,
    }
}

fn schema_arg_map(document: &Value) -> BTreeMap<String, String> {
    let raw = document
        .get("x-argMap")
        .or_else(|| document.get("x-argsMap"))
        .and_then(Value::as_object);
    let mut out = BTreeMap::new();
    if let Some(map) = raw {
        for (param, key) in map {
            if let Some(key) = key.as_str() {
                out.insert(param.clone(), key.to_string());
            }
        }
    }
    out
}

fn parse_constraints(raw: Option<&Value>) -> Constraints {
    raw.and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

fn target_from_declared(
    declared: Option<&Value>,
    document: &Value,
    protocol: &str,
    chain_id: u64,
    registry: &dyn AddressRegistry,
) -> TargetSpec {
    let declared_role = document
        .pointer("/execution/evm/contractRole")
        .or_else(|| document.get("x-targetRole"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(raw) = declared.and_then(Value::as_str) {
        if is_address(raw) {
            return TargetSpec {
                address: parse_address(raw).ok(),
                role: declared_role,
            };
        }
        let role = declared_role.unwrap_or_else(|| raw.to_string());
        let address = resolve_role_via_registry(
            registry,
            &protocol_lookup_keys(protocol),
            &role,
            chain_id,
        );
        return TargetSpec {
            address,
            role: Some(role),
        };
    }

    let address = declared_role.as_deref().and_then(|role| {
        resolve_role_via_registry(registry, &protocol_lookup_keys(protocol), role, chain_id)
    });
    TargetSpec {
        address,
        role: declared_role,
    }
}

fn fold_template(
    param: &str,
    template: &Value,
    arg_map: &mut BTreeMap<String, String>,
    defaults: &mut InputMap,
    slippage_param: &mut Option<String>,
) {
    match template.as_str() {
        Some(text) if text.contains("{min_out_computed}") => {
            *slippage_param = Some(param.to_string());
        }
        Some(text) if text.starts_with('{') && text.ends_with('}') => {
            let key = &text[1..text.len() - 1];
            if key != param {
                arg_map.insert(param.to_string(), key.to_string());
            }
        }
        _ => {
            defaults.insert(param.to_string(), template.clone());
        }
    }
}

// ── Canonical-shape re-validation ────────────────────────────────────────────

/// Structural check of the normalized descriptor. Failure means the loader
/// must not return the document (no silent coercion past this point).
pub fn validate_descriptor(descriptor: &ActionDescriptor) -> std::result::Result<(), String> {
    if descriptor.protocol.trim().is_empty() {
        return Err("descriptor protocol must be non-empty".to_string());
    }
    if descriptor.chain_id == 0 {
        return Err("descriptor chain_id must be greater than zero".to_string());
    }
    if descriptor.execution.method.trim().is_empty() {
        return Err("descriptor method must be non-empty".to_string());
    }
    let function = parse_signature(&descriptor.execution.signature)
        .map_err(|error| format!("descriptor signature invalid: {error}"))?;
    if function.name != descriptor.execution.method {
        return Err(format!(
            "descriptor method {} does not match signature function {}",
            descriptor.execution.method, function.name
        ));
    }
    match descriptor.execution.structure {
        ArgStructure::Object => {
            if !(function.inputs.len() == 1 && function.inputs[0].spec.is_tuple()) {
                return Err(
                    "object argument structure requires a single tuple parameter".to_string()
                );
            }
        }
        ArgStructure::Tuple => {}
    }
    if descriptor.execution.target.address.is_none() && descriptor.execution.target.role.is_none() {
        return Err("descriptor target needs an address or role".to_string());
    }
    if let Some(value) = descriptor.execution.value.as_deref() {
        crate::abi::parse_u256_from_decimal_or_hex(value, "declared value")?;
    }
    Ok(())
}
