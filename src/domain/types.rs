/// Shared data model for the compilation pipeline.
///
/// Ownership follows the pipeline direction: [`Action`]/[`Intent`]/[`IrPlan`]
/// are caller-supplied input, [`PlanStep`]s are created by the planner and
/// consumed by the builder, [`ActionDescriptor`]s are produced by the schema
/// loader and cached per schema reference for one compilation run, and
/// [`ResolvedTransaction`] is the terminal artifact handed to the execution
/// driver. A resolved transaction is never mutated after construction; when
/// an upstream value changes (e.g. a slippage-bounded minimum recomputed
/// after simulation) the builder produces a fresh one.
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form input map carried through the pipeline. `serde_json::Map`
/// preserves insertion order, which keeps positional argument fallbacks
/// deterministic.
pub type InputMap = Map<String, Value>;

// ── Caller-facing intent types ───────────────────────────────────────────────

/// One protocol + operation + parameters triple. Immutable once constructed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub protocol: String,
    pub action: String,
    #[serde(default)]
    pub params: InputMap,
    #[serde(rename = "chainId", default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Unit-tagged amount specification. Every kind except `percent_of_balance`
/// is statically resolvable to an integer base-unit quantity; a percent
/// amount stays unresolved until a balance is known.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Amount {
    Wei {
        value: Value,
    },
    Ether {
        value: Value,
    },
    Units {
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decimals: Option<u32>,
    },
    PercentOfBalance {
        value: Value,
    },
}

impl Amount {
    /// Best-effort reading of a JSON value as an [`Amount`]; `None` when the
    /// value does not carry a `kind` tag.
    pub fn from_value(value: &Value) -> Option<Amount> {
        if value.get("kind").is_none() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_percent_of_balance(&self) -> bool {
        matches!(self, Amount::PercentOfBalance { .. })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IntentMeta {
    #[serde(rename = "chainId", default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Top-level compilation unit: one or more actions plus global metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Intent {
    pub actions: Vec<Action>,
    #[serde(default)]
    pub meta: IntentMeta,
}

// ── Structured-plan IR ───────────────────────────────────────────────────────

/// Declarative loop guard. The base planner treats this as metadata and only
/// honors `max_loops` as an iteration cap; it does NOT evaluate health-factor
/// or LTV conditions against live state. Callers relying on "loop until the
/// condition holds" semantics must check the condition themselves between
/// runs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoopGuard {
    #[serde(
        rename = "targetLtvBps",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_ltv_bps: Option<u32>,
    #[serde(
        rename = "minHealthFactor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_health_factor: Option<f64>,
    #[serde(rename = "maxLoops", default, skip_serializing_if = "Option::is_none")]
    pub max_loops: Option<u32>,
}

/// Control-flow aware IR node. Loops are unrolled eagerly at planning time;
/// evaluation always terminates because a guard-only loop is capped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IrNode {
    Action {
        action: Action,
    },
    Seq {
        steps: Vec<IrNode>,
    },
    Loop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        times: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<LoopGuard>,
        steps: Vec<IrNode>,
    },
}

/// A structured plan: ordered IR nodes plus intent-level metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IrPlan {
    pub plan: Vec<IrNode>,
    #[serde(default)]
    pub meta: IntentMeta,
}

// ── Planned steps ────────────────────────────────────────────────────────────

/// Reference to one action schema document under the
/// `<protocol>/actions/<action>.json` convention.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaRef {
    pub protocol: String,
    pub action: String,
}

impl SchemaRef {
    pub fn new(protocol: impl Into<String>, action: impl Into<String>) -> Self {
        SchemaRef {
            protocol: protocol.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/actions/{}.json", self.protocol, self.action)
    }
}

/// A `percent_of_balance` input recorded by the planner for later resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingPercent {
    pub key: String,
    pub spec: Amount,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StepMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub percent_of_balance: Vec<PendingPercent>,
}

impl StepMeta {
    pub fn is_empty(&self) -> bool {
        self.percent_of_balance.is_empty()
    }
}

/// One action bound to a schema document; the unit the rest of the pipeline
/// operates on. One step becomes exactly one transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanStep {
    pub schema_ref: SchemaRef,
    pub inputs: InputMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<StepMeta>,
}

// ── Canonical action descriptor ──────────────────────────────────────────────

/// Declared shape of one input.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputSpec {
    /// 'uint' | 'address' | 'token' | 'bps' | 'enum' | 'bool' | 'bytes' | 'string'
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Whitelisted token entry inside declared constraints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenRef {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NumericRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Declared business constraints, enforced before any state-mutating call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_whitelist: Option<Vec<TokenRef>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub numeric_ranges: BTreeMap<String, NumericRange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allowed_addresses: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_callers: Option<Vec<String>>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.token_whitelist.is_none()
            && self.numeric_ranges.is_empty()
            && self.allowed_addresses.is_empty()
            && self.allowed_callers.is_none()
    }
}

/// Declared token debit: which input carries an amount that will be pulled
/// from the caller, and how to find the token it is denominated in.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DebitHint {
    #[serde(rename = "amountKey", default, skip_serializing_if = "Option::is_none")]
    pub amount_key: Option<String>,
    #[serde(rename = "tokenParam", default, skip_serializing_if = "Option::is_none")]
    pub token_param: Option<String>,
    #[serde(rename = "tokenRole", default, skip_serializing_if = "Option::is_none")]
    pub token_role: Option<String>,
}

/// Argument-passing convention inferred from the function signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgStructure {
    /// The function takes exactly one tuple/struct parameter; inputs are
    /// passed as a single named-field object.
    Object,
    /// Ordered positional arguments.
    Tuple,
}

/// How the target contract is found at build time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Explicit address declared by the schema document; used verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Role name to resolve through the registry when no address is declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Execution descriptor for the EVM backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionSpec {
    pub target: TargetSpec,
    pub method: String,
    pub structure: ArgStructure,
    /// Raw function signature, e.g.
    /// `supply(address asset, uint256 amount, address onBehalfOf, uint16 referralCode)`.
    pub signature: String,
    /// Ordered input keys used when the signature lacks parameter names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arg_order: Vec<String>,
    /// Declared native value (decimal or 0x-hex string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "gasLimit", default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    /// Parameter recomputed from the simulated output minus the slippage
    /// tolerance; encoded as zero on the first build.
    #[serde(
        rename = "slippageParam",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub slippage_param: Option<String>,
}

/// Canonical, fully-normalized description of one action. All downstream
/// code depends only on this type regardless of which document shape it was
/// loaded from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub protocol: String,
    pub version: String,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default, skip_serializing_if = "InputMap::is_empty")]
    pub defaults: InputMap,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debits: Vec<DebitHint>,
    #[serde(
        rename = "spenderRole",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spender_role: Option<String>,
    /// Schema-declared parameter-name → input-key overrides.
    #[serde(rename = "argMap", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arg_map: BTreeMap<String, String>,
    pub execution: ExecutionSpec,
}

// ── Terminal artifacts ───────────────────────────────────────────────────────

/// Token address + decimals as resolved by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
}

/// Fully-encoded transaction ready to broadcast. Immutable; rebuilt from
/// scratch whenever an upstream value changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolvedTransaction {
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub to: Address,
    /// 0x-prefixed calldata: 4-byte selector followed by ABI-encoded args.
    pub data: String,
    pub value: U256,
    #[serde(rename = "functionSignature")]
    pub function_signature: String,
    /// Coerced arguments, in call order, for diagnostics and decoding tests.
    pub args: Vec<Value>,
}

/// Per-step progress through the execution driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepStatus {
    Built,
    Simulated,
    SimulationSkipped,
    Sent { tx_hash: String },
    Confirmed { tx_hash: String },
    Failed { error: String },
}

/// Terminal record for one executed (or attempted) step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: PlanStep,
    pub tx: ResolvedTransaction,
    pub status: StepStatus,
    /// First decoded output from a successful simulation, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated_output: Option<U256>,
}

/// A plan step paired with its built transaction (compile-and-build output).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuiltStep {
    pub step: PlanStep,
    pub tx: ResolvedTransaction,
}
