/// txforge compiles protocol-agnostic DeFi intents into fully-encoded,
/// simulation-checked EVM transactions.
///
/// The pipeline is a chain of focused modules:
///
/// 1. [`planner`]     — expand an intent (flat action list, structured IR
///    plan, or a heuristic text prompt) into ordered [`PlanStep`]s; loops
///    unroll eagerly, `percent_of_balance` amounts are flagged for later
///    resolution.
/// 2. [`approvals`]   — insert deduplicated maximal-allowance ERC-20
///    approval steps before any step that debits a token.
/// 3. [`amount`]      — resolve unit-tagged amounts to exact base units,
///    consulting the balance oracle for percent-of-balance specs.
/// 4. [`schema`]      — load one schema document per step (three accepted
///    shapes) and normalize it into a canonical [`ActionDescriptor`].
/// 5. [`constraints`] — enforce declared business rules before anything can
///    mutate chain state.
/// 6. [`builder`]     — resolve the target contract, map inputs onto ABI
///    parameters, coerce to wire types, and emit a [`ResolvedTransaction`].
/// 7. [`executor`]    — optionally dry-run each transaction, recompute
///    slippage-bounded minimums, then broadcast sequentially and await
///    receipts.
///
/// Everything the pipeline needs arrives through [`PipelineCtx`]: registry,
/// schema store, balance oracle, chain client, chain id, caller. There is no
/// ambient or global mutable state.
pub mod abi;
pub mod amount;
pub mod approvals;
pub mod builder;
pub mod chain;
pub mod constraints;
pub mod domain;
pub mod error;
pub mod executor;
pub mod planner;
pub mod registry;
pub mod schema;
pub mod test_support;

pub use crate::domain::types::{
    Action, ActionDescriptor, Amount, BuiltStep, Intent, IrNode, IrPlan, PlanStep,
    ResolvedTransaction, SchemaRef, StepOutcome, StepStatus, TokenInfo,
};
pub use crate::error::{Error, Result};

use crate::builder::BuildCtx;
use crate::chain::{BalanceProvider, ChainClient};
use crate::executor::ExecutionDriver;
use crate::registry::AddressRegistry;
use crate::schema::{SchemaLoader, SchemaStore};
use alloy_primitives::Address;
use std::sync::Arc;

/// Explicit configuration threaded through every entry point.
pub struct PipelineCtx<'a> {
    pub registry: &'a dyn AddressRegistry,
    pub schemas: &'a dyn SchemaStore,
    pub balances: Option<&'a dyn BalanceProvider>,
    pub chain: Option<&'a dyn ChainClient>,
    pub chain_id: u64,
    pub caller: Option<Address>,
    pub auto_insert_approvals: bool,
    pub simulate_only: bool,
}

impl<'a> PipelineCtx<'a> {
    pub fn new(registry: &'a dyn AddressRegistry, schemas: &'a dyn SchemaStore) -> Self {
        PipelineCtx {
            registry,
            schemas,
            balances: None,
            chain: None,
            chain_id: 1,
            caller: None,
            auto_insert_approvals: false,
            simulate_only: false,
        }
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_caller(mut self, caller: Address) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn with_balances(mut self, balances: &'a dyn BalanceProvider) -> Self {
        self.balances = Some(balances);
        self
    }

    pub fn with_chain(mut self, chain: &'a dyn ChainClient) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_auto_approvals(mut self) -> Self {
        self.auto_insert_approvals = true;
        self
    }

    pub fn simulate_only(mut self) -> Self {
        self.simulate_only = true;
        self
    }
}

/// Accepted compilation inputs.
pub enum IntentInput {
    /// Free-text prompt, parsed heuristically (structured intents preferred).
    Prompt(String),
    Intent(Intent),
    Actions(Vec<Action>),
    Plan(IrPlan),
    /// Pre-planned steps, passed through planning untouched.
    Steps(Vec<PlanStep>),
}

impl From<Intent> for IntentInput {
    fn from(intent: Intent) -> Self {
        IntentInput::Intent(intent)
    }
}

impl From<Vec<Action>> for IntentInput {
    fn from(actions: Vec<Action>) -> Self {
        IntentInput::Actions(actions)
    }
}

impl From<IrPlan> for IntentInput {
    fn from(plan: IrPlan) -> Self {
        IntentInput::Plan(plan)
    }
}

impl From<Vec<PlanStep>> for IntentInput {
    fn from(steps: Vec<PlanStep>) -> Self {
        IntentInput::Steps(steps)
    }
}

impl From<&str> for IntentInput {
    fn from(prompt: &str) -> Self {
        IntentInput::Prompt(prompt.to_string())
    }
}

fn plan_input(input: IntentInput, ctx: &PipelineCtx<'_>) -> Result<Vec<PlanStep>> {
    match input {
        IntentInput::Prompt(prompt) => planner::plan_from_prompt(&prompt, ctx.chain_id),
        IntentInput::Intent(intent) => Ok(planner::plan_intent(&intent)),
        IntentInput::Actions(actions) => Ok(planner::plan_actions(&actions)),
        IntentInput::Plan(plan) => Ok(planner::plan_ir(&plan)),
        IntentInput::Steps(steps) => Ok(steps),
    }
}

/// Compile-only entry point: `Intent → PlanStep[]`. The only lookups are
/// registry reads for approval resolution; nothing touches the chain.
pub fn compile(input: impl Into<IntentInput>, ctx: &PipelineCtx<'_>) -> Result<Vec<PlanStep>> {
    let steps = plan_input(input.into(), ctx)?;
    if !ctx.auto_insert_approvals {
        return Ok(steps);
    }
    let loader = SchemaLoader::new(ctx.schemas, ctx.registry, ctx.chain_id);
    approvals::expand_with_approvals(steps, &loader, ctx.registry, ctx.chain_id)
}

/// Compile and build: adds amount resolution, descriptor loading, constraint
/// enforcement, and transaction assembly. No broadcasts.
pub async fn compile_and_build(
    input: impl Into<IntentInput>,
    ctx: &PipelineCtx<'_>,
) -> Result<Vec<BuiltStep>> {
    let (steps, _loader) = compile_and_load(input, ctx).await?;
    let build_ctx = build_ctx(ctx);

    let mut out = Vec::with_capacity(steps.len());
    for (step, descriptor) in steps {
        let tx = builder::build(&step, &descriptor, &build_ctx)?;
        out.push(BuiltStep { step, tx });
    }
    Ok(out)
}

/// Full pipeline: compile, build, simulate, then execute sequentially. With
/// `simulate_only` set, returns simulated transactions without broadcasting.
/// Execution failures are recorded on the failing step's outcome and halt
/// the remaining steps; confirmed prior steps are never rolled back.
pub async fn compile_and_execute(
    input: impl Into<IntentInput>,
    ctx: &PipelineCtx<'_>,
) -> Result<Vec<StepOutcome>> {
    let chain = ctx
        .chain
        .ok_or_else(|| Error::Rpc("chain client required for execution".to_string()))?;
    let (steps, _loader) = compile_and_load(input, ctx).await?;
    let build_ctx = build_ctx(ctx);
    let driver = ExecutionDriver::new(chain, ctx.simulate_only);
    driver.run(&steps, &build_ctx).await
}

/// Shared front half of the build/execute entry points: plan, insert
/// approvals, resolve pending amounts, load descriptors, and enforce
/// declared constraints, all strictly before any state-mutating call.
async fn compile_and_load<'a>(
    input: impl Into<IntentInput>,
    ctx: &PipelineCtx<'a>,
) -> Result<(Vec<(PlanStep, Arc<ActionDescriptor>)>, SchemaLoader<'a>)> {
    let loader = SchemaLoader::new(ctx.schemas, ctx.registry, ctx.chain_id);

    let mut steps = plan_input(input.into(), ctx)?;
    if ctx.auto_insert_approvals {
        steps = approvals::expand_with_approvals(steps, &loader, ctx.registry, ctx.chain_id)?;
    }

    amount::resolve_pending_amounts(&mut steps, ctx.registry, ctx.balances, ctx.chain_id).await?;

    let caller_hex = ctx.caller.map(|caller| format!("{caller:#x}"));
    let mut out = Vec::with_capacity(steps.len());
    for step in steps {
        let descriptor = loader.load(&step.schema_ref, Some(&step.inputs))?;
        constraints::enforce(&descriptor, &step.inputs, caller_hex.as_deref())?;
        out.push((step, descriptor));
    }
    Ok((out, loader))
}

fn build_ctx<'a>(ctx: &PipelineCtx<'a>) -> BuildCtx<'a> {
    BuildCtx {
        registry: ctx.registry,
        chain_id: ctx.chain_id,
        caller: ctx.caller,
    }
}
