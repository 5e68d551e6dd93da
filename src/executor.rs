/// Simulation and execution driver.
///
/// Each built step advances through an explicit state machine:
///
/// ```text
/// Built → Simulated            → Sent → Confirmed
/// Built → SimulationSkipped    → Sent → Confirmed
///      └─────────── Failed (typed, halts the remaining steps)
/// ```
///
/// Simulation is a read-only call of the resolved transaction. When the
/// descriptor marks a slippage-computed parameter, the decoded expected
/// output feeds `min_out = expected * (10000 - slippage_bps) / 10000` and
/// the transaction is rebuilt with that bound filled in (resolved
/// transactions are immutable, so a new one is produced rather than patching
/// the old). A failed simulation is NOT fatal: it is logged and the step
/// proceeds with an unconstrained minimum, which is a documented risk, not a
/// hidden one.
///
/// Steps run strictly sequentially: later steps depend on allowances and
/// balances created by earlier ones, and nonce order for a single signing
/// key must hold. A broadcast or receipt failure halts the remaining queue;
/// already-confirmed steps are not rolled back (on-chain effects are
/// irreversible) and the core never auto-retries.
use crate::builder::{build, build_with_override, BuildCtx};
use crate::chain::ChainClient;
use crate::domain::types::{ActionDescriptor, PlanStep, StepOutcome, StepStatus};
use crate::error::Result;
use alloy_primitives::U256;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_SLIPPAGE_BPS: u64 = 50;
const BPS_DENOMINATOR: u64 = 10_000;

pub struct ExecutionDriver<'a> {
    chain: &'a dyn ChainClient,
    simulate_only: bool,
}

impl<'a> ExecutionDriver<'a> {
    pub fn new(chain: &'a dyn ChainClient, simulate_only: bool) -> Self {
        ExecutionDriver {
            chain,
            simulate_only,
        }
    }

    /// Drive every step through simulate/send/confirm. Structural failures
    /// (a step that cannot even build) abort the whole run with `Err`;
    /// execution failures after broadcast are recorded as a `Failed` outcome
    /// and halt the remaining steps.
    pub async fn run(
        &self,
        steps: &[(PlanStep, Arc<ActionDescriptor>)],
        build_ctx: &BuildCtx<'_>,
    ) -> Result<Vec<StepOutcome>> {
        let mut outcomes = Vec::with_capacity(steps.len());

        for (step, descriptor) in steps {
            let mut tx = build(step, descriptor, build_ctx)?;

            let (status, simulated_output) = match self.simulate(descriptor, &tx).await {
                Ok(output) => (StepStatus::Simulated, output),
                Err(reason) => {
                    // Recoverable: continue with an unconstrained minimum and
                    // surface the failure through diagnostics only.
                    warn!(step = %step.schema_ref, %reason, "simulation failed; proceeding");
                    (StepStatus::SimulationSkipped, None)
                }
            };

            if let Some(slippage_param) = descriptor.execution.slippage_param.as_deref() {
                let expected = simulated_output.unwrap_or(U256::ZERO);
                let slippage_bps = slippage_bps_from(&step.inputs);
                let min_out = expected
                    .saturating_mul(U256::from(BPS_DENOMINATOR - slippage_bps))
                    / U256::from(BPS_DENOMINATOR);
                tx = build_with_override(
                    step,
                    descriptor,
                    build_ctx,
                    slippage_param,
                    json!(min_out.to_string()),
                )?;
            }

            if self.simulate_only {
                outcomes.push(StepOutcome {
                    step: step.clone(),
                    tx,
                    status,
                    simulated_output,
                });
                continue;
            }

            match self.send_and_confirm(&tx).await {
                Ok(confirmed) => {
                    info!(
                        step = %step.schema_ref,
                        tx_hash = %confirmed_hash(&confirmed),
                        "step confirmed"
                    );
                    outcomes.push(StepOutcome {
                        step: step.clone(),
                        tx,
                        status: confirmed,
                        simulated_output,
                    });
                }
                Err(error) => {
                    let message = error.to_string();
                    warn!(step = %step.schema_ref, error = %message, "step failed; halting run");
                    outcomes.push(StepOutcome {
                        step: step.clone(),
                        tx,
                        status: StepStatus::Failed { error: message },
                        simulated_output,
                    });
                    break;
                }
            }
        }

        Ok(outcomes)
    }

    /// Read-only dry run; a decodable first output becomes the expected
    /// output amount. Errors here are recovered by the caller.
    async fn simulate(
        &self,
        descriptor: &ActionDescriptor,
        tx: &crate::domain::types::ResolvedTransaction,
    ) -> std::result::Result<Option<U256>, String> {
        let raw = self
            .chain
            .call(tx.to, &tx.data)
            .await
            .map_err(|error| error.to_string())?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "0x" {
            return Ok(None);
        }
        let bytes = hex::decode(trimmed.trim_start_matches("0x"))
            .map_err(|error| format!("simulation returned invalid hex: {error}"))?;
        let function = crate::abi::parse_signature(&descriptor.execution.signature)?;
        function.decode_first_output_uint(&bytes)
    }

    async fn send_and_confirm(
        &self,
        tx: &crate::domain::types::ResolvedTransaction,
    ) -> Result<StepStatus> {
        let tx_hash = self.chain.send_transaction(tx).await?;
        let receipt = self.chain.wait_for_receipt(&tx_hash).await?;
        if !receipt.success {
            return Err(crate::error::Error::ExecutionError(format!(
                "transaction {tx_hash} reverted"
            )));
        }
        Ok(StepStatus::Confirmed { tx_hash })
    }
}

fn slippage_bps_from(inputs: &crate::domain::types::InputMap) -> u64 {
    let declared = inputs.get("slippage_bps").and_then(|value| match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    });
    declared.unwrap_or(DEFAULT_SLIPPAGE_BPS).min(BPS_DENOMINATOR)
}

fn confirmed_hash(status: &StepStatus) -> String {
    match status {
        StepStatus::Sent { tx_hash } | StepStatus::Confirmed { tx_hash } => tx_hash.clone(),
        _ => String::new(),
    }
}
