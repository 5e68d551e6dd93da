use thiserror::Error;

/// Crate-wide failure taxonomy.
///
/// Structural and constraint errors (`SchemaInvalid`, `ConstraintViolation`,
/// `MissingArgument`, `UnresolvedAmount`) are raised before any
/// state-mutating network call, so a bad plan never leaves partial on-chain
/// effects. `ExecutionError` is the only variant produced after a broadcast;
/// it halts the remaining queued steps. Simulation failures are not part of
/// this taxonomy: they are recovered locally and reported through logs (see
/// `executor`).
#[derive(Error, Debug)]
pub enum Error {
    /// Registry has no contract entry for the protocol/role/chain triple,
    /// after every protocol-name variant was tried.
    #[error("no {protocol}.{role} for chain {chain_id}")]
    UnknownRole {
        protocol: String,
        role: String,
        chain_id: u64,
    },

    /// Registry has no token entry for the symbol/chain pair.
    #[error("no token {symbol} for chain {chain_id}")]
    UnknownToken { symbol: String, chain_id: u64 },

    /// The schema document is malformed, unrecognized, or failed
    /// re-validation after normalization.
    #[error("schema invalid for {schema_ref}: {reason}")]
    SchemaInvalid { schema_ref: String, reason: String },

    /// A declared business rule rejected the inputs.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The builder exhausted every lookup strategy for a function argument.
    #[error("missing argument {name} for {function}")]
    MissingArgument { name: String, function: String },

    /// A percent_of_balance amount reached the builder without being
    /// resolved against a balance first.
    #[error("unresolved percent_of_balance in {0}; resolve balances before building")]
    UnresolvedAmount(String),

    /// percent_of_balance was requested but no balance provider is wired.
    #[error("percent_of_balance for {0} requires a balance provider")]
    MissingBalanceProvider(String),

    /// The descriptor targets an execution environment this backend cannot
    /// encode for (e.g. a move-based chain).
    #[error("unsupported execution environment: {0}")]
    UnsupportedExecution(String),

    /// A value could not be coerced to its declared wire type.
    #[error("invalid {expected} for {name}: {value}")]
    InvalidArgument {
        name: String,
        expected: String,
        value: String,
    },

    /// Transport or protocol failure talking to the chain client.
    #[error("rpc failure: {0}")]
    Rpc(String),

    /// Broadcast or receipt failure; fatal for the remaining steps.
    #[error("execution failed: {0}")]
    ExecutionError(String),
}

impl Error {
    pub fn schema_invalid(schema_ref: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SchemaInvalid {
            schema_ref: schema_ref.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
