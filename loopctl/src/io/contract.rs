//! Signal contract schemas: embedded defaults with deployed overrides.

use std::fs;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::signal::SignalValidator;
use crate::core::types::{ContractSignal, SignalKind};
use crate::io::paths::ControllerPaths;

const BUILD_SCHEMA: &str = include_str!("../../schemas/build.schema.json");
const IMPROVE_SCHEMA: &str = include_str!("../../schemas/improve.schema.json");

/// Schema text shipped with the binary.
pub fn embedded_schema(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Build => BUILD_SCHEMA,
        SignalKind::Improve => IMPROVE_SCHEMA,
    }
}

/// Schema text handed to the worker plus the validator compiled from it.
pub struct Contract<S> {
    pub schema_text: String,
    pub validator: SignalValidator<S>,
}

/// Load the contract for the variant `S`. A deployed schema under
/// `.loopctl/schemas/` takes precedence over the embedded one.
pub fn load_contract<S: ContractSignal>(paths: &ControllerPaths) -> Result<Contract<S>> {
    let kind = S::KIND;
    let path = paths.schema_path(kind);
    let schema_text = if path.exists() {
        info!(kind = %kind, path = %path.display(), "using deployed schema");
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?
    } else {
        debug!(kind = %kind, "using embedded schema");
        embedded_schema(kind).to_string()
    };
    let validator = SignalValidator::new(&schema_text)
        .with_context(|| format!("load {kind} contract"))?;
    Ok(Contract {
        schema_text,
        validator,
    })
}
