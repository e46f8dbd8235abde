//! Pipeline graph construction and whole-chain type validation.
//!
//! The configuration admits only linear chains. Validation is pure and
//! repeatable: it reads handler descriptors from the registry, checks every
//! adjacent input/output kind pair once at startup, and never runs again
//! per-session.

use crate::error::{EngineError, Result};
use crate::frames::{kinds_to_string, FrameKind};
use crate::handler::Capability;
use crate::registry::Registry;

/// One validated stage of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Handler name (registry key).
    pub name: String,
    /// Capability tag of the resolved handler.
    pub capability: Capability,
    /// Input kinds the handler declared.
    pub inputs: Vec<FrameKind>,
    /// Output kind the handler declared.
    pub output: FrameKind,
}

/// A validated, ordered chain of handler stages. Read-only after
/// construction; shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineGraph {
    stages: Vec<Stage>,
}

impl PipelineGraph {
    /// Build and validate a graph from an ordered list of handler names.
    ///
    /// # Errors
    ///
    /// - [`EngineError::EmptyChain`] when `chain` is empty.
    /// - [`EngineError::HandlerNotFound`] when a name is not registered (or
    ///   its spec is disabled).
    /// - [`EngineError::TypeMismatch`] naming the first adjacent stage pair
    ///   whose kinds disagree.
    pub fn build(registry: &Registry, chain: &[String]) -> Result<Self> {
        if chain.is_empty() {
            return Err(EngineError::EmptyChain);
        }

        let mut stages = Vec::with_capacity(chain.len());
        for name in chain {
            let registered = registry
                .get(name)
                .ok_or_else(|| EngineError::HandlerNotFound(name.clone()))?;
            let descriptor = registered.handler().descriptor();
            stages.push(Stage {
                name: name.clone(),
                capability: descriptor.capability,
                inputs: descriptor.inputs.to_vec(),
                output: descriptor.output,
            });
        }

        for pair in stages.windows(2) {
            let (from, to) = (&pair[0], &pair[1]);
            if !to.inputs.contains(&from.output) {
                return Err(EngineError::TypeMismatch {
                    from: from.name.clone(),
                    to: to.name.clone(),
                    produced: from.output,
                    expected: kinds_to_string(&to.inputs),
                });
            }
        }

        Ok(Self { stages })
    }

    /// The validated stages in chain order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain is empty (never true for a built graph).
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Handler names in chain order, deduplicated, preserving first
    /// occurrence. A session holds one lease per distinct handler, so a
    /// transport stage appearing at both ends draws a single lease.
    pub fn distinct_handlers(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for stage in &self.stages {
            if !seen.contains(&stage.name.as_str()) {
                seen.push(stage.name.as_str());
            }
        }
        seen
    }
}
