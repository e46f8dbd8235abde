//! Built-in handler implementations.
//!
//! These cover the whole chain with lightweight local stages so a pipeline
//! can run (and be tested) without any model weights: real ASR/LLM/TTS/avatar
//! implementations register their own factories via
//! [`Manifest::register`](crate::registry::Manifest::register) and plug in by
//! locator, exactly like the built-ins.

pub mod asr;
pub mod avatar;
pub mod llm;
pub mod openai;
pub mod transport;
pub mod tts;
pub mod vad;

use crate::registry::{FactoryContext, Manifest};

/// Register every built-in factory under the `builtin/` namespace.
pub fn register_builtins(manifest: &mut Manifest) {
    manifest.register("builtin/transport/loopback", transport::factory);
    manifest.register("builtin/vad/energy", vad::factory);
    manifest.register("builtin/asr/echo", asr::factory);
    manifest.register("builtin/llm/echo", llm::factory);
    manifest.register("builtin/llm/openai_chat", openai::factory);
    manifest.register("builtin/tts/silence", tts::factory);
    manifest.register("builtin/avatar/still", avatar::factory);
}

/// Read an optional float parameter.
pub(crate) fn param_f32(
    ctx: &FactoryContext<'_>,
    key: &str,
    default: f32,
) -> crate::error::Result<f32> {
    match ctx.params.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(v)) => Ok(*v as f32),
        Some(toml::Value::Integer(v)) => Ok(*v as f32),
        Some(other) => Err(ctx.invalid(format!("{key} must be a number, got {other}"))),
    }
}

/// Read an optional non-negative integer parameter.
pub(crate) fn param_u64(
    ctx: &FactoryContext<'_>,
    key: &str,
    default: u64,
) -> crate::error::Result<u64> {
    match ctx.params.get(key) {
        None => Ok(default),
        Some(toml::Value::Integer(v)) if *v >= 0 => Ok(*v as u64),
        Some(other) => Err(ctx.invalid(format!("{key} must be a non-negative integer, got {other}"))),
    }
}

/// Read an optional string parameter.
pub(crate) fn param_str(
    ctx: &FactoryContext<'_>,
    key: &str,
    default: &str,
) -> crate::error::Result<String> {
    match ctx.params.get(key) {
        None => Ok(default.to_owned()),
        Some(toml::Value::String(v)) => Ok(v.clone()),
        Some(other) => Err(ctx.invalid(format!("{key} must be a string, got {other}"))),
    }
}

/// Read a required string parameter.
pub(crate) fn param_str_required(
    ctx: &FactoryContext<'_>,
    key: &str,
) -> crate::error::Result<String> {
    match ctx.params.get(key) {
        Some(toml::Value::String(v)) if !v.trim().is_empty() => Ok(v.clone()),
        Some(toml::Value::String(_)) => Err(ctx.invalid(format!("{key} must not be empty"))),
        Some(other) => Err(ctx.invalid(format!("{key} must be a string, got {other}"))),
        None => Err(ctx.invalid(format!("missing required parameter {key}"))),
    }
}
