//! The boundary to the external compiler executor.

use crate::artifacts::{CompilerInput, CompilerOutput};
use async_trait::async_trait;
use semver::Version;
use std::fmt;

/// Opaque failure reported by a [`CompilerGateway`] implementation.
///
/// Session code never lets this cross its own boundary; any gateway failure
/// is translated into [`CompilationError::Compiler`](crate::CompilationError).
#[derive(Debug)]
pub struct GatewayError(String);

impl GatewayError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for GatewayError {}

/// Executes a compilation for a given compiler version and standard-JSON
/// input. Implementations may shell out to a native binary, run a wasm
/// build (`force_emscripten`) or call a remote compilation service; the
/// session layer does not care.
#[async_trait]
pub trait CompilerGateway: Send + Sync {
    async fn compile(
        &self,
        version: &Version,
        input: &CompilerInput,
        force_emscripten: bool,
    ) -> Result<CompilerOutput, GatewayError>;
}
