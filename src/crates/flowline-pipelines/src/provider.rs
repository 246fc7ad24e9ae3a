//! Generative-text provider seam
//!
//! Stage functions call the provider as an opaque `(prompt) -> text`
//! function; nothing in the pipelines knows or cares which service is
//! behind it. Each call carries its own wall-clock deadline - a hung
//! provider fails the stage rather than wedging the thread, which stays
//! recoverable through the engine's retry and reaper paths.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Default wall-clock budget for one generation call
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// Errors from a generation call
#[derive(Error, Debug)]
pub enum GeneratorError {
    /// The call exceeded its wall-clock budget
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    /// The provider reported a failure
    #[error("provider error: {0}")]
    Provider(String),
}

/// Opaque text-generation collaborator
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce text for a prompt
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

/// Run one generation call under a deadline
pub async fn generate_with_deadline(
    generator: &dyn TextGenerator,
    prompt: &str,
    deadline: Duration,
) -> Result<String, GeneratorError> {
    tokio::time::timeout(deadline, generator.generate(prompt))
        .await
        .map_err(|_| GeneratorError::Timeout(deadline))?
}

/// Deterministic generator for tests and development
///
/// Echoes a truncated form of the prompt, so assertions can tie output
/// back to the exact prompt a stage built.
#[derive(Debug, Clone, Default)]
pub struct CannedGenerator;

impl CannedGenerator {
    /// Create a canned generator
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let excerpt: String = prompt.chars().take(80).collect();
        Ok(format!("Draft copy: {excerpt}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowGenerator;

    #[async_trait]
    impl TextGenerator for SlowGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_canned_generator_is_deterministic() {
        let generator = CannedGenerator::new();
        let a = generator.generate("write a headline").await.unwrap();
        let b = generator.generate("write a headline").await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("write a headline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_off_slow_provider() {
        let generator = SlowGenerator;
        let result =
            generate_with_deadline(&generator, "anything", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(GeneratorError::Timeout(_))));
    }
}
