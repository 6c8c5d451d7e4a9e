//! LLM Client Adapter
//!
//! Uniform call surface for every pipeline stage. One call path handles
//! replay, retries with exponential backoff, debug capture, and request
//! counting, so the executor never talks to a provider directly.
//!
//! Call order per request:
//! 1. Replay mode: if a captured response exists for (stage, target), return
//!    it verbatim without touching the provider.
//! 2. Call the provider with the configured model parameters, retrying
//!    transient failures with exponential backoff. Empty responses count as
//!    transient.
//! 3. In debug mode, capture the prompt and response under the stage layout.

pub mod prompts;
pub mod provider;

pub use provider::{AnthropicProvider, LlmProvider, LlmRequest, LlmResponse};

use crate::config::{ErrorHandlingConfig, LlmConfig};
use crate::debug_capture::DebugHandler;
use crate::error::LlmError;
use crate::stage::PipelineStage;
use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stage-aware LLM client used by the executor
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    llm_config: LlmConfig,
    error_handling: ErrorHandlingConfig,
    debug: Arc<DebugHandler>,
    requests: AtomicUsize,
}

impl LlmClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        llm_config: LlmConfig,
        error_handling: ErrorHandlingConfig,
        debug: Arc<DebugHandler>,
    ) -> Self {
        Self {
            provider,
            llm_config,
            error_handling,
            debug,
            requests: AtomicUsize::new(0),
        }
    }

    /// Number of provider calls made this run (replayed responses excluded)
    pub fn requests_made(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Run one stage invocation for `target`.
    pub async fn call(
        &self,
        stage: PipelineStage,
        target: &Path,
        chunk_info: Option<&str>,
        prompt: &str,
    ) -> Result<String> {
        if self.debug.replay_enabled() {
            if let Some(response) = self.debug.replay_response(stage, target, chunk_info) {
                info!(
                    "Replaying {} response for {} (no LLM call)",
                    stage,
                    target.display()
                );
                return Ok(response);
            }
        }

        let response = self.call_with_retries(stage, target, prompt).await?;
        self.debug
            .capture(stage, target, chunk_info, prompt, &response);
        Ok(response)
    }

    async fn call_with_retries(
        &self,
        stage: PipelineStage,
        target: &Path,
        prompt: &str,
    ) -> Result<String> {
        let max_attempts = self.error_handling.max_retries.max(1);
        let mut last_error: Option<String> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = Duration::from_secs_f64(
                    self.error_handling.retry_delay_seconds * 2f64.powi(attempt as i32 - 1),
                );
                info!(
                    "Retrying {} for {} (attempt {}/{}) after {:?}",
                    stage,
                    target.display(),
                    attempt + 1,
                    max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let request = LlmRequest {
                model: self.llm_config.model_id.clone(),
                prompt: prompt.to_string(),
                temperature: self.llm_config.temperature,
                max_tokens: self.llm_config.max_tokens,
            };

            match self.provider.complete(&request).await {
                Ok(response) => {
                    self.requests.fetch_add(1, Ordering::SeqCst);
                    if response.content.trim().is_empty() {
                        // Content errors retry like transport errors.
                        warn!(
                            "Empty LLM response for {} ({}), attempt {}",
                            target.display(),
                            stage,
                            attempt + 1
                        );
                        last_error = Some("empty response".to_string());
                        continue;
                    }
                    debug!(
                        "{} completed for {} ({} tokens)",
                        stage,
                        target.display(),
                        response.total_tokens.unwrap_or(0)
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    warn!(
                        "LLM call failed for {} ({}), attempt {}: {e:#}",
                        target.display(),
                        stage,
                        attempt + 1
                    );
                    last_error = Some(format!("{e:#}"));
                }
            }
        }

        let message = last_error.unwrap_or_else(|| "unknown error".to_string());
        if message == "empty response" {
            Err(LlmError::EmptyResponse {
                attempts: max_attempts,
            }
            .into())
        } else {
            Err(LlmError::Transport {
                message,
                attempts: max_attempts,
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted provider: pops responses front-to-back, errors when empty.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<String, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().remove(0);
            match next {
                Ok(content) => Ok(LlmResponse {
                    content,
                    total_tokens: Some(10),
                }),
                Err(message) => anyhow::bail!(message),
            }
        }
    }

    fn client_with(provider: ScriptedProvider, debug: DebugHandler) -> LlmClient {
        let mut error_handling = ErrorHandlingConfig::default();
        error_handling.retry_delay_seconds = 0.0;
        LlmClient::new(
            Arc::new(provider),
            LlmConfig::default(),
            error_handling,
            Arc::new(debug),
        )
    }

    #[tokio::test]
    async fn test_successful_call_counts_one_request() {
        let client = client_with(
            ScriptedProvider::new(vec![Ok("analysis".to_string())]),
            DebugHandler::disabled(),
        );
        let out = client
            .call(PipelineStage::FileAnalysis, Path::new("/p/a.rs"), None, "prompt")
            .await
            .unwrap();
        assert_eq!(out, "analysis");
        assert_eq!(client.requests_made(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let client = client_with(
            ScriptedProvider::new(vec![
                Err("503".to_string()),
                Err("timeout".to_string()),
                Ok("recovered".to_string()),
            ]),
            DebugHandler::disabled(),
        );
        let out = client
            .call(PipelineStage::FileAnalysis, Path::new("/p/a.rs"), None, "prompt")
            .await
            .unwrap();
        assert_eq!(out, "recovered");
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_llm_error() {
        let client = client_with(
            ScriptedProvider::new(vec![
                Err("down".to_string()),
                Err("down".to_string()),
                Err("down".to_string()),
            ]),
            DebugHandler::disabled(),
        );
        let err = client
            .call(PipelineStage::FileAnalysis, Path::new("/p/a.rs"), None, "prompt")
            .await
            .unwrap_err();
        let llm_err = err.downcast_ref::<LlmError>().unwrap();
        assert!(matches!(llm_err, LlmError::Transport { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_empty_responses_retry_then_fail_as_content_error() {
        let client = client_with(
            ScriptedProvider::new(vec![
                Ok("".to_string()),
                Ok("  ".to_string()),
                Ok("\n".to_string()),
            ]),
            DebugHandler::disabled(),
        );
        let err = client
            .call(PipelineStage::FileAnalysis, Path::new("/p/a.rs"), None, "prompt")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LlmError>().unwrap(),
            LlmError::EmptyResponse { attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn test_replay_short_circuits_provider() {
        let tmp = TempDir::new().unwrap();
        let capture = DebugHandler::new(true, false, Some(tmp.path())).unwrap();
        capture.capture(
            PipelineStage::FileAnalysis,
            Path::new("/p/a.rs"),
            None,
            "p",
            "captured analysis",
        );

        let provider = ScriptedProvider::new(vec![]);
        let replay = DebugHandler::new(false, true, Some(tmp.path())).unwrap();
        let client = client_with(provider, replay);

        let out = client
            .call(PipelineStage::FileAnalysis, Path::new("/p/a.rs"), None, "prompt")
            .await
            .unwrap();
        assert_eq!(out, "captured analysis");
        assert_eq!(client.requests_made(), 0);
    }

    #[tokio::test]
    async fn test_debug_mode_captures_interaction() {
        let tmp = TempDir::new().unwrap();
        let debug = DebugHandler::new(true, false, Some(tmp.path())).unwrap();
        let client = client_with(
            ScriptedProvider::new(vec![Ok("fresh".to_string())]),
            debug,
        );

        client
            .call(PipelineStage::GlobalSummary, Path::new("/p"), None, "prompt text")
            .await
            .unwrap();

        let captured = tmp
            .path()
            .join("llm_debug/stage_5_global_summary/p_response.txt");
        assert_eq!(std::fs::read_to_string(captured).unwrap(), "fresh");
    }
}
