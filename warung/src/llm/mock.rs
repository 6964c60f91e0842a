//! Scripted LLM for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::tools::ToolSpec;

use super::{ChatMessage, LlmClient, LlmResponse};

type ResponseScript = Mutex<Vec<Result<LlmResponse, LlmError>>>;

/// Returns pre-scripted responses in order; repeats the last one when the
/// script runs out. Errors can be scripted too, which is how the resilience
/// tests drive timeouts and connection failures through the real sandwich.
pub struct MockLlm {
    script: ResponseScript,
    last: Mutex<Option<LlmResponse>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlm {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(script: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Messages of every recorded invocation, for assertions.
    pub fn recorded_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().expect("mock lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock lock").len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError> {
        self.calls
            .lock()
            .expect("mock lock")
            .push(messages.to_vec());

        let mut script = self.script.lock().expect("mock lock");
        if script.is_empty() {
            if let Some(last) = self.last.lock().expect("mock lock").clone() {
                return Ok(last);
            }
            return Ok(LlmResponse::default());
        }
        let next = script.remove(0);
        if let Ok(ref response) = next {
            *self.last.lock().expect("mock lock") = Some(response.clone());
        }
        next
    }
}
