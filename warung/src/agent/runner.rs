//! Graph execution: moderation → router → agent node (+ tool loop) → END,
//! with the resilience sandwich around every LLM call and graph-level
//! backoff around the whole run.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::domain::ConversationState;
use crate::error::{LlmError, ToolError};
use crate::llm::{build_client, ChatMessage, LlmClient, LlmConfig, LlmResponse};
use crate::resilience::{
    retry_with_backoff, with_timeout, BackoffConfig, CircuitBreakerConfig, CircuitRegistry,
};
use crate::tools::{tools_for_state, ToolCallContext, ToolRegistry, ToolSpec};
use crate::validate::{is_retryable_failure, validate_response, DEFAULT_MIN_LENGTH};

use super::nodes;
use super::state::{AgentState, AgentType, ModerationVerdict};

/// Hard-coded last-resort reply; the pipeline always produces some output.
pub const APOLOGY: &str = "I apologize, but I'm currently experiencing technical difficulties. \
                           Please try again in a moment or contact support if the issue persists.";

/// Distinct reply when the provider circuit is open.
pub const TEMPORARILY_UNAVAILABLE: &str =
    "Our assistant is temporarily unavailable right now. Please try again in a few minutes.";

/// Templated refusal for moderation violations.
const REFUSAL: &str = "I apologize, but I'm unable to process this request as it may violate \
                       content policies. Please rephrase your question and try again.";

/// Tool rounds per invocation before the loop exits with the last content.
const TOOL_ROUND_CAP: u32 = 8;

/// One agent invocation's inputs, assembled by the orchestrator.
#[derive(Clone, Debug)]
pub struct AgentRequest {
    pub llm_config: LlmConfig,
    pub system_prompt: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub conversation_id: String,
    pub customer_context: Value,
    pub conversation_state: ConversationState,
    pub context: Map<String, Value>,
    /// Conversation history including the newest user message, oldest first.
    pub history: Vec<ChatMessage>,
    /// Moderation can be skipped for replays that were already screened.
    pub moderate: bool,
}

/// What the orchestrator gets back; always present, never an error.
#[derive(Clone, Debug)]
pub struct AgentOutcome {
    pub text: String,
    pub tokens_used: u32,
    pub agent_type: AgentType,
    pub intent: String,
    /// Suggested next conversation state; applied upstream only when legal.
    pub conversation_state: Option<ConversationState>,
    pub tools_used: Vec<String>,
    pub needs_clarification: bool,
}

pub struct AgentRunner {
    registry: Arc<ToolRegistry>,
    circuits: Arc<CircuitRegistry>,
    circuit_config: CircuitBreakerConfig,
    backoff: BackoffConfig,
    max_retries: u32,
    llm_override: Option<Arc<dyn LlmClient>>,
}

impl AgentRunner {
    pub fn new(
        registry: Arc<ToolRegistry>,
        circuits: Arc<CircuitRegistry>,
        circuit_config: CircuitBreakerConfig,
        backoff: BackoffConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            registry,
            circuits,
            circuit_config,
            backoff,
            max_retries,
            llm_override: None,
        }
    }

    /// Use a fixed client instead of building one from the config; tests
    /// drive the whole runtime through `MockLlm` this way.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm_override = Some(llm);
        self
    }

    fn client_for(&self, config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        match &self.llm_override {
            Some(llm) => Ok(llm.clone()),
            None => build_client(config),
        }
    }

    /// Run the graph for one user turn. Never errors: resilience failures
    /// degrade to the apology or the unavailable text.
    pub async fn run(&self, request: AgentRequest) -> AgentOutcome {
        let llm = match self.client_for(&request.llm_config) {
            Ok(llm) => llm,
            Err(e) => {
                error!(error = %e, config = %request.llm_config.name, "llm client build failed");
                return Self::degraded_outcome(APOLOGY);
            }
        };

        let result = retry_with_backoff(
            "agent graph",
            self.max_retries,
            &self.backoff,
            || self.execute_graph(&llm, &request),
        )
        .await;

        match result {
            Ok(state) => Self::outcome_from_state(state),
            Err(LlmError::CircuitOpen { circuit, .. }) => {
                warn!(%circuit, "graph aborted on open circuit");
                Self::degraded_outcome(TEMPORARILY_UNAVAILABLE)
            }
            Err(e) => {
                error!(error = %e, "agent graph failed after retries");
                Self::degraded_outcome(APOLOGY)
            }
        }
    }

    fn degraded_outcome(text: &str) -> AgentOutcome {
        AgentOutcome {
            text: text.to_string(),
            tokens_used: 0,
            agent_type: AgentType::Fallback,
            intent: "general".to_string(),
            conversation_state: None,
            tools_used: Vec::new(),
            needs_clarification: false,
        }
    }

    fn outcome_from_state(state: AgentState) -> AgentOutcome {
        let suggested = Self::suggest_state(&state);
        AgentOutcome {
            text: state
                .final_response
                .unwrap_or_else(|| APOLOGY.to_string()),
            tokens_used: state.tokens_used,
            agent_type: state.agent_type,
            intent: state.intent,
            conversation_state: suggested,
            tools_used: state.tools_used,
            needs_clarification: state.needs_clarification,
        }
    }

    /// Next conversation state implied by what the agent actually did this
    /// turn. The orchestrator applies it only when the transition is legal.
    fn suggest_state(state: &AgentState) -> Option<ConversationState> {
        let used = |name: &str| state.tools_used.iter().any(|t| t == name);

        let paid = state
            .tool_results
            .get("check_payment_status")
            .and_then(|r| r.get("status"))
            .and_then(Value::as_str)
            == Some("PAID");

        let suggested = if paid {
            ConversationState::Completed
        } else if used("initiate_payment") || used("confirm_order") {
            ConversationState::Payment
        } else if used("create_order") || used("add_to_order") {
            ConversationState::Ordering
        } else if used("cancel_order") {
            ConversationState::Browsing
        } else if state.conversation_state == ConversationState::Greeting
            && state.final_response.is_some()
        {
            // First exchange done; the customer is effectively browsing.
            ConversationState::Browsing
        } else {
            return None;
        };

        (suggested != state.conversation_state).then_some(suggested)
    }

    async fn execute_graph(
        &self,
        llm: &Arc<dyn LlmClient>,
        request: &AgentRequest,
    ) -> Result<AgentState, LlmError> {
        let available: Vec<String> = tools_for_state(request.conversation_state)
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut state = AgentState::new(
            &request.tenant_id,
            &request.customer_id,
            &request.conversation_id,
            request.conversation_state,
            request.customer_context.clone(),
            request.context.clone(),
            request.history.clone(),
            available,
        );

        if request.moderate {
            state.moderation = Some(self.moderation_node(llm, request, &state).await);
        }

        state.agent_type = nodes::route(&state);
        info!(agent = state.agent_type.as_str(), "routing agent turn");

        match state.agent_type {
            AgentType::Main | AgentType::Followup => {
                self.agent_node(llm, request, &mut state).await?;
                if state.final_response.is_none() {
                    // Main path failed for a non-retryable reason.
                    state.agent_type = AgentType::Fallback;
                    self.fallback_node(llm, request, &mut state).await;
                }
            }
            AgentType::Fallback => self.fallback_node(llm, request, &mut state).await,
        }

        Ok(state)
    }

    /// Moderation never blocks the pipeline: any failure yields a
    /// default-safe verdict whose reason records what went wrong.
    async fn moderation_node(
        &self,
        llm: &Arc<dyn LlmClient>,
        request: &AgentRequest,
        state: &AgentState,
    ) -> ModerationVerdict {
        let user_message = match state.last_user_message() {
            Some(m) => m.to_string(),
            None => return ModerationVerdict::default_safe(1.0, "no user message"),
        };

        let circuit = self.circuits.get_or_create(
            &format!("moderation-{}", request.llm_config.name),
            self.circuit_config,
        );

        let messages = vec![
            ChatMessage::system(request.system_prompt.clone()),
            ChatMessage::user(nodes::moderation_prompt(&user_message)),
        ];

        let result = circuit
            .call(with_timeout(
                llm.invoke(&messages, &[]),
                request.llm_config.timeout(),
                "moderation LLM call",
            ))
            .await;

        match result {
            Ok(response) => {
                let verdict = nodes::parse_verdict(&response.content);
                info!(is_safe = verdict.is_safe, "moderation result");
                verdict
            }
            Err(e) => {
                error!(error = %e, "moderation failed, allowing content through");
                ModerationVerdict::default_safe(0.0, format!("moderation check failed: {e}"))
            }
        }
    }

    /// Main/followup node with the tool-dispatch loop.
    ///
    /// Retryable transport errors propagate so the graph-level backoff can
    /// re-run the turn; everything else degrades in-state and the caller
    /// falls through to the fallback node.
    async fn agent_node(
        &self,
        llm: &Arc<dyn LlmClient>,
        request: &AgentRequest,
        state: &mut AgentState,
    ) -> Result<(), LlmError> {
        let component = state.agent_type.as_str();
        let specs = self.registry.specs_for(
            &state
                .available_tools
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
        );

        let mut system = format!(
            "{}\n\n{}",
            request.system_prompt,
            nodes::build_context_info(state, &specs)
        );
        if state.agent_type == AgentType::Followup {
            if let Some(topic) = state.context.get("previous_topic").and_then(Value::as_str) {
                system.push_str(&format!(
                    "\n\nThe previous conversation was about: {topic}"
                ));
            }
        }

        let mut messages: Vec<ChatMessage> = Vec::with_capacity(state.messages.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(state.messages.iter().cloned());

        let call_ctx = ToolCallContext {
            tenant_id: state.tenant_id.clone(),
            customer_id: state.customer_id.clone(),
            conversation_id: state.conversation_id.clone(),
        };

        let mut rounds = 0u32;
        let mut validation_retried = false;

        loop {
            let response = match self
                .guarded_invoke(component, llm, &request.llm_config, &messages, &specs)
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_retryable() => return Err(e),
                Err(LlmError::CircuitOpen { circuit, .. }) => {
                    warn!(%circuit, "agent node hit open circuit");
                    state.circuit_open = true;
                    state.error = Some(format!("service temporarily unavailable: {circuit}"));
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, component, "agent node llm call failed");
                    state.error = Some(e.to_string());
                    return Ok(());
                }
            };

            if let Some(usage) = &response.usage {
                state.tokens_used += usage.total_tokens;
            }

            if !response.tool_calls.is_empty() && rounds < TOOL_ROUND_CAP {
                self.dispatch_tools(&response, &mut messages, state, &call_ctx)
                    .await;
                rounds += 1;
                continue;
            }

            let validation = validate_response(Some(&response.content), DEFAULT_MIN_LENGTH);
            if !validation.is_valid {
                if is_retryable_failure(&validation) && !validation_retried {
                    warn!(
                        component,
                        quality = ?validation.quality,
                        "invalid response, re-asking once"
                    );
                    validation_retried = true;
                    continue;
                }
                warn!(component, reason = ?validation.reason, "response failed validation");
                state.error = validation.reason.or(Some("invalid response".to_string()));
                return Ok(());
            }

            state.messages.push(ChatMessage::assistant(response.content.clone()));
            state.final_response = Some(response.content);
            state.error = None;
            return Ok(());
        }
    }

    /// Sequential tool dispatch: later tools observe earlier side effects.
    async fn dispatch_tools(
        &self,
        response: &LlmResponse,
        messages: &mut Vec<ChatMessage>,
        state: &mut AgentState,
        call_ctx: &ToolCallContext,
    ) {
        messages.push(ChatMessage::Assistant {
            content: response.content.clone(),
            tool_calls: response.tool_calls.clone(),
        });

        for call in &response.tool_calls {
            let result = match self
                .registry
                .call(&call.name, &call.arguments, call_ctx)
                .await
            {
                Ok(value) => value,
                Err(ToolError::Unknown(name)) => {
                    warn!(tool = %name, "unknown tool requested");
                    json!({"error": format!("Tool {name} not available")})
                }
                Err(e) => {
                    error!(tool = %call.name, error = %e, "tool execution failed");
                    json!({"error": e.to_string()})
                }
            };

            state
                .tool_results
                .insert(call.name.clone(), result.clone());
            state.tools_used.push(call.name.clone());
            messages.push(ChatMessage::tool(call.id.clone(), result.to_string()));
        }
    }

    /// Fallback always produces output: refusal for moderation violations,
    /// the unavailable text on open circuits, a simple LLM answer when the
    /// provider still works, and the hard-coded apology otherwise.
    async fn fallback_node(
        &self,
        llm: &Arc<dyn LlmClient>,
        request: &AgentRequest,
        state: &mut AgentState,
    ) {
        if let Some(verdict) = &state.moderation {
            if !verdict.is_safe {
                info!(violations = ?verdict.violations, "fallback answering moderation violation");
                state.final_response = Some(REFUSAL.to_string());
                state.error = None;
                return;
            }
        }

        if state.circuit_open {
            state.final_response = Some(TEMPORARILY_UNAVAILABLE.to_string());
            return;
        }

        let circuit = self.circuits.get_or_create(
            &format!("fallback-{}", request.llm_config.name),
            self.circuit_config,
        );

        let mut messages = vec![
            ChatMessage::system(request.system_prompt.clone()),
            ChatMessage::system(
                "You are a helpful assistant providing a backup response. If the previous \
                 response was incomplete or had issues, provide a simpler, more direct answer."
                    .to_string(),
            ),
        ];
        messages.extend(state.messages.iter().cloned());

        let result = circuit
            .call(with_timeout(
                llm.invoke(&messages, &[]),
                request.llm_config.timeout(),
                "fallback LLM call",
            ))
            .await;

        match result {
            Ok(response) if !response.content.trim().is_empty() => {
                if let Some(usage) = &response.usage {
                    state.tokens_used += usage.total_tokens;
                }
                state.final_response = Some(response.content);
                state.error = None;
            }
            Ok(_) => {
                state.final_response = Some(APOLOGY.to_string());
            }
            Err(e) => {
                error!(error = %e, "fallback agent failed, using static apology");
                state.final_response = Some(APOLOGY.to_string());
                state.error = Some(e.to_string());
            }
        }
    }

    /// The per-call resilience sandwich: node retry around circuit breaker
    /// around timeout. The circuit observes every individual attempt, so a
    /// persistently failing provider opens it within `failure_threshold`
    /// attempts and the remaining retries fail fast.
    async fn guarded_invoke(
        &self,
        component: &str,
        llm: &Arc<dyn LlmClient>,
        config: &LlmConfig,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError> {
        let circuit = self
            .circuits
            .get_or_create(&format!("{component}-{}", config.name), self.circuit_config);
        let operation = format!("{component} LLM call");

        retry_with_backoff(&operation, self.max_retries, &self.backoff, || {
            let circuit = circuit.clone();
            let operation = operation.clone();
            async move {
                circuit
                    .call(with_timeout(
                        llm.invoke(messages, tools),
                        config.timeout(),
                        &operation,
                    ))
                    .await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, NullEventSink, OrderStatus, Product};
    use crate::llm::{LlmUsage, MockLlm, ToolCall};
    use crate::repo::memory::{MemOrderRepo, MemProductRepo};
    use crate::tools::{AddToOrderTool, CreateOrderTool};
    use std::time::Duration;

    fn llm_config() -> LlmConfig {
        LlmConfig {
            name: "default".into(),
            provider: "openai".into(),
            model_name: "gpt-4o-mini".into(),
            temperature: 0.3,
            max_tokens: 1024,
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_seconds: 5,
        }
    }

    fn request(text: &str, state: ConversationState, moderate: bool) -> AgentRequest {
        AgentRequest {
            llm_config: llm_config(),
            system_prompt: "You are the shop assistant for Warung Makmur.".into(),
            tenant_id: "t1".into(),
            customer_id: "c1".into(),
            conversation_id: "628@c.us".into(),
            customer_context: json!({"name": "Budi"}),
            conversation_state: state,
            context: Map::new(),
            history: vec![ChatMessage::user(text)],
            moderate,
        }
    }

    fn runner(registry: ToolRegistry, max_retries: u32) -> (AgentRunner, Arc<CircuitRegistry>) {
        let circuits = Arc::new(CircuitRegistry::new());
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.0,
        };
        let runner = AgentRunner::new(
            Arc::new(registry),
            circuits.clone(),
            CircuitBreakerConfig::default(),
            backoff,
            max_retries,
        );
        (runner, circuits)
    }

    fn ok_response(text: &str, tokens: u32) -> LlmResponse {
        LlmResponse {
            content: text.into(),
            tool_calls: vec![],
            usage: Some(LlmUsage {
                prompt_tokens: tokens / 2,
                completion_tokens: tokens / 2,
                total_tokens: tokens,
            }),
        }
    }

    fn timeout_err() -> LlmError {
        LlmError::Timeout {
            seconds: 5.0,
            operation: "main LLM call".into(),
        }
    }

    /// **Scenario**: plain question, no tools, one LLM call.
    #[tokio::test]
    async fn simple_turn_produces_response() {
        let mock = Arc::new(MockLlm::new(vec![ok_response(
            "Halo Budi! Ada yang bisa kami bantu hari ini?",
            42,
        )]));
        let (runner, _) = runner(ToolRegistry::new(), 1);
        let runner = runner.with_llm(mock.clone());

        let outcome = runner
            .run(request("Halo", ConversationState::Browsing, false))
            .await;
        assert_eq!(outcome.text, "Halo Budi! Ada yang bisa kami bantu hari ini?");
        assert_eq!(outcome.agent_type, AgentType::Main);
        assert_eq!(outcome.tokens_used, 42);
        assert!(outcome.tools_used.is_empty());
        assert_eq!(mock.call_count(), 1);
    }

    /// **Scenario**: customer orders 2 × P1; the model emits
    /// `[create_order, add_to_order]`, then confirms with no further calls.
    /// One PENDING order exists with quantity 2 and subtotal 2 × price.
    #[tokio::test]
    async fn tool_loop_creates_and_fills_order() {
        let orders = Arc::new(MemOrderRepo::default());
        let products = Arc::new(MemProductRepo::default());
        products.products.lock().unwrap().push(Product {
            id: "P1".into(),
            tenant_id: "t1".into(),
            name: "Keripik".into(),
            description: None,
            category: None,
            base_price: Money(15_000),
            stock: 50,
            is_active: true,
            variants: vec![],
        });

        let events = Arc::new(NullEventSink);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CreateOrderTool::new(orders.clone(), events.clone())));
        registry.register(Arc::new(AddToOrderTool::new(
            orders.clone(),
            products,
            events,
        )));

        let mock = Arc::new(MockLlm::new(vec![
            LlmResponse {
                content: String::new(),
                tool_calls: vec![
                    ToolCall {
                        id: "call_1".into(),
                        name: "create_order".into(),
                        arguments: "{}".into(),
                    },
                    ToolCall {
                        id: "call_2".into(),
                        name: "add_to_order".into(),
                        arguments: r#"{"product_id": "P1", "quantity": 2}"#.into(),
                    },
                ],
                usage: Some(LlmUsage {
                    prompt_tokens: 10,
                    completion_tokens: 10,
                    total_tokens: 20,
                }),
            },
            ok_response("Pesanan kamu sudah dibuat: 2 x Keripik, total Rp30.000.", 30),
        ]));

        let (runner, _) = runner(registry, 1);
        let runner = runner.with_llm(mock.clone());

        let outcome = runner
            .run(request(
                "Saya mau order keripik 2 pcs",
                ConversationState::Ordering,
                false,
            ))
            .await;

        assert!(outcome.text.contains("Pesanan kamu sudah dibuat"));
        assert_eq!(outcome.tools_used, vec!["create_order", "add_to_order"]);
        assert_eq!(outcome.tokens_used, 50);
        assert_eq!(outcome.conversation_state, None); // already in ordering
        assert_eq!(mock.call_count(), 2);

        let stored = orders.orders.lock().unwrap();
        assert_eq!(stored.len(), 1);
        let order = stored.values().next().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.subtotal, Money(30_000));
    }

    /// **Scenario**: the model asks for an unregistered tool; it gets a
    /// synthesised error result and the loop continues to a final answer.
    #[tokio::test]
    async fn unknown_tool_yields_error_result_and_continues() {
        let mock = Arc::new(MockLlm::new(vec![
            LlmResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "teleport_order".into(),
                    arguments: "{}".into(),
                }],
                usage: None,
            },
            ok_response("Maaf, fitur itu belum tersedia di toko kami.", 10),
        ]));
        let (runner, _) = runner(ToolRegistry::new(), 1);
        let runner = runner.with_llm(mock.clone());

        let outcome = runner
            .run(request("teleport my order", ConversationState::Ordering, false))
            .await;
        assert!(outcome.text.contains("belum tersedia"));
        assert_eq!(outcome.tools_used, vec!["teleport_order"]);

        // The tool message carried the synthesised error back to the model.
        let calls = mock.recorded_calls();
        let second_call = &calls[1];
        let tool_msg = second_call
            .iter()
            .find_map(|m| match m {
                ChatMessage::Tool { content, .. } => Some(content.clone()),
                _ => None,
            })
            .expect("tool result message present");
        assert!(tool_msg.contains("Tool teleport_order not available"));
    }

    /// **Scenario**: first call times out, second succeeds — one retry, no
    /// circuit opening, final response and tokens from the second call only.
    #[tokio::test(start_paused = true)]
    async fn timeout_then_success_retries_once() {
        let mock = Arc::new(MockLlm::with_script(vec![
            Err(timeout_err()),
            Ok(ok_response("Ini jawaban setelah retry, aman ya.", 33)),
        ]));
        let (runner, circuits) = runner(ToolRegistry::new(), 2);
        let runner = runner.with_llm(mock.clone());

        let outcome = runner
            .run(request("Halo", ConversationState::Browsing, false))
            .await;
        assert_eq!(outcome.text, "Ini jawaban setelah retry, aman ya.");
        assert_eq!(outcome.tokens_used, 33);
        assert_eq!(outcome.agent_type, AgentType::Main);
        assert_eq!(mock.call_count(), 2);

        let circuit = circuits.get("main-default").expect("circuit created");
        assert_eq!(
            circuit.state().await,
            crate::resilience::CircuitState::Closed
        );
    }

    /// **Scenario**: five consecutive timeouts open `main-default`; the
    /// sixth turn short-circuits without invoking the LLM and the customer
    /// still receives a non-empty reply.
    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_threshold_and_short_circuits() {
        let script: Vec<Result<LlmResponse, LlmError>> =
            (0..12).map(|_| Err(timeout_err())).collect();
        let mock = Arc::new(MockLlm::with_script(script));
        let (runner, circuits) = runner(ToolRegistry::new(), 0);
        let runner = runner.with_llm(mock.clone());

        for _ in 0..5 {
            let outcome = runner
                .run(request("Halo", ConversationState::Browsing, false))
                .await;
            assert!(!outcome.text.is_empty());
            assert_eq!(outcome.agent_type, AgentType::Fallback);
        }

        let circuit = circuits.get("main-default").expect("circuit created");
        assert_eq!(circuit.state().await, crate::resilience::CircuitState::Open);

        let calls_before = mock.call_count();
        let outcome = runner
            .run(request("Masih ada?", ConversationState::Browsing, false))
            .await;
        assert_eq!(outcome.text, TEMPORARILY_UNAVAILABLE);
        assert_eq!(outcome.agent_type, AgentType::Fallback);
        // Neither main (open circuit) nor fallback (known-down provider)
        // invoked the LLM.
        assert_eq!(mock.call_count(), calls_before);
    }

    /// **Scenario**: moderation flags the message; the fallback returns the
    /// refusal template without calling the main agent.
    #[tokio::test]
    async fn moderation_violation_returns_refusal() {
        let mock = Arc::new(MockLlm::new(vec![LlmResponse {
            content: r#"{"is_safe": false, "violations": ["spam"], "confidence": 0.97, "reason": "bulk advertising"}"#.into(),
            tool_calls: vec![],
            usage: None,
        }]));
        let (runner, _) = runner(ToolRegistry::new(), 1);
        let runner = runner.with_llm(mock.clone());

        let outcome = runner
            .run(request("BUY NOW!!! spam spam", ConversationState::Browsing, true))
            .await;
        assert!(outcome.text.contains("content policies"));
        assert_eq!(outcome.agent_type, AgentType::Fallback);
        assert_eq!(mock.call_count(), 1); // moderation only
    }

    /// **Scenario**: moderation itself fails; the pipeline continues with a
    /// default-safe verdict and the main agent still answers.
    #[tokio::test]
    async fn moderation_failure_does_not_block() {
        let mock = Arc::new(MockLlm::with_script(vec![
            Err(LlmError::Provider("500 from provider".into())),
            Ok(ok_response("Tetap bisa jawab walau moderasi gagal.", 12)),
        ]));
        let (runner, _) = runner(ToolRegistry::new(), 1);
        let runner = runner.with_llm(mock.clone());

        let outcome = runner
            .run(request("Halo", ConversationState::Browsing, true))
            .await;
        assert_eq!(outcome.text, "Tetap bisa jawab walau moderasi gagal.");
        assert_eq!(outcome.agent_type, AgentType::Main);
    }

    /// **Scenario**: a too-short reply is re-asked once; an error-indicator
    /// reply is not retried and degrades to fallback.
    #[tokio::test]
    async fn validation_retries_transient_only() {
        let mock = Arc::new(MockLlm::new(vec![
            ok_response("ok", 2),
            ok_response("Ini jawaban yang cukup panjang dan membantu.", 12),
        ]));
        let (agent_runner, _) = runner(ToolRegistry::new(), 1);
        let agent_runner = agent_runner.with_llm(mock.clone());
        let outcome = agent_runner
            .run(request("Halo", ConversationState::Browsing, false))
            .await;
        assert!(outcome.text.contains("cukup panjang"));
        assert_eq!(mock.call_count(), 2);

        // Refusal-shaped output goes to fallback instead of being retried.
        let mock = Arc::new(MockLlm::new(vec![
            ok_response("As an AI, I cannot help with that.", 5),
            ok_response("Jawaban fallback yang ramah untuk pelanggan.", 8),
        ]));
        let (agent_runner, _) = runner(ToolRegistry::new(), 1);
        let agent_runner = agent_runner.with_llm(mock.clone());
        let outcome = agent_runner
            .run(request("Halo", ConversationState::Browsing, false))
            .await;
        assert_eq!(outcome.agent_type, AgentType::Fallback);
        assert!(outcome.text.contains("fallback"));
    }

    /// **Scenario**: follow-up cue routes to the followup agent and the
    /// previous topic is injected into the system prompt.
    #[tokio::test]
    async fn followup_injects_previous_topic() {
        let mock = Arc::new(MockLlm::new(vec![ok_response(
            "Lanjut soal keripik pedas: masih ada stok!",
            9,
        )]));
        let (runner, _) = runner(ToolRegistry::new(), 1);
        let runner = runner.with_llm(mock.clone());

        let mut req = request("tell me more", ConversationState::Browsing, false);
        req.context
            .insert("previous_topic".into(), json!("keripik pedas"));
        let outcome = runner.run(req).await;
        assert_eq!(outcome.agent_type, AgentType::Followup);
        assert!(!outcome.text.is_empty());

        let calls = mock.recorded_calls();
        let system = calls[0]
            .iter()
            .find_map(|m| match m {
                ChatMessage::System(s) => Some(s.clone()),
                _ => None,
            })
            .expect("system prompt present");
        assert!(system.contains("previous conversation was about: keripik pedas"));
    }

    /// **Scenario**: greeting turns suggest moving to browsing; the tool
    /// trail suggests ordering/payment states.
    #[tokio::test]
    async fn suggested_state_follows_tools() {
        let mock = Arc::new(MockLlm::new(vec![ok_response(
            "Selamat datang di Warung Makmur! Mau lihat menu kami?",
            9,
        )]));
        let (runner, _) = runner(ToolRegistry::new(), 1);
        let runner = runner.with_llm(mock);
        let outcome = runner
            .run(request("Halo", ConversationState::Greeting, false))
            .await;
        assert_eq!(outcome.conversation_state, Some(ConversationState::Browsing));
    }
}
