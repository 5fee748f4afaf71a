use std::sync::Arc;

use rig::completion::{CompletionRequest, Message as RigMessage};
use rig::message::{AssistantContent, Text, ToolCall, ToolResult, ToolResultContent, UserContent};
use rig::OneOrMany;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::context::ContextBuilder;
use crate::agent::lifecycle::AgentHandle;
use crate::error::{AdapterError, Result};
use crate::message::{Message, Role};
use crate::tools::working_memory::UpdateWorkingMemoryTool;
use crate::tools::ToolRegistry;

const MAX_CONSECUTIVE_ERRORS: usize = 3;
const CONTINUE_PROMPT: &str =
    "If more tool calls are needed, make them. Otherwise, respond with the result.";

/// Per-call routing and sampling overrides. Unset fields use the agent defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Memory subject. Callers should always set this: the fallback subject
    /// is shared by everyone who omits it.
    pub resource_id: Option<String>,
    pub thread_id: Option<String>,
    pub max_steps: Option<usize>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    /// `None` when the call was requested but never executed.
    pub result: Option<String>,
}

/// One model call and the tool calls it requested.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Step {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub text: String,
    pub steps: Vec<Step>,
    pub resource_id: String,
    pub thread_id: String,
}

/// Find the largest byte index <= `max` that is a UTF-8 char boundary.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn preview(s: &str) -> String {
    if s.len() > 200 {
        let end = floor_char_boundary(s, 200);
        format!("{}... ({} chars)", &s[..end], s.len())
    } else {
        s.to_string()
    }
}

fn new_thread_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("thread-{}-{}", chrono::Utc::now().timestamp_millis(), &suffix[..8])
}

struct Sampling {
    max_steps: usize,
    temperature: f64,
    max_tokens: u64,
}

impl AgentHandle {
    /// Run one generation over the full conversation.
    ///
    /// Memory is scoped by the resolved subject and thread ids. The new user
    /// turn and the reply are persisted afterwards. On a thread with nothing
    /// stored yet the caller's earlier turns are persisted first, so later
    /// single-turn calls still see them. Turns without text are never stored.
    pub async fn generate(
        &self,
        conversation: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let resource_id = match options.resource_id.as_deref().filter(|r| !r.is_empty()) {
            Some(r) => r.to_string(),
            None => {
                debug!(
                    "No resourceId supplied; using shared subject '{}'",
                    self.defaults.resource_id
                );
                self.defaults.resource_id.clone()
            }
        };
        let thread_id = options
            .thread_id
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(new_thread_id);
        let sampling = Sampling {
            max_steps: options.max_steps.unwrap_or(self.defaults.max_steps).max(1),
            temperature: options.temperature.unwrap_or(self.defaults.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.defaults.max_tokens),
        };

        let query = match conversation.iter().rev().find(|m| m.role != Role::System) {
            Some(m) if m.role == Role::User => m.content.text(),
            _ => {
                return Err(AdapterError::InvalidConversation(
                    "conversation must end with a user message".into(),
                ))
            }
        };

        let memory = self
            .memory
            .load_context(&resource_id, &thread_id, &query)
            .await
            .map_err(AdapterError::Memory)?;
        let context = ContextBuilder::new(
            &self.instructions,
            &memory,
            self.memory.options().last_messages,
        );
        let system_prompt = context.build_system_prompt(conversation);
        let (history, prompt) = context.build_messages(conversation)?;

        debug!(
            "Context: system={} chars, history={} messages, subject='{resource_id}', thread='{thread_id}'",
            system_prompt.len(),
            history.len()
        );

        let mut tools = ToolRegistry::from_set(&self.tools);
        tools.register(Arc::new(UpdateWorkingMemoryTool::new(
            self.memory.store().clone(),
            resource_id.clone(),
        )));

        let (text, steps) = self
            .run_loop(&system_prompt, history, prompt, &tools, &sampling)
            .await
            .map_err(AdapterError::UpstreamGeneration)?;

        let mut turns: Vec<(Role, String)> = Vec::new();
        if memory.recent.is_empty() {
            let dialogue: Vec<&Message> = conversation
                .iter()
                .filter(|m| m.role != Role::System)
                .collect();
            if let Some((_, earlier)) = dialogue.split_last() {
                turns.extend(earlier.iter().map(|m| (m.role, m.content.text())));
            }
        }
        turns.push((Role::User, query));
        turns.push((Role::Assistant, text.clone()));
        turns.retain(|(_, t)| !t.trim().is_empty());
        if !turns.is_empty() {
            if let Err(e) = self.memory.remember(&resource_id, &thread_id, &turns).await {
                warn!("Failed to persist exchange for thread '{thread_id}': {e}");
            }
        }

        Ok(GenerationResult {
            text,
            steps,
            resource_id,
            thread_id,
        })
    }

    /// Run the LLM <> tool loop until the model answers without tool calls
    /// or the step budget runs out.
    async fn run_loop(
        &self,
        system_prompt: &str,
        mut chat_history: Vec<RigMessage>,
        prompt: RigMessage,
        tools: &ToolRegistry,
        sampling: &Sampling,
    ) -> anyhow::Result<(String, Vec<Step>)> {
        let tool_defs = tools.definitions();
        let max_steps = sampling.max_steps;
        let mut steps: Vec<Step> = Vec::new();
        let mut current_prompt = prompt;
        let mut consecutive_errors: usize = 0;

        for iteration in 0..max_steps {
            let mut all_messages = chat_history.clone();
            all_messages.push(current_prompt.clone());

            debug!(
                "LLM request [{}/{max_steps}]: {} messages, {} tools, temp={}, max_tokens={}",
                iteration + 1,
                all_messages.len(),
                tool_defs.len(),
                sampling.temperature,
                sampling.max_tokens
            );

            let request = CompletionRequest {
                preamble: Some(system_prompt.to_string()),
                chat_history: OneOrMany::many(all_messages)
                    .unwrap_or_else(|_| OneOrMany::one(current_prompt.clone())),
                documents: Vec::new(),
                tools: tool_defs.clone(),
                temperature: Some(sampling.temperature),
                max_tokens: Some(sampling.max_tokens),
                tool_choice: None,
                additional_params: None,
            };

            let llm_start = std::time::Instant::now();
            let choice = self.model.complete(request).await?;
            let llm_elapsed = llm_start.elapsed();

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            for content in choice.iter() {
                match content {
                    AssistantContent::Text(t) => text.push_str(&t.text),
                    AssistantContent::ToolCall(tc) => calls.push(tc.clone()),
                    _ => {}
                }
            }

            if calls.is_empty() {
                debug!(
                    "LLM response [{}/{max_steps}]: text ({} chars) in {:.1}s",
                    iteration + 1,
                    text.len(),
                    llm_elapsed.as_secs_f64()
                );
                steps.push(Step {
                    text: text.clone(),
                    tool_calls: Vec::new(),
                });
                return Ok((text, steps));
            }

            if iteration + 1 == max_steps {
                warn!(
                    "Step budget ({max_steps}) exhausted with {} unexecuted tool call(s)",
                    calls.len()
                );
                steps.push(Step {
                    text: text.clone(),
                    tool_calls: calls
                        .iter()
                        .map(|tc| ToolCallRecord {
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                            result: None,
                        })
                        .collect(),
                });
                return Ok((text, steps));
            }

            debug!(
                "LLM response [{}/{max_steps}]: {} tool call(s) in {:.1}s",
                iteration + 1,
                calls.len(),
                llm_elapsed.as_secs_f64()
            );

            chat_history.push(current_prompt);
            chat_history.push(RigMessage::Assistant {
                id: None,
                content: choice.clone(),
            });

            let mut tool_results: Vec<UserContent> = Vec::new();
            let mut records: Vec<ToolCallRecord> = Vec::new();
            let mut iteration_has_success = false;
            let mut last_error = String::new();

            for tc in &calls {
                let tool_name = &tc.function.name;
                let tool_args = &tc.function.arguments;
                info!(
                    "Tool call [{}/{max_steps}]: {tool_name}({})",
                    iteration + 1,
                    preview(&tool_args.to_string())
                );

                let result = match tools.execute(tool_name, tool_args.clone()).await {
                    Ok(r) => {
                        if r.starts_with("Error") {
                            last_error.clone_from(&r);
                        } else {
                            iteration_has_success = true;
                        }
                        r
                    }
                    Err(e) => {
                        let err = format!("Error executing {tool_name}: {e}");
                        last_error.clone_from(&err);
                        err
                    }
                };
                debug!("Tool result [{tool_name}]: {}", preview(&result));

                records.push(ToolCallRecord {
                    name: tool_name.clone(),
                    arguments: tool_args.clone(),
                    result: Some(result.clone()),
                });
                tool_results.push(UserContent::ToolResult(ToolResult {
                    id: tc.id.clone(),
                    call_id: tc.call_id.clone(),
                    content: OneOrMany::one(ToolResultContent::Text(Text { text: result })),
                }));
            }

            steps.push(Step {
                text,
                tool_calls: records,
            });

            if iteration_has_success {
                consecutive_errors = 0;
            } else {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(
                        "Circuit breaker: {consecutive_errors} consecutive steps with all tool calls failing"
                    );
                    return Ok((
                        format!(
                            "I couldn't complete that with my tools after several attempts \
                             (last error: {last_error}). Could you rephrase the question or add detail?"
                        ),
                        steps,
                    ));
                }
            }

            tool_results.push(UserContent::Text(Text {
                text: CONTINUE_PROMPT.into(),
            }));
            current_prompt = RigMessage::User {
                content: OneOrMany::many(tool_results).unwrap_or_else(|_| {
                    OneOrMany::one(UserContent::Text(Text {
                        text: CONTINUE_PROMPT.into(),
                    }))
                }),
            };
        }

        // max_steps >= 1 and the final iteration always returns.
        Ok((String::new(), steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_char_boundary() {
        let s = "héllo";
        // 'é' occupies bytes 1..3
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 3);
        assert_eq!(floor_char_boundary(s, 100), s.len());
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "é".repeat(150);
        let p = preview(&long);
        assert!(p.ends_with("(300 chars)"));
        assert!(p.len() < long.len());
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn test_new_thread_ids_are_distinct() {
        let a = new_thread_id();
        assert!(a.starts_with("thread-"));
        assert_ne!(a, new_thread_id());
    }
}
