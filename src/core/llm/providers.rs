use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{ChatTurn, LlmClient, LlmResponse, TokenUsage, ToolCallRequest, ToolSpec};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

// ── Anthropic Messages API ──

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicBlock>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.anthropic.com/v1/messages".to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url,
            client: Client::new(),
        }
    }

    /// Fold unified turns into Anthropic's block structure: tool results
    /// become user-role tool_result blocks, assistant tool requests become
    /// tool_use blocks after any text.
    fn encode(turns: &[ChatTurn]) -> Vec<AnthropicMessage> {
        let mut out: Vec<AnthropicMessage> = Vec::new();
        for turn in turns {
            match turn.role.as_str() {
                "tool" => {
                    let block = AnthropicBlock::ToolResult {
                        tool_use_id: turn.tool_call_id.clone().unwrap_or_default(),
                        content: turn.content.clone(),
                    };
                    // Consecutive tool results share one user message.
                    match out.last_mut() {
                        Some(last) if last.role == "user" && matches!(last.content.last(), Some(AnthropicBlock::ToolResult { .. })) => {
                            last.content.push(block);
                        }
                        _ => out.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: vec![block],
                        }),
                    }
                }
                "assistant" => {
                    let mut content = Vec::new();
                    if !turn.content.is_empty() {
                        content.push(AnthropicBlock::Text {
                            text: turn.content.clone(),
                        });
                    }
                    for call in &turn.tool_calls {
                        content.push(AnthropicBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                    if content.is_empty() {
                        continue;
                    }
                    out.push(AnthropicMessage {
                        role: "assistant".to_string(),
                        content,
                    });
                }
                _ => out.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: vec![AnthropicBlock::Text {
                        text: turn.content.clone(),
                    }],
                }),
            }
        }
        out
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse> {
        let req = AnthropicRequest {
            model,
            max_tokens: MAX_TOKENS,
            system: if system_prompt.is_empty() {
                None
            } else {
                Some(system_prompt)
            },
            messages: Self::encode(turns),
            tools: tools
                .iter()
                .map(|t| AnthropicTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
        };

        let res = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await
            .map_err(|e| anyhow!("Anthropic request failed: {}", e))?;

        if !res.status().is_success() {
            return Err(anyhow!(
                "Anthropic API error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }

        let parsed: AnthropicResponse = res.json().await?;
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                AnthropicBlock::Text { text } => content.push_str(&text),
                AnthropicBlock::ToolUse { id, name, input } => tool_calls.push(ToolCallRequest {
                    id,
                    name,
                    arguments: input,
                }),
                AnthropicBlock::ToolResult { .. } => {}
            }
        }
        Ok(LlmResponse {
            content,
            tool_calls,
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
        })
    }
}

// ── OpenAI-compatible chat completions (also serves local runtimes) ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool<'a>>,
}

#[derive(Serialize)]
struct OpenAiTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiFunctionDef<'a>,
}

#[derive(Serialize)]
struct OpenAiFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    /// JSON-encoded argument object, per the wire format.
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: OpenAiUsage,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct OpenAiClient {
    provider_id: String,
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self::compatible(
            "openai",
            api_key,
            "https://api.openai.com/v1/chat/completions".to_string(),
        )
    }

    /// Any OpenAI-compatible endpoint; local runtimes (Ollama, llama.cpp
    /// servers) register through this with provider id "local".
    pub fn compatible(provider_id: &str, api_key: String, base_url: String) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            api_key,
            base_url,
            client: Client::new(),
        }
    }

    fn encode(system_prompt: &str, turns: &[ChatTurn]) -> Vec<OpenAiMessage> {
        let mut out = Vec::new();
        if !system_prompt.is_empty() {
            out.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(system_prompt.to_string()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        for turn in turns {
            match turn.role.as_str() {
                "tool" => out.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(turn.content.clone()),
                    tool_calls: Vec::new(),
                    tool_call_id: turn.tool_call_id.clone(),
                }),
                "assistant" => out.push(OpenAiMessage {
                    role: "assistant".to_string(),
                    content: if turn.content.is_empty() {
                        None
                    } else {
                        Some(turn.content.clone())
                    },
                    tool_calls: turn
                        .tool_calls
                        .iter()
                        .map(|c| OpenAiToolCall {
                            id: c.id.clone(),
                            kind: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.to_string(),
                            },
                        })
                        .collect(),
                    tool_call_id: None,
                }),
                role => out.push(OpenAiMessage {
                    role: role.to_string(),
                    content: Some(turn.content.clone()),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                }),
            }
        }
        out
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        turns: &[ChatTurn],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse> {
        let req = OpenAiRequest {
            model,
            messages: Self::encode(system_prompt, turns),
            tools: tools
                .iter()
                .map(|t| OpenAiTool {
                    kind: "function",
                    function: OpenAiFunctionDef {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
        };

        let mut request = self.client.post(&self.base_url).json(&req);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let res = request
            .send()
            .await
            .map_err(|e| anyhow!("{} request failed: {}", self.provider_id, e))?;

        if !res.status().is_success() {
            return Err(anyhow!(
                "{} API error {}: {}",
                self.provider_id,
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }

        let parsed: OpenAiResponse = res.json().await?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow!("{} returned no choices", self.provider_id))?;

        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(|c| ToolCallRequest {
                id: if c.id.is_empty() {
                    // Some compatible servers omit ids; results still need one.
                    format!("call_{}", Uuid::new_v4().simple())
                } else {
                    c.id
                },
                name: c.function.name,
                arguments: serde_json::from_str(&c.function.arguments)
                    .unwrap_or(Value::Object(Default::default())),
            })
            .collect();

        Ok(LlmResponse {
            content: message.content.unwrap_or_default(),
            tool_calls,
            usage: TokenUsage {
                input_tokens: parsed.usage.prompt_tokens,
                output_tokens: parsed.usage.completion_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_turns() -> Vec<ChatTurn> {
        vec![
            ChatTurn::user("list the workspace"),
            ChatTurn::assistant_with_calls(
                "",
                vec![ToolCallRequest {
                    id: "call_1".into(),
                    name: "list_directory".into(),
                    arguments: json!({"path": "."}),
                }],
            ),
            ChatTurn::tool_result("call_1", "README.md\nsrc/"),
            ChatTurn::tool_result("call_2", "extra"),
        ]
    }

    #[test]
    fn anthropic_encoding_merges_consecutive_tool_results() {
        let messages = AnthropicClient::encode(&sample_turns());
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert!(matches!(
            messages[1].content[0],
            AnthropicBlock::ToolUse { .. }
        ));
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content.len(), 2);
        assert!(matches!(
            messages[2].content[0],
            AnthropicBlock::ToolResult { .. }
        ));
    }

    #[test]
    fn anthropic_assistant_text_precedes_tool_use() {
        let turns = vec![ChatTurn::assistant_with_calls(
            "Let me check.",
            vec![ToolCallRequest {
                id: "c".into(),
                name: "web_fetch".into(),
                arguments: json!({"url": "https://example.com"}),
            }],
        )];
        let messages = AnthropicClient::encode(&turns);
        assert_eq!(messages[0].content.len(), 2);
        assert!(matches!(messages[0].content[0], AnthropicBlock::Text { .. }));
        assert!(matches!(
            messages[0].content[1],
            AnthropicBlock::ToolUse { .. }
        ));
    }

    #[test]
    fn openai_encoding_carries_tool_ids_and_json_arguments() {
        let messages = OpenAiClient::encode("be brief", &sample_turns());
        assert_eq!(messages[0].role, "system");
        let assistant = &messages[2];
        assert_eq!(assistant.role, "assistant");
        assert!(assistant.content.is_none());
        assert_eq!(assistant.tool_calls[0].function.name, "list_directory");
        let args: Value =
            serde_json::from_str(&assistant.tool_calls[0].function.arguments).unwrap();
        assert_eq!(args["path"], ".");
        let tool = &messages[3];
        assert_eq!(tool.role, "tool");
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn openai_response_parses_function_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "run_shell", "arguments": "{\"command\": \"ls\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 18}
        });
        let parsed: OpenAiResponse = serde_json::from_value(raw).unwrap();
        let msg = parsed.choices.into_iter().next().unwrap().message;
        assert_eq!(msg.tool_calls[0].function.name, "run_shell");
        assert_eq!(parsed.usage.prompt_tokens, 120);
    }

    #[test]
    fn anthropic_response_blocks_deserialize() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "t1", "name": "read_file", "input": {"path": "a"}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4}
        });
        let parsed: AnthropicResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert_eq!(parsed.usage.output_tokens, 4);
    }
}
