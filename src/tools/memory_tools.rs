use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{req_str, ToolCategory, ToolContext, ToolHandler, ToolRegistry};
use crate::core::errors::AgentError;

pub fn register(reg: &mut ToolRegistry) {
    reg.register(
        ToolCategory::Memory,
        "remember",
        "Store a fact in long-term memory under a topic.",
        json!({
            "type": "object",
            "properties": {
                "topic": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["topic", "content"]
        }),
        Arc::new(Remember),
    );
    reg.register(
        ToolCategory::Memory,
        "recall",
        "Keyword-search long-term memory.",
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"]
        }),
        Arc::new(Recall),
    );
}

struct Remember;

#[async_trait]
impl ToolHandler for Remember {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let topic = req_str(&args, "topic")?;
        let content = req_str(&args, "content")?;
        let name = ctx
            .memory
            .remember(topic, content)
            .await
            .map_err(|e| AgentError::transport(e.to_string()))?;
        Ok(format!("remembered as '{}'", name))
    }
}

struct Recall;

#[async_trait]
impl ToolHandler for Recall {
    async fn run(&self, ctx: &ToolContext, args: Value) -> Result<String, AgentError> {
        let query = req_str(&args, "query")?;
        let hits = ctx
            .memory
            .recall(query)
            .await
            .map_err(|e| AgentError::transport(e.to_string()))?;
        if hits.is_empty() {
            return Ok("no matching memories".to_string());
        }
        let mut out = String::new();
        for hit in hits {
            out.push_str(&format!("## {}\n{}\n\n", hit.name, hit.content.trim()));
        }
        Ok(out)
    }
}
