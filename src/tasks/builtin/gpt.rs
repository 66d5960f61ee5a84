use async_trait::async_trait;

use crate::command::ParsedCommand;
use crate::error::{LlmError, TaskError};
use crate::llm::{CompletionRequest, max_tokens_for};
use crate::mail::{IncomingMessage, OutgoingMessage};
use crate::tasks::builtin::subject;
use crate::tasks::task::{TaskContext, TaskHandler};

const TAG: &str = "GPT";
const USAGE: &str = "Usage: gpt <model:gpt-4> <temperature:0.7> <max_tokens:256> your question\n\
Settings: model, temperature, top_p, presence_penalty, frequency_penalty, max_tokens, n";

/// Build a completion request from the command's settings.
///
/// Settings that are unknown or do not parse are skipped and returned as
/// warnings for the reply.
fn build_request(
    cmd: &ParsedCommand,
    default_model: &str,
    prompt: String,
) -> (CompletionRequest, Vec<String>) {
    let mut request = CompletionRequest {
        model: default_model.to_string(),
        prompt,
        ..Default::default()
    };
    let mut warnings = Vec::new();

    for (key, value) in cmd.setting_pairs() {
        let float = || value.parse::<f64>().ok();
        let int = || value.parse::<u32>().ok();
        let applied = match key.as_str() {
            "model" => {
                if !value.is_empty() {
                    request.model = value.clone();
                }
                !value.is_empty()
            }
            "temperature" => float().map(|v| request.temperature = Some(v)).is_some(),
            "top_p" => float().map(|v| request.top_p = Some(v)).is_some(),
            "presence_penalty" => float().map(|v| request.presence_penalty = Some(v)).is_some(),
            "frequency_penalty" => float().map(|v| request.frequency_penalty = Some(v)).is_some(),
            "max_tokens" => int().map(|v| request.max_tokens = Some(v)).is_some(),
            "n" => int().map(|v| request.n = Some(v.max(1))).is_some(),
            _ => {
                warnings.push(format!("Unknown setting {key:?} ignored"));
                continue;
            }
        };
        if !applied {
            warnings.push(format!("Invalid value {value:?} for {key} ignored"));
        }
    }

    let cap = max_tokens_for(&request.model);
    if let Some(max) = request.max_tokens
        && max > cap
    {
        warnings.push(format!(
            "max_tokens {max} exceeds the {} limit, using {cap}",
            request.model
        ));
        request.max_tokens = Some(cap);
    }

    (request, warnings)
}

/// `gpt <settings> question`: ask the configured LLM.
pub struct GptTask;

#[async_trait]
impl TaskHandler for GptTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        let mut prompt = cmd.text_after_keyword();
        if prompt.is_empty() {
            prompt = cmd.args.join("\n");
        }
        if prompt.trim().is_empty() {
            return Ok(OutgoingMessage::reply_to(msg, subject(TAG, "Main Menu"), USAGE));
        }

        let llm = ctx.llm.ok_or_else(|| LlmError::MissingApiKey {
            provider: "openai".into(),
        })?;
        let (request, warnings) = build_request(cmd, llm.default_model(), prompt);
        for warning in &warnings {
            tracing::warn!(sender = %msg.sender(), "{warning}");
        }

        tracing::info!(model = %request.model, sender = %msg.sender(), "Querying LLM");
        let choices = llm.complete(&request).await?;

        let mut body = String::new();
        if !warnings.is_empty() {
            body.push_str("Warnings:\n");
            for w in &warnings {
                body.push_str(&format!("- {w}\n"));
            }
            body.push('\n');
        }
        if choices.len() == 1 {
            body.push_str(choices[0].trim());
        } else {
            for (i, choice) in choices.iter().enumerate() {
                body.push_str(&format!("--- Answer {} ---\n{}\n\n", i + 1, choice.trim()));
            }
        }

        Ok(OutgoingMessage::reply_to(
            msg,
            subject(TAG, "Request Complete"),
            body.trim_end().to_string(),
        ))
    }
}
