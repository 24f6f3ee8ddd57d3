//! 请求构建服务 - 业务能力层
//!
//! 只负责把一个（市镇, 问题）组合变成批处理服务需要的 chat completion 请求体，
//! 不关心批次、队列或提交流程。
//!
//! ## 技术栈
//! - 使用 `async-openai` 的请求类型构建消息，保证请求体与 OpenAI API 兼容

use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use tracing::debug;

use crate::config::Config;
use crate::error::{AdapterError, AppResult};
use crate::models::{Municipality, PairRequest, Question, SourceCatalog, WorkItemKey};

const SYSTEM_MESSAGE: &str = "You are a research assistant answering questions about \
local governments in the United States. Answer only from the provided context.";

/// 请求构建器
pub struct RequestBuilder {
    model_id: String,
    context_length: usize,
    max_tokens: u32,
    temperature: f32,
}

impl RequestBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            model_id: config.model_id.clone(),
            context_length: config.context_length,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// 为队列中的一个工作项构建请求
    ///
    /// # 参数
    /// - `catalog`: 市镇与问题的完整列表
    /// - `key`: 工作项主键
    ///
    /// # 返回
    /// 返回带 JSON 请求体的 [`PairRequest`]；市镇或问题不在列表中时返回数据源错误
    pub fn build_pair_request(
        &self,
        catalog: &SourceCatalog,
        key: &WorkItemKey,
    ) -> AppResult<PairRequest> {
        let municipality = catalog.municipality(&key.entity_id)?;
        let question = catalog.question(&key.question_id)?;
        let body = self.build_body(municipality, question).map_err(|message| {
            AdapterError::RequestBuild {
                key: key.clone(),
                message,
            }
        })?;

        Ok(PairRequest {
            key: key.clone(),
            body,
        })
    }

    fn build_body(
        &self,
        municipality: &Municipality,
        question: &Question,
    ) -> Result<serde_json::Value, String> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_MESSAGE)
            .build()
            .map_err(|e| e.to_string())?;

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(self.user_message(municipality, question))
            .build()
            .map_err(|e| e.to_string())?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_id)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| e.to_string())?;

        serde_json::to_value(&request).map_err(|e| e.to_string())
    }

    /// 用户消息：市镇名 + 最多 `context_length` 段上下文 + 问题
    fn user_message(&self, municipality: &Municipality, question: &Question) -> String {
        let passages: Vec<String> = municipality
            .context
            .iter()
            .take(self.context_length)
            .enumerate()
            .map(|(i, text)| format!("[{}] {}", i + 1, text.trim()))
            .collect();

        debug!(
            "构建请求: {} / {}，上下文 {} 段",
            municipality.id,
            question.id,
            passages.len()
        );

        let context = if passages.is_empty() {
            "(no context available)".to_string()
        } else {
            passages.join("\n")
        };

        format!(
            "Municipality: {}\n\nContext:\n{}\n\nQuestion: {}\n\n\
             Give a short, direct answer followed by a one-sentence justification. \
             If the context does not contain the answer, reply \"Not enough information\".",
            municipality.display_name(),
            context,
            question.text.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, SourceError};

    fn catalog() -> SourceCatalog {
        let mut abbeville = Municipality::new("M1", "Abbeville");
        abbeville.state = Some("AL".to_string());
        abbeville.context = vec![
            "first passage".to_string(),
            "second passage".to_string(),
            "third passage".to_string(),
        ];
        SourceCatalog::new(
            vec![abbeville],
            vec![Question::new("Q1", "Is there a zoning board?")],
        )
    }

    fn builder(context_length: usize) -> RequestBuilder {
        RequestBuilder::new(&Config {
            model_id: "gpt-4o-mini".to_string(),
            context_length,
            ..Config::default()
        })
    }

    #[test]
    fn test_build_pair_request_body() {
        let request = builder(2)
            .build_pair_request(&catalog(), &WorkItemKey::new("M1", "Q1"))
            .unwrap();

        assert_eq!(request.key, WorkItemKey::new("M1", "Q1"));
        assert_eq!(request.body["model"], "gpt-4o-mini");

        let messages = request.body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");

        let user = messages[1]["content"].as_str().unwrap();
        assert!(user.contains("Abbeville, AL"));
        assert!(user.contains("[2] second passage"));
        assert!(!user.contains("third passage"));
        assert!(user.contains("Is there a zoning board?"));
    }

    #[test]
    fn test_zero_context_length() {
        let request = builder(0)
            .build_pair_request(&catalog(), &WorkItemKey::new("M1", "Q1"))
            .unwrap();
        let user = request.body["messages"][1]["content"].as_str().unwrap();
        assert!(user.contains("(no context available)"));
    }

    #[test]
    fn test_unknown_question_is_source_error() {
        let err = builder(1)
            .build_pair_request(&catalog(), &WorkItemKey::new("M1", "Q9"))
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Source(SourceError::UnknownQuestion { .. })
        ));
    }
}
