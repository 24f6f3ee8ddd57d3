//! OpenAI 批处理 API 客户端
//!
//! 封装所有与 Batch API 相关的 HTTP 调用：
//! 1. `POST /files` 上传 JSONL 请求文件（purpose = batch）
//! 2. `POST /batches` 创建批次
//! 3. `GET /batches/{id}` 查询状态
//! 4. `GET /files/{id}/content` 下载结果 / 错误文件

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clients::batch_client::{custom_id, key_for_custom_id, BatchAdapter, PollStatus};
use crate::config::Config;
use crate::error::AdapterError;
use crate::models::{BatchHandle, Outcome, PairRequest, WorkItemKey};

const CHAT_COMPLETIONS_ENDPOINT: &str = "/v1/chat/completions";
const HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    data: Vec<LineError>,
}

#[derive(Debug, Deserialize)]
struct OutputLine {
    custom_id: String,
    #[serde(default)]
    response: Option<OutputResponse>,
    #[serde(default)]
    error: Option<LineError>,
}

#[derive(Debug, Deserialize)]
struct OutputResponse {
    status_code: u16,
    #[serde(default)]
    body: Value,
}

#[derive(Debug, Deserialize)]
struct LineError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl LineError {
    fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(code), None) => code.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

/// 服务端批次状态的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchPhase {
    Running,
    /// 已结束，结果文件可下载（completed / expired / cancelled）
    Ended,
    Failed,
}

fn classify_status(status: &str) -> Option<BatchPhase> {
    match status {
        "validating" | "in_progress" | "finalizing" | "cancelling" => Some(BatchPhase::Running),
        "completed" | "expired" | "cancelled" => Some(BatchPhase::Ended),
        "failed" => Some(BatchPhase::Failed),
        _ => None,
    }
}

/// OpenAI 批处理客户端
pub struct OpenAiBatchClient {
    http: reqwest::Client,
    api_key: String,
    api_base_url: String,
    completion_window: String,
    task_id: Option<String>,
    output_folder: String,
}

impl OpenAiBatchClient {
    /// 创建新的批处理客户端
    pub fn new(config: &Config, output_folder: impl Into<String>) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| AdapterError::transport("client", e))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            completion_window: config.completion_window.clone(),
            task_id: config.task_id.clone(),
            output_folder: output_folder.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    /// 检查 HTTP 状态码，非 2xx 时带上响应正文返回错误
    async fn check(
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AdapterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AdapterError::bad_response(
            endpoint,
            format!("HTTP {}: {}", status, body),
        ))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AdapterError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AdapterError::transport(path, e))?;
        Self::check(path, response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AdapterError::transport(path, e))
    }

    async fn get_text(&self, path: &str) -> Result<String, AdapterError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AdapterError::transport(path, e))?;
        Self::check(path, response)
            .await?
            .text()
            .await
            .map_err(|e| AdapterError::transport(path, e))
    }

    async fn upload_input(&self, jsonl: String) -> Result<String, AdapterError> {
        let endpoint = "/files";
        let part = Part::bytes(jsonl.into_bytes())
            .file_name("batch_input.jsonl")
            .mime_str("application/jsonl")
            .map_err(|e| AdapterError::transport(endpoint, e))?;
        let form = Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .http
            .post(self.url(endpoint))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AdapterError::transport(endpoint, e))?;

        let file: FileObject = Self::check(endpoint, response)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::transport(endpoint, e))?;
        Ok(file.id)
    }

    async fn create_batch(&self, input_file_id: &str) -> Result<BatchObject, AdapterError> {
        let endpoint = "/batches";

        let mut metadata = Map::new();
        metadata.insert("output_folder".to_string(), json!(self.output_folder));
        if let Some(task_id) = &self.task_id {
            metadata.insert("task_id".to_string(), json!(task_id));
        }

        let body = json!({
            "input_file_id": input_file_id,
            "endpoint": CHAT_COMPLETIONS_ENDPOINT,
            "completion_window": self.completion_window,
            "metadata": metadata,
        });

        let response = self
            .http
            .post(self.url(endpoint))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::transport(endpoint, e))?;

        Self::check(endpoint, response)
            .await?
            .json()
            .await
            .map_err(|e| AdapterError::transport(endpoint, e))
    }
}

#[async_trait]
impl BatchAdapter for OpenAiBatchClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn submit(&self, requests: &[PairRequest]) -> Result<BatchHandle, AdapterError> {
        if requests.is_empty() {
            return Err(AdapterError::EmptyBatch);
        }

        let jsonl = build_input_jsonl(requests)?;
        debug!("批次输入文件大小: {} 字节", jsonl.len());

        let input_file_id = self.upload_input(jsonl).await?;
        info!("📤 输入文件已上传: {}", input_file_id);

        let batch = self.create_batch(&input_file_id).await?;
        info!("✓ 批次已创建: {} (状态: {})", batch.id, batch.status);

        let keys = requests.iter().map(|r| r.key.clone()).collect();
        let mut handle = BatchHandle::new(batch.id, keys);
        handle.input_file_id = Some(input_file_id);
        handle.task_id = self.task_id.clone();
        Ok(handle)
    }

    async fn poll(&self, handle: &BatchHandle) -> Result<PollStatus, AdapterError> {
        let path = format!("/batches/{}", handle.batch_id);
        let batch: BatchObject = self.get_json(&path).await?;
        debug!("批次 {} 状态: {}", batch.id, batch.status);

        match classify_status(&batch.status) {
            Some(BatchPhase::Running) => Ok(PollStatus::StillRunning {
                status: batch.status,
            }),
            Some(BatchPhase::Failed) => {
                let reason = batch
                    .errors
                    .map(|errors| {
                        errors
                            .data
                            .iter()
                            .map(LineError::describe)
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "failed".to_string());
                Err(AdapterError::BatchFailed {
                    batch_id: handle.batch_id.clone(),
                    reason,
                })
            }
            Some(BatchPhase::Ended) => {
                if batch.status != "completed" {
                    warn!(
                        "⚠️ 批次 {} 以 {} 状态结束，未完成的请求将记为失败",
                        handle.batch_id, batch.status
                    );
                }

                let mut outcomes = Vec::new();
                for file_id in [&batch.output_file_id, &batch.error_file_id]
                    .into_iter()
                    .flatten()
                {
                    let content = self.get_text(&format!("/files/{file_id}/content")).await?;
                    outcomes.extend(parse_output_lines(&content, handle));
                }
                Ok(PollStatus::Finished(outcomes))
            }
            None => Err(AdapterError::bad_response(
                path,
                format!("未知的批次状态: {}", batch.status),
            )),
        }
    }
}

/// 构建批次输入文件（每行一个请求）
fn build_input_jsonl(requests: &[PairRequest]) -> Result<String, AdapterError> {
    let mut jsonl = String::new();
    for (index, request) in requests.iter().enumerate() {
        let line = json!({
            "custom_id": custom_id(index),
            "method": "POST",
            "url": CHAT_COMPLETIONS_ENDPOINT,
            "body": request.body,
        });
        let line = serde_json::to_string(&line).map_err(|e| AdapterError::RequestBuild {
            key: request.key.clone(),
            message: e.to_string(),
        })?;
        jsonl.push_str(&line);
        jsonl.push('\n');
    }
    Ok(jsonl)
}

/// 解析结果 / 错误文件
///
/// 无法解析或无法对应到工作项的行会被跳过，相应工作项在合并时记为结果缺失。
fn parse_output_lines(content: &str, handle: &BatchHandle) -> Vec<(WorkItemKey, Outcome)> {
    let mut outcomes = Vec::new();

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let parsed: OutputLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("无法解析结果行: {}", e);
                continue;
            }
        };

        let Some(key) = key_for_custom_id(handle, &parsed.custom_id) else {
            warn!("未知的 custom_id: {}", parsed.custom_id);
            continue;
        };

        outcomes.push((key.clone(), line_outcome(parsed)));
    }

    outcomes
}

fn line_outcome(line: OutputLine) -> Outcome {
    if let Some(error) = line.error {
        return Outcome::failure(error.describe());
    }

    let Some(response) = line.response else {
        return Outcome::failure("empty response");
    };

    if (200..300).contains(&response.status_code) {
        return match response.body["choices"][0]["message"]["content"].as_str() {
            Some(content) => Outcome::success(content.trim()),
            None => Outcome::failure("response has no message content"),
        };
    }

    match response.body["error"]["message"].as_str() {
        Some(message) => Outcome::failure(format!("HTTP {}: {}", response.status_code, message)),
        None => Outcome::failure(format!("HTTP {}", response.status_code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> BatchHandle {
        BatchHandle::new(
            "batch_abc",
            vec![
                WorkItemKey::new("M1", "Q1"),
                WorkItemKey::new("M1", "Q2"),
                WorkItemKey::new("M2", "Q1"),
                WorkItemKey::new("M2", "Q2"),
            ],
        )
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("in_progress"), Some(BatchPhase::Running));
        assert_eq!(classify_status("finalizing"), Some(BatchPhase::Running));
        assert_eq!(classify_status("completed"), Some(BatchPhase::Ended));
        assert_eq!(classify_status("expired"), Some(BatchPhase::Ended));
        assert_eq!(classify_status("failed"), Some(BatchPhase::Failed));
        assert_eq!(classify_status("weird"), None);
    }

    #[test]
    fn test_build_input_jsonl() {
        let requests = vec![
            PairRequest {
                key: WorkItemKey::new("M1", "Q1"),
                body: json!({"model": "gpt-4o"}),
            },
            PairRequest {
                key: WorkItemKey::new("M1", "Q2"),
                body: json!({"model": "gpt-4o"}),
            },
        ];

        let jsonl = build_input_jsonl(&requests).unwrap();
        let lines: Vec<Value> = jsonl
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["custom_id"], "req-1");
        assert_eq!(lines[1]["url"], CHAT_COMPLETIONS_ENDPOINT);
        assert_eq!(lines[0]["body"]["model"], "gpt-4o");
    }

    #[test]
    fn test_parse_output_lines() {
        let content = r#"
{"id": "r1", "custom_id": "req-0", "response": {"status_code": 200, "body": {"choices": [{"message": {"role": "assistant", "content": " yes "}}]}}, "error": null}
{"id": "r2", "custom_id": "req-1", "response": null, "error": {"code": "timeout", "message": "request timed out"}}
{"id": "r3", "custom_id": "req-2", "response": {"status_code": 429, "body": {"error": {"message": "rate limited"}}}, "error": null}
not json
{"id": "r9", "custom_id": "req-99", "response": null, "error": null}
"#;

        let outcomes = parse_output_lines(content, &handle());

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], (WorkItemKey::new("M1", "Q1"), Outcome::success("yes")));
        assert_eq!(
            outcomes[1],
            (
                WorkItemKey::new("M1", "Q2"),
                Outcome::failure("timeout: request timed out")
            )
        );
        assert_eq!(
            outcomes[2],
            (
                WorkItemKey::new("M2", "Q1"),
                Outcome::failure("HTTP 429: rate limited")
            )
        );
    }
}
