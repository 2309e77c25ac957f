//! Types for DeepFellow API requests and responses.

use serde::{Deserialize, Serialize};

/// A single page returned by the OCR endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPage {
    pub page_number: u32,
    pub text: String,
}

/// Response from the OCR endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResponse {
    #[serde(default)]
    pub pages: Vec<OcrPage>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Response from the vision endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionResponse {
    pub content: String,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub structural_notes: Option<String>,
}

/// Request body for the responses endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ResponsesRequest {
    /// Create a new request.
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            instructions: None,
            temperature: None,
        }
    }

    /// Set the system instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// One content part of a response output item.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// One output item of a response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseOutput {
    #[serde(default)]
    pub content: Vec<ResponseContent>,
}

/// Response from the responses endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesResponse {
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub output: Vec<ResponseOutput>,
}

impl ResponsesResponse {
    /// Text of the response: `output_text` when present, otherwise every
    /// `output_text` content part concatenated.
    pub fn text(&self) -> String {
        if let Some(text) = &self.output_text {
            return text.clone();
        }
        self.output
            .iter()
            .flat_map(|o| o.content.iter())
            .filter(|c| c.kind.is_empty() || c.kind == "output_text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Request body for adding a document to a RAG collection.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDocumentRequest<'a> {
    pub id: &'a str,
    pub content: &'a str,
    pub metadata: &'a serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responses_text_prefers_output_text() {
        let response: ResponsesResponse = serde_json::from_str(
            r#"{"output_text": "direct", "output": [{"content": [{"type": "output_text", "text": "nested"}]}]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "direct");
    }

    #[test]
    fn test_responses_text_from_output_items() {
        let response: ResponsesResponse = serde_json::from_str(
            r#"{"output": [
                {"type": "reasoning", "content": [{"type": "reasoning_text", "text": "thinking"}]},
                {"type": "message", "content": [{"type": "output_text", "text": "{\"a\":"}, {"type": "output_text", "text": "1}"}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "{\"a\":1}");
    }

    #[test]
    fn test_request_builder_skips_empty_fields() {
        let request = ResponsesRequest::new("deepseek-r1", "hello");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "deepseek-r1");
        assert!(json.get("instructions").is_none());

        let request = request.with_instructions("be terse").with_temperature(0.1);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["instructions"], "be terse");
    }

    #[test]
    fn test_ocr_response_defaults() {
        let response: OcrResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert!(response.pages.is_empty());
        assert!(response.confidence.is_none());
    }
}
