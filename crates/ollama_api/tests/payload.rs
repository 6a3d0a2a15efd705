use ollama_api::{OllamaChatRequest, OllamaMessage, OllamaOptions, OllamaTool, OllamaToolCall};
use serde_json::json;

#[test]
fn minimal_request_omits_empty_tools_and_options() {
    let request = OllamaChatRequest::new("m1", vec![OllamaMessage::new("user", "hello")]);
    let value = serde_json::to_value(&request).expect("serialize request");

    assert_eq!(
        value,
        json!({
            "model": "m1",
            "messages": [{"role": "user", "content": "hello"}],
            "stream": true
        })
    );
}

#[test]
fn tool_catalog_and_options_use_wire_shape() {
    let request = OllamaChatRequest::new("m1", vec![OllamaMessage::new("user", "ls")])
        .with_tools(vec![OllamaTool::function(
            "list_files",
            "List a directory",
            json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        )])
        .with_options(OllamaOptions {
            temperature: Some(0.2),
            num_ctx: Some(8192),
            ..OllamaOptions::default()
        });
    let value = serde_json::to_value(&request).expect("serialize request");

    assert_eq!(value["tools"][0]["type"], "function");
    assert_eq!(value["tools"][0]["function"]["name"], "list_files");
    assert_eq!(value["options"], json!({"temperature": 0.2, "num_ctx": 8192}));
}

#[test]
fn assistant_tool_calls_and_tool_results_serialize() {
    let mut assistant = OllamaMessage::new("assistant", "");
    assistant
        .tool_calls
        .push(OllamaToolCall::new("read_file", json!({"path": "README.md"})));
    let mut result = OllamaMessage::new("tool", "# readme");
    result.tool_name = Some("read_file".to_owned());

    let messages = serde_json::to_value(vec![assistant, result]).expect("serialize");

    assert_eq!(
        messages[0]["tool_calls"],
        json!([{"function": {"name": "read_file", "arguments": {"path": "README.md"}}}])
    );
    assert_eq!(messages[1], json!({"role": "tool", "content": "# readme", "tool_name": "read_file"}));
}
