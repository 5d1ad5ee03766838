//! 工具参数 JSON Schema 生成（schemars 自动生成）
//!
//! decide 步骤向模型声明的两个工具：retrieve_documents / web_search。
//! 参数结构同时用于解析模型返回的 functionCall.args，保证声明与解析一致。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::llm::ToolSchema;
use crate::tools::ToolName;

/// retrieve_documents 的参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RetrieveDocumentsArgs {
    /// Search query describing what to look for in the workspace documents.
    pub query: String,
    /// Workspace namespace. Already bound to the session; any value given here is ignored.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// web_search 的参数
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// Search query for the live internet.
    pub query: String,
}

/// 将 schemars 生成的 RootSchema 收敛为 functionDeclarations 接受的 OpenAPI 子集
fn function_parameters<T: JsonSchema>() -> Value {
    let mut value = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| Value::Null);
    strip_unsupported(&mut value);
    value
}

/// 去掉 $schema / title / definitions，Option 字段的 ["string","null"] 改写为 string + nullable
fn strip_unsupported(value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };
    map.remove("$schema");
    map.remove("title");
    map.remove("definitions");
    map.remove("default");
    if let Some(Value::Array(types)) = map.get("type").cloned() {
        let concrete: Vec<&Value> = types.iter().filter(|t| t.as_str() != Some("null")).collect();
        if let Some(first) = concrete.first() {
            map.insert("type".into(), (*first).clone());
            if concrete.len() < types.len() {
                map.insert("nullable".into(), Value::Bool(true));
            }
        }
    }
    if let Some(Value::Object(props)) = map.get_mut("properties") {
        for prop in props.values_mut() {
            strip_unsupported(prop);
        }
    }
}

/// decide 步骤声明的工具 schema（固定两项）
pub fn decide_tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: ToolName::RetrieveDocuments.as_str().to_string(),
            description: "Search PDFs, notes, files and other documents inside the current workspace."
                .to_string(),
            parameters: function_parameters::<RetrieveDocumentsArgs>(),
        },
        ToolSchema {
            name: ToolName::WebSearch.as_str().to_string(),
            description: "Search the live internet for external information.".to_string(),
            parameters: function_parameters::<WebSearchArgs>(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_schemas_declare_both_tools() {
        let schemas = decide_tool_schemas();
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["retrieve_documents", "web_search"]);
    }

    #[test]
    fn test_query_is_required_and_schema_is_clean() {
        let schemas = decide_tool_schemas();
        let retrieve = &schemas[0].parameters;
        assert!(retrieve.get("$schema").is_none());
        assert!(retrieve.get("title").is_none());
        assert_eq!(retrieve["type"], "object");
        assert_eq!(retrieve["properties"]["query"]["type"], "string");
        assert_eq!(retrieve["properties"]["namespace"]["type"], "string");
        let required = retrieve["required"].as_array().cloned().unwrap_or_default();
        assert!(required.contains(&Value::String("query".into())));
        assert!(!required.contains(&Value::String("namespace".into())));
    }
}
