//! 历史归一化：三角色 Turn → 两角色（human / model）线格式
//!
//! User → Human，Assistant → Model，ToolResult → Human（协议没有第三种角色）。
//! 结构化内容（工具调用声明、工具结果）一律序列化为规范 JSON 文本，线上只出现 text part。

use serde::{Deserialize, Serialize};

use crate::memory::{Turn, TurnContent, TurnRole};

/// 补全协议的两种角色；序列化为 "user" / "model"
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireRole {
    #[serde(rename = "user")]
    Human,
    #[serde(rename = "model")]
    Model,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePart {
    pub text: String,
}

/// 线格式的一条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTurn {
    pub role: WireRole,
    pub parts: Vec<WirePart>,
}

impl WireTurn {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            role: WireRole::Human,
            parts: vec![WirePart { text: text.into() }],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: WireRole::Model,
            parts: vec![WirePart { text: text.into() }],
        }
    }

    /// 所有 part 拼接后的文本
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 可归一化为线格式的历史元素
pub trait ToWire {
    fn to_wire(&self) -> WireTurn;
}

impl ToWire for Turn {
    fn to_wire(&self) -> WireTurn {
        let role = match self.role {
            TurnRole::User | TurnRole::ToolResult => WireRole::Human,
            TurnRole::Assistant => WireRole::Model,
        };
        let text = match &self.content {
            TurnContent::Text(t) => t.clone(),
            TurnContent::ToolCall(call) => call.to_declaration(),
            TurnContent::ToolResult(result) => result.to_text(),
        };
        WireTurn {
            role,
            parts: vec![WirePart { text }],
        }
    }
}

impl ToWire for WireTurn {
    fn to_wire(&self) -> WireTurn {
        self.clone()
    }
}

/// 归一化历史（纯函数、幂等）
pub fn normalize_history<T: ToWire>(turns: &[T]) -> Vec<WireTurn> {
    turns.iter().map(ToWire::to_wire).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{DocumentHit, DocumentHits, ToolCall, ToolResult};

    fn sample() -> Vec<Turn> {
        vec![
            Turn::user("Summarize the onboarding doc"),
            Turn::tool_call(ToolCall::RetrieveDocuments {
                query: "onboarding".into(),
                namespace: None,
            }),
            Turn::tool_result(ToolResult::DocumentHits(DocumentHits {
                query: "onboarding".into(),
                hits: vec![DocumentHit {
                    text: "Day one: laptop setup".into(),
                    source_name: "onboarding.pdf".into(),
                    source_id: "s1".into(),
                    chunk_index: 0,
                }],
            })),
            Turn::assistant("Day one is laptop setup. [Source: onboarding.pdf]"),
        ]
    }

    #[test]
    fn test_role_mapping() {
        let wire = normalize_history(&sample());
        let roles: Vec<WireRole> = wire.iter().map(|w| w.role).collect();
        assert_eq!(
            roles,
            vec![WireRole::Human, WireRole::Model, WireRole::Human, WireRole::Model]
        );
    }

    #[test]
    fn test_structured_parts_become_json_text() {
        let wire = normalize_history(&sample());
        let decl: serde_json::Value = serde_json::from_str(&wire[1].text()).unwrap();
        assert_eq!(decl["name"], "retrieve_documents");
        assert_eq!(decl["args"]["query"], "onboarding");
        let result: serde_json::Value = serde_json::from_str(&wire[2].text()).unwrap();
        assert_eq!(result["kind"], "document_hits");
        assert!(wire.iter().all(|w| w.parts.len() == 1));
    }

    #[test]
    fn test_idempotent() {
        let once = normalize_history(&sample());
        let twice = normalize_history(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_wire_role_serializes_as_protocol_names() {
        let v = serde_json::to_value(WireTurn::human("hi")).unwrap();
        assert_eq!(v["role"], "user");
        let v = serde_json::to_value(WireTurn::model("yo")).unwrap();
        assert_eq!(v["role"], "model");
    }
}
