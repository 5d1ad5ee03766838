//! 单轮过程事件：供前端流式展示阶段变化、工具调用、观察与回答片段

use serde::Serialize;

/// 单轮状态机的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Deciding,
    ToolDispatch,
    Finalizing,
    Done,
}

/// 过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Phase { phase: TurnPhase },
    /// 调用工具（query 为实际使用的查询，检索时是改写后的）
    ToolCall { tool: String, query: String },
    /// 工具返回概要
    Observation { tool: String, preview: String },
    /// 工具失败（作为数据交给 finalize）
    ToolFailure { tool: String, reason: String },
    /// 回答的一小段（流式）
    MessageChunk { text: String },
    MessageDone,
    Error { text: String },
}
