//! Docent - 检索增强的问答智能体编排
//!
//! 模块划分：
//! - **agent**: 无头运行时（按配置构建组件、会话内跑一轮并提交）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话与会话监管
//! - **llm**: 补全服务与嵌入抽象及实现（Gemini / OpenAI 兼容嵌入 / Mock）
//! - **memory**: 对话历史、历史归一化、分块入库、向量索引
//! - **observability**: 日志初始化
//! - **react**: 查询改写、decide / finalize、引用校验、单轮主循环
//! - **tools**: 工具调用与结果类型、检索与联网搜索适配器、执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::AgentRuntime;
pub use react::{AgentLoop, TurnOutcome, TurnStream};
