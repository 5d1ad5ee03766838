//! 认知层：查询改写、decide / finalize 规划、引用校验、单轮主循环与过程事件

pub mod citation;
pub mod events;
pub mod loop_;
pub mod planner;
pub mod prompts;
pub mod reformulate;

pub use citation::format_citation;
pub use events::{TurnEvent, TurnPhase};
pub use loop_::{AgentLoop, EventSender, TurnOutcome, TurnStream};
pub use planner::{DecideOutcome, Planner, NO_RESPONSE};
pub use reformulate::QueryReformulator;
