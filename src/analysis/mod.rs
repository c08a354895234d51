pub mod decision;
pub mod llm;
pub mod queue;

pub use decision::{DecisionEngine, DecisionRequest, TradeAction, TradeDecision};
pub use llm::{LlmDecisionEngine, LlmSettings};
pub use queue::AnalysisQueue;
