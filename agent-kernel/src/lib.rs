//! Planning, tool selection, and orchestration for the planning agent.
//!
//! A turn runs in three phases. The [`PlanParser`] asks the oracle for an
//! ordered [`Plan`]; the [`Orchestrator`] walks its steps, using the
//! [`ToolSelector`] to pick a tool and arguments for every `UseTool` step and
//! dispatching it when the choice clears [`CONFIDENCE_THRESHOLD`]; the first
//! terminal step produces the answer. Oracle and tool failures never abort a
//! turn: each call site resolves them to a fallback value.
//!
//! Writes of tool definitions go through [`ToolAdmission`], which runs the
//! security gate and structural validator from `agent-policy` before
//! persisting and invalidating the owner's cached registry.

#![warn(missing_docs, clippy::pedantic)]

pub mod admission;
pub mod agent;
mod error;
pub mod extract;
pub mod orchestrator;
pub mod phase;
pub mod plan;
pub mod render;
pub mod selection;

pub use admission::ToolAdmission;
pub use agent::{Agent, AgentBuilder};
pub use error::{KernelError, KernelResult};
pub use orchestrator::{CONFIDENCE_THRESHOLD, Orchestrator, TurnOutcome, dispatch_gate};
pub use phase::{PhaseError, Turn, TurnEvent, TurnPhase};
pub use plan::{Plan, PlanError, PlanParser, Step, StepAction};
pub use selection::{SelectionError, ToolCall, ToolSelector, frame_step};
