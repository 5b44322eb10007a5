// Query lifecycle states and the per-query transition trace

use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Where a query is in its lifecycle.
///
/// ```text
/// Idle -> LexicalAndVectorDispatched -> Fused -> ContextBuilt
///      -> AwaitingGeneration -> Validated -> Done
/// ```
///
/// `Failed` is reachable from every non-terminal state. A query whose fused
/// set is empty goes straight from `Fused` (or `ContextBuilt`, when every fused
/// chunk was orphaned) to `Done` with the fallback answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Idle,
    LexicalAndVectorDispatched,
    Fused,
    ContextBuilt,
    AwaitingGeneration,
    Validated,
    Done,
    Failed,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Done | QueryState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: QueryState) -> bool {
        use QueryState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Idle, LexicalAndVectorDispatched)
            | (LexicalAndVectorDispatched, Fused)
            | (Fused, ContextBuilt)
            | (Fused, Done)
            | (ContextBuilt, AwaitingGeneration)
            | (ContextBuilt, Done)
            | (AwaitingGeneration, Validated)
            | (Validated, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryState::Idle => "idle",
            QueryState::LexicalAndVectorDispatched => "lexical_and_vector_dispatched",
            QueryState::Fused => "fused",
            QueryState::ContextBuilt => "context_built",
            QueryState::AwaitingGeneration => "awaiting_generation",
            QueryState::Validated => "validated",
            QueryState::Done => "done",
            QueryState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Ordered record of the states one query passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StateTrace {
    states: Vec<QueryState>,
}

impl StateTrace {
    /// Starts a trace in `Idle`.
    pub fn new() -> Self {
        Self {
            states: vec![QueryState::Idle],
        }
    }

    pub fn current(&self) -> QueryState {
        self.states.last().copied().unwrap_or(QueryState::Idle)
    }

    /// Records a transition.
    pub fn advance(&mut self, next: QueryState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal query transition {} -> {}",
            self.current(),
            next
        );
        debug!("Query state {} -> {}", self.current(), next);
        self.states.push(next);
    }

    /// Records the move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.advance(QueryState::Failed);
        }
    }

    pub fn states(&self) -> &[QueryState] {
        &self.states
    }
}

impl Default for StateTrace {
    fn default() -> Self {
        Self::new()
    }
}
