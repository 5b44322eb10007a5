//! Per-session chat history.
//!
//! Turns are kept in arrival order per session id. The orchestrator records the
//! user turn before retrieval, replays the most recent turns to the generator,
//! and records the final answer.

use crate::error::RetrievalError;
use crate::generation::{ChatMessage, Role};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-process chat history keyed by session id.
#[derive(Debug, Default)]
pub struct SessionMemory {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> RetrievalError {
    RetrievalError::IndexUnavailable(format!("Session memory lock poisoned: {}", e))
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn to a session, creating it if needed.
    pub fn append(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), RetrievalError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(ChatMessage::new(role, content));
        Ok(())
    }

    /// Returns the last `limit` turns of a session, oldest first.
    pub fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, RetrievalError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .get(session_id)
            .map(|turns| {
                let start = turns.len().saturating_sub(limit);
                turns[start..].to_vec()
            })
            .unwrap_or_default())
    }

    /// Number of turns recorded for a session.
    pub fn len(&self, session_id: &str) -> Result<usize, RetrievalError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(session_id).map_or(0, Vec::len))
    }

    /// Drops a session's history.
    pub fn clear(&self, session_id: &str) -> Result<(), RetrievalError> {
        self.sessions.write().map_err(poisoned)?.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_returns_last_turns_in_order() {
        let memory = SessionMemory::new();
        for i in 0..5 {
            memory.append("s1", Role::User, format!("q{}", i)).unwrap();
            memory.append("s1", Role::Assistant, format!("a{}", i)).unwrap();
        }

        let recent = memory.recent("s1", 3).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a3", "q4", "a4"]);
        assert_eq!(memory.len("s1").unwrap(), 10);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let memory = SessionMemory::new();
        memory.append("a", Role::User, "hello").unwrap();
        assert!(memory.recent("b", 6).unwrap().is_empty());

        memory.clear("a").unwrap();
        assert_eq!(memory.len("a").unwrap(), 0);
    }

    #[test]
    fn test_zero_limit() {
        let memory = SessionMemory::new();
        memory.append("a", Role::User, "hello").unwrap();
        assert!(memory.recent("a", 0).unwrap().is_empty());
    }
}
