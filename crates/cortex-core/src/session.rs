//! Session, Message, Memory storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CortexError, CortexResult};
use crate::model::{Memory, MemoryMetadata, Message, MessageRole, Session, SessionStatus};
use crate::ports::{Completer, CompletionRequest, ResponseFormat};
use crate::store::SledStore;

/// Page size for the compression ritual's active-session sweep.
pub const SESSION_PAGE_SIZE: usize = 100;

pub struct SessionStore {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    sessions_table: String,
    messages_table: String,
    memories_table: String,
}

impl SessionStore {
    pub fn new(
        store: Arc<SledStore>,
        clock: Arc<dyn Clock>,
        sessions_table: impl Into<String>,
        messages_table: impl Into<String>,
        memories_table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            sessions_table: sessions_table.into(),
            messages_table: messages_table.into(),
            memories_table: memories_table.into(),
        }
    }

    pub fn create_session(&self) -> CortexResult<Session> {
        let session = Session::new(Uuid::new_v4(), self.clock.now());
        self.store.put(&self.sessions_table, &session.id.to_string(), &session)?;
        Ok(session)
    }

    pub fn get_session(&self, id: Uuid) -> CortexResult<Option<Session>> {
        self.store.get(&self.sessions_table, &id.to_string())
    }

    pub fn all_sessions(&self) -> CortexResult<Vec<Session>> {
        Ok(self.store.scan::<Session>(&self.sessions_table)?.into_iter().map(|(_, s)| s).collect())
    }

    fn touch_session(&self, id: Uuid) -> CortexResult<()> {
        let now = self.clock.now();
        self.store.update(&self.sessions_table, &id.to_string(), move |current: Option<Session>| {
            let Some(mut session) = current else { return Ok(None) };
            session.updated_at = now;
            Ok(Some(session))
        })?;
        Ok(())
    }

    #[tracing::instrument(skip(self, content, metadata), target = "cortex::session")]
    pub fn append_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: String,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> CortexResult<Message> {
        if self.get_session(session_id)?.is_none() {
            return Err(CortexError::not_found("Session", session_id.to_string()));
        }
        let message = Message {
            id: Uuid::new_v4(),
            session_id,
            role,
            content,
            created_at: self.clock.now(),
            metadata,
        };
        self.store.put(&self.messages_table, &message.id.to_string(), &message)?;
        self.touch_session(session_id)?;
        Ok(message)
    }

    /// All messages for `session_id`, oldest first.
    pub fn messages(&self, session_id: Uuid) -> CortexResult<Vec<Message>> {
        let mut rows: Vec<Message> = self
            .store
            .scan::<Message>(&self.messages_table)?
            .into_iter()
            .map(|(_, m)| m)
            .filter(|m| m.session_id == session_id)
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    #[tracing::instrument(skip(self, content, embedding, metadata), target = "cortex::session")]
    pub fn record_memory(
        &self,
        session_id: Uuid,
        entity: Option<String>,
        content: String,
        embedding: Option<Vec<f32>>,
        metadata: MemoryMetadata,
    ) -> CortexResult<Memory> {
        let memory = Memory {
            id: Uuid::new_v4(),
            session_id,
            entity,
            content,
            embedding,
            metadata,
            created_at: self.clock.now(),
        };
        self.store.put(&self.memories_table, &memory.id.to_string(), &memory)?;
        Ok(memory)
    }

    pub fn memories(&self, session_id: Uuid) -> CortexResult<Vec<Memory>> {
        Ok(self
            .store
            .scan::<Memory>(&self.memories_table)?
            .into_iter()
            .map(|(_, m)| m)
            .filter(|m| m.session_id == session_id)
            .collect())
    }

    /// Archives every session whose `updated_at` is older than `cutoff`.
    #[tracing::instrument(skip(self), target = "cortex::session")]
    pub fn archive_inactive(&self, cutoff: DateTime<Utc>) -> CortexResult<usize> {
        let mut archived = 0;
        for session in self.all_sessions()? {
            if session.status == SessionStatus::Active && session.updated_at < cutoff {
                self.store.update(&self.sessions_table, &session.id.to_string(), |current: Option<Session>| {
                    let Some(mut s) = current else { return Ok(None) };
                    s.status = SessionStatus::Archived;
                    Ok(Some(s))
                })?;
                archived += 1;
            }
        }
        tracing::info!(target: "cortex::session", archived, "archived inactive sessions");
        Ok(archived)
    }

    /// Deletes messages and memories whose `session_id` no longer resolves
    /// to a session row.
    #[tracing::instrument(skip(self), target = "cortex::session")]
    pub fn clean_orphans(&self) -> CortexResult<usize> {
        let known: std::collections::HashSet<Uuid> = self.all_sessions()?.into_iter().map(|s| s.id).collect();
        let mut cleaned = 0;
        for (id, message) in self.store.scan::<Message>(&self.messages_table)? {
            if !known.contains(&message.session_id) {
                self.store.delete(&self.messages_table, &id)?;
                cleaned += 1;
            }
        }
        for (id, memory) in self.store.scan::<Memory>(&self.memories_table)? {
            if !known.contains(&memory.session_id) {
                self.store.delete(&self.memories_table, &id)?;
                cleaned += 1;
            }
        }
        tracing::info!(target: "cortex::session", cleaned, "cleaned orphaned rows");
        Ok(cleaned)
    }

    /// Active sessions whose message count exceeds `context_window_size`,
    /// paged in groups of `SESSION_PAGE_SIZE`.
    pub fn sessions_needing_compression(&self, context_window_size: usize) -> CortexResult<Vec<Uuid>> {
        let mut due = Vec::new();
        for chunk in self
            .all_sessions()?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Active)
            .collect::<Vec<_>>()
            .chunks(SESSION_PAGE_SIZE)
        {
            for session in chunk {
                if self.messages(session.id)?.len() > context_window_size {
                    due.push(session.id);
                }
            }
        }
        Ok(due)
    }

    /// Collapses the oldest messages of `session_id` down to `target_size`,
    /// folding the removed ones into a single anchored `Memory` summary
    ///. With a `Completer` present,
    /// the summary is an LLM condensation; otherwise a deterministic
    /// concatenation keeps the ritual from silently losing history.
    #[tracing::instrument(skip(self, completer), target = "cortex::session")]
    pub async fn compress_session(
        &self,
        session_id: Uuid,
        target_size: usize,
        completer: Option<&dyn Completer>,
    ) -> CortexResult<Option<Memory>> {
        let messages = self.messages(session_id)?;
        if messages.len() <= target_size {
            return Ok(None);
        }
        let overflow = messages.len() - target_size;
        let to_fold = &messages[..overflow];

        let transcript: String = to_fold
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = match completer {
            Some(completer) => {
                let req = CompletionRequest {
                    prompt: format!(
                        "Summarize the following conversation transcript in a few sentences, \
                         preserving any facts, decisions, or open questions:\n\n{transcript}"
                    ),
                    response_format: ResponseFormat::Text,
                    temperature: None,
                    max_tokens: None,
                };
                match completer.complete(req).await {
                    Ok(resp) => resp.content,
                    Err(reason) => {
                        tracing::warn!(target: "cortex::session", reason, "compression summary fell back to raw transcript");
                        transcript
                    }
                }
            }
            None => transcript,
        };

        let memory = self.record_memory(
            session_id,
            None,
            summary,
            None,
            MemoryMetadata { anchor: true, extra: BTreeMap::new() },
        )?;

        for message in to_fold {
            self.store.delete(&self.messages_table, &message.id.to_string())?;
        }
        tracing::info!(target: "cortex::session", session_id = %session_id, folded = to_fold.len(), "compressed session");
        Ok(Some(memory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn store() -> SessionStore {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        SessionStore::new(store, clock, "agent_sessions", "agent_messages", "agent_memories")
    }

    #[test]
    fn append_message_requires_existing_session() {
        let store = store();
        let result = store.append_message(Uuid::new_v4(), MessageRole::User, "hi".into(), BTreeMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn archive_inactive_only_touches_stale_active_sessions() {
        let store = store();
        let session = store.create_session().unwrap();
        store.archive_inactive(store.clock.now() + chrono::Duration::days(1)).unwrap();
        let reloaded = store.get_session(session.id).unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::Archived);
    }

    #[test]
    fn clean_orphans_removes_messages_for_deleted_sessions() {
        let store = store();
        let session = store.create_session().unwrap();
        store.append_message(session.id, MessageRole::User, "hi".into(), BTreeMap::new()).unwrap();
        store.store.delete("agent_sessions", &session.id.to_string()).unwrap();
        let cleaned = store.clean_orphans().unwrap();
        assert_eq!(cleaned, 1);
    }

    #[tokio::test]
    async fn compress_session_folds_overflow_into_an_anchored_memory() {
        let store = store();
        let session = store.create_session().unwrap();
        for i in 0..5 {
            store
                .append_message(session.id, MessageRole::User, format!("msg {i}"), BTreeMap::new())
                .unwrap();
        }
        let memory = store.compress_session(session.id, 2, None).await.unwrap().unwrap();
        assert!(memory.metadata.anchor);
        assert_eq!(store.messages(session.id).unwrap().len(), 2);
    }

    #[test]
    fn sessions_needing_compression_reports_oversized_sessions() {
        let store = store();
        let session = store.create_session().unwrap();
        for i in 0..3 {
            store
                .append_message(session.id, MessageRole::User, format!("msg {i}"), BTreeMap::new())
                .unwrap();
        }
        let due = store.sessions_needing_compression(2).unwrap();
        assert_eq!(due, vec![session.id]);
    }
}
