//! Chat session store: one JSON file per session under the chats directory.
//!
//! Flat CRUD keyed by id. Records that fail to parse are skipped when
//! listing rather than failing the whole call.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::{ChatCreate, ChatMessage, ChatSession, ChatSummary};

pub struct ChatStore {
    dir: PathBuf,
}

impl ChatStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create chats dir {}", self.dir.display()))
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Session ids are generated here; reject anything that could escape
    /// the store directory.
    fn valid_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// Create a new session, defaulting to a single welcome message.
    pub fn create(&self, payload: ChatCreate) -> Result<ChatSession> {
        let session = ChatSession {
            id: format!("chat-{}", Uuid::new_v4().simple()),
            title: payload.title.unwrap_or_else(|| "New chat".to_string()),
            messages: payload.messages.unwrap_or_else(|| vec![welcome_message()]),
            updated_at: None,
        };
        self.save(session)
    }

    /// All sessions, most recently updated first. Unreadable records are
    /// skipped.
    pub fn list(&self) -> Result<Vec<ChatSession>> {
        self.ensure_dir()?;
        let mut sessions: Vec<ChatSession> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<ChatSession>(&content) {
                Ok(session) if !session.id.is_empty() => sessions.push(session),
                _ => continue,
            }
        }
        sessions.sort_by(|a, b| b.updated_at.unwrap_or(0).cmp(&a.updated_at.unwrap_or(0)));
        Ok(sessions)
    }

    pub fn get(&self, id: &str) -> Result<Option<ChatSession>> {
        if !Self::valid_id(id) {
            return Ok(None);
        }
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read chat {}", path.display()))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Persist a session, assigning its update timestamp.
    pub fn save(&self, mut session: ChatSession) -> Result<ChatSession> {
        if !Self::valid_id(&session.id) {
            bail!("Chat must include a valid id");
        }
        self.ensure_dir()?;
        session.updated_at = Some(Utc::now().timestamp());
        let path = self.path_for(&session.id);
        std::fs::write(&path, serde_json::to_vec(&session)?)
            .with_context(|| format!("Failed to write chat {}", path.display()))?;
        Ok(session)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        if !Self::valid_id(id) {
            return Ok(false);
        }
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        Ok(true)
    }

    /// Brief view of a session for cross-referencing from other chats.
    pub fn summary(&self, id: &str) -> Result<Option<ChatSummary>> {
        let Some(session) = self.get(id)? else {
            return Ok(None);
        };
        let first_question = session
            .messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| m.content.chars().take(100).collect())
            .unwrap_or_default();
        Ok(Some(ChatSummary {
            id: session.id,
            title: session.title,
            first_question,
            message_count: session.messages.len(),
        }))
    }
}

fn welcome_message() -> ChatMessage {
    ChatMessage {
        id: Some(format!("welcome-{}", Utc::now().timestamp_millis())),
        role: "assistant".to_string(),
        content: "Hi! Ask me anything about the files in your data folder.".to_string(),
        sources: Some(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ChatStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = ChatStore::new(tmp.path().join("chats"));
        (tmp, store)
    }

    fn user_message(content: &str) -> ChatMessage {
        ChatMessage {
            id: None,
            role: "user".to_string(),
            content: content.to_string(),
            sources: None,
        }
    }

    #[test]
    fn create_defaults_to_welcome_message() {
        let (_tmp, store) = store();
        let session = store.create(ChatCreate::default()).unwrap();
        assert!(session.id.starts_with("chat-"));
        assert_eq!(session.title, "New chat");
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, "assistant");
        assert!(session.updated_at.is_some());
    }

    #[test]
    fn created_sessions_have_distinct_ids() {
        let (_tmp, store) = store();
        let a = store.create(ChatCreate::default()).unwrap();
        let b = store.create(ChatCreate::default()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn get_round_trips_and_missing_is_none() {
        let (_tmp, store) = store();
        let created = store
            .create(ChatCreate {
                title: Some("Project notes".to_string()),
                messages: Some(vec![user_message("what changed?")]),
            })
            .unwrap();

        let fetched = store.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Project notes");
        assert_eq!(fetched.messages.len(), 1);
        assert!(store.get("chat-doesnotexist").unwrap().is_none());
    }

    #[test]
    fn list_sorts_most_recent_first() {
        let (_tmp, store) = store();
        let older = store.create(ChatCreate::default()).unwrap();
        // updated_at has one-second resolution.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let newer = store.create(ChatCreate::default()).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[test]
    fn list_skips_unreadable_records() {
        let (_tmp, store) = store();
        store.create(ChatCreate::default()).unwrap();
        std::fs::write(store.dir.join("broken.json"), "{nope").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn delete_reports_whether_anything_was_removed() {
        let (_tmp, store) = store();
        let session = store.create(ChatCreate::default()).unwrap();
        assert!(store.delete(&session.id).unwrap());
        assert!(!store.delete(&session.id).unwrap());
        assert!(store.get(&session.id).unwrap().is_none());
    }

    #[test]
    fn save_rejects_invalid_ids() {
        let (_tmp, store) = store();
        let session = ChatSession {
            id: "../escape".to_string(),
            title: "t".to_string(),
            messages: vec![],
            updated_at: None,
        };
        assert!(store.save(session).is_err());
    }

    #[test]
    fn summary_reports_first_user_question() {
        let (_tmp, store) = store();
        let session = store
            .create(ChatCreate {
                title: Some("Research".to_string()),
                messages: Some(vec![
                    ChatMessage {
                        id: None,
                        role: "assistant".to_string(),
                        content: "Hello".to_string(),
                        sources: None,
                    },
                    user_message("what does the report say about latency?"),
                ]),
            })
            .unwrap();

        let summary = store.summary(&session.id).unwrap().unwrap();
        assert_eq!(summary.title, "Research");
        assert_eq!(summary.message_count, 2);
        assert!(summary.first_question.starts_with("what does the report"));
        assert!(store.summary("chat-missing").unwrap().is_none());
    }
}
