//! Chat relay: stores every inbound message, decides whether it addresses the
//! assistant, and when it does produces and persists a grounded reply.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::db::Database;
use crate::keypool::KeyPool;
use crate::llm::{Oracle, OracleError};

/// Marker that directs a message at the assistant.
pub const MARKER: &str = "@ai";
/// Rooms with this id prefix treat every message as addressed to the assistant.
pub const ASSISTANT_ROOM_PREFIX: &str = "AI-";
/// Sender recorded on assistant messages.
pub const ASSISTANT_SENDER: &str = "AI";

const MATCH_COUNT: usize = 5;
const SIMILARITY_THRESHOLD: f32 = 0.1;
const HISTORY_LIMIT: usize = 11;
const CONTEXT_SEPARATOR: &str = "\n\n";

const PERSONA: &str = "\
You are Sparky, the friendly assistant of a student community. You help with \
course questions, campus life and study planning. Answer concisely, in the \
language the question was asked in, and lean on the provided notes when they \
are relevant. If the notes do not cover the question, say so instead of \
guessing.";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl RelayError {
    fn is_rate_limit(&self) -> bool {
        matches!(self, RelayError::Oracle(err) if err.is_rate_limit())
    }
}

pub struct Relay {
    db: Arc<Database>,
    oracle: Arc<dyn Oracle>,
    keys: Arc<KeyPool>,
}

impl Relay {
    pub fn new(db: Arc<Database>, oracle: Arc<dyn Oracle>, keys: Arc<KeyPool>) -> Self {
        Self { db, oracle, keys }
    }

    /// Store the inbound message and, when it addresses the assistant, reply.
    /// The user's message is committed before anything downstream can fail; a
    /// downstream failure leaves an apology message in the room and
    /// propagates.
    pub async fn handle_message(
        &self,
        room_id: &str,
        text: &str,
        sender: &str,
    ) -> Result<(), RelayError> {
        self.db.add_message(room_id, sender, text, false)?;

        if !addresses_assistant(room_id, text) {
            return Ok(());
        }

        match self.answer(room_id, text).await {
            Ok(reply) => {
                self.db.add_message(room_id, ASSISTANT_SENDER, &reply, true)?;
                Ok(())
            }
            Err(err) => {
                let apology = if err.is_rate_limit() {
                    "I'm getting too many requests right now. Give me a minute and ask again."
                } else {
                    "Something went wrong on my side and I couldn't answer. Please try again."
                };
                if let Err(store_err) =
                    self.db.add_message(room_id, ASSISTANT_SENDER, apology, true)
                {
                    warn!(room = room_id, error = %store_err, "failed to store failure notice");
                }
                Err(err)
            }
        }
    }

    async fn answer(&self, room_id: &str, text: &str) -> Result<String, RelayError> {
        let query = strip_marker(text);
        let context = self.retrieve_context(&query).await;
        let history = self.render_history(room_id)?;
        let prompt = build_prompt(&context, &history, &query);

        let reply = self
            .keys
            .run(|key| {
                let oracle = Arc::clone(&self.oracle);
                let prompt = prompt.as_str();
                async move { oracle.generate(&key, prompt).await }
            })
            .await?;
        Ok(reply)
    }

    /// Best-effort RAG context; any failure degrades to an empty context.
    async fn retrieve_context(&self, query: &str) -> String {
        let embedding = match self
            .keys
            .run(|key| {
                let oracle = Arc::clone(&self.oracle);
                async move { oracle.embed(&key, query).await }
            })
            .await
        {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "query embedding failed, answering without context");
                return String::new();
            }
        };

        match self
            .db
            .match_documents(&embedding, SIMILARITY_THRESHOLD, MATCH_COUNT)
        {
            Ok(matches) => matches
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join(CONTEXT_SEPARATOR),
            Err(err) => {
                warn!(error = %err, "similarity search failed, answering without context");
                String::new()
            }
        }
    }

    /// Recent messages of the room, oldest first, one `sender: text` line per
    /// message with the marker stripped.
    fn render_history(&self, room_id: &str) -> Result<String, RelayError> {
        let mut messages = self.db.recent_messages(room_id, HISTORY_LIMIT)?;
        messages.reverse();
        let lines: Vec<String> = messages
            .iter()
            .map(|m| {
                let label = if m.is_ai {
                    ASSISTANT_SENDER
                } else {
                    m.sender.as_str()
                };
                format!("{}: {}", label, strip_marker(&m.text))
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// A message addresses the assistant when it contains the marker (any case)
/// or was sent in a dedicated assistant room. Substring and prefix tests, not
/// a parser.
pub fn addresses_assistant(room_id: &str, text: &str) -> bool {
    room_id.starts_with(ASSISTANT_ROOM_PREFIX) || find_marker(text).is_some()
}

fn find_marker(text: &str) -> Option<usize> {
    text.as_bytes()
        .windows(MARKER.len())
        .position(|window| window.eq_ignore_ascii_case(MARKER.as_bytes()))
}

/// Remove every occurrence of the marker, ASCII case-insensitively, and trim.
pub fn strip_marker(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = find_marker(rest) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + MARKER.len()..];
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Assembly order matters to the oracle: persona, then retrieved notes, then
/// conversation, then the live question, then the answer cue.
fn build_prompt(context: &str, history: &str, query: &str) -> String {
    format!(
        "{PERSONA}\n\nNotes from uploaded course material:\n{context}\n\n\
         Recent conversation:\n{history}\n\nQuestion: {query}\n\nAnswer:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeOracle {
        prompts: Mutex<Vec<String>>,
        reply: &'static str,
        fail_with: Option<fn() -> OracleError>,
    }

    impl FakeOracle {
        fn replying(reply: &'static str) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                reply,
                fail_with: None,
            }
        }

        fn failing(err: fn() -> OracleError) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                reply: "",
                fail_with: Some(err),
            }
        }
    }

    #[async_trait]
    impl Oracle for FakeOracle {
        async fn embed(&self, _api_key: &str, _text: &str) -> Result<Vec<f32>, OracleError> {
            Ok(vec![1.0, 0.0])
        }

        async fn generate(&self, _api_key: &str, prompt: &str) -> Result<String, OracleError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.fail_with {
                Some(make_err) => Err(make_err()),
                None => Ok(self.reply.to_string()),
            }
        }
    }

    fn relay_with(
        dir: &tempfile::TempDir,
        oracle: Arc<FakeOracle>,
    ) -> (Relay, Arc<Database>) {
        let db = Arc::new(Database::new(&dir.path().join("test.db")).unwrap());
        let keys = Arc::new(KeyPool::new(vec!["key".into()]).unwrap());
        let dyn_oracle: Arc<dyn Oracle> = oracle;
        (Relay::new(Arc::clone(&db), dyn_oracle, keys), db)
    }

    #[test]
    fn marker_is_stripped_case_insensitively() {
        assert_eq!(strip_marker("@AI hello"), "hello");
        assert_eq!(strip_marker("hello @Ai there @ai"), "hello  there");
        assert_eq!(strip_marker("no marker here"), "no marker here");
    }

    #[test]
    fn addressing_by_marker_or_room_prefix() {
        assert!(addresses_assistant("ROOM01", "@ai what's up"));
        assert!(addresses_assistant("ROOM01", "hey @AI"));
        assert!(addresses_assistant("AI-HLP", "plain question"));
        assert!(!addresses_assistant("ROOM01", "plain chatter"));
    }

    #[test]
    fn prompt_sections_appear_in_contract_order() {
        let prompt = build_prompt("CTX", "alice: hi", "what now");
        let persona = prompt.find("Sparky").unwrap();
        let context = prompt.find("CTX").unwrap();
        let history = prompt.find("alice: hi").unwrap();
        let query = prompt.find("what now").unwrap();
        let cue = prompt.find("Answer:").unwrap();
        assert!(persona < context && context < history && history < query && query < cue);
    }

    #[tokio::test]
    async fn unaddressed_message_is_stored_without_reply() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FakeOracle::replying("unused"));
        let (relay, db) = relay_with(&dir, Arc::clone(&oracle));
        db.create_room("ROOM01", "bob").unwrap();

        relay.handle_message("ROOM01", "hello all", "bob").await.unwrap();

        let messages = db.room_messages("ROOM01").unwrap();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_ai);
        assert!(oracle.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn addressed_message_gets_exactly_one_reply() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FakeOracle::replying("Hi! How can I help?"));
        let (relay, db) = relay_with(&dir, Arc::clone(&oracle));
        db.create_room("ROOM01", "alice").unwrap();

        relay
            .handle_message("ROOM01", "@AI hello", "alice")
            .await
            .unwrap();

        let messages = db.room_messages("ROOM01").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "@AI hello");
        assert!(messages[1].is_ai);
        assert_eq!(messages[1].sender, ASSISTANT_SENDER);
        assert_eq!(messages[1].text, "Hi! How can I help?");

        // Fresh room, no documents: empty context, history holds only the
        // just-stored user message with the marker stripped.
        let prompts = oracle.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("alice: hello"));
        assert!(prompts[0].contains("Notes from uploaded course material:\n\n"));
    }

    #[tokio::test]
    async fn history_is_rendered_chronologically_with_labels() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FakeOracle::replying("ok"));
        let (relay, db) = relay_with(&dir, oracle);
        db.create_room("ROOM01", "alice").unwrap();
        db.add_message("ROOM01", "alice", "@ai first", false).unwrap();
        db.add_message("ROOM01", "AI", "second", true).unwrap();
        db.add_message("ROOM01", "bob", "third", false).unwrap();

        let history = relay.render_history("ROOM01").unwrap();
        assert_eq!(history, "alice: first\nAI: second\nbob: third");
    }

    #[tokio::test(start_paused = true)]
    async fn generation_failure_stores_an_apology_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FakeOracle::failing(|| OracleError::Api {
            status: 500,
            message: "boom".into(),
        }));
        let (relay, db) = relay_with(&dir, oracle);
        db.create_room("ROOM01", "alice").unwrap();

        let result = relay.handle_message("ROOM01", "@ai help", "alice").await;
        assert!(result.is_err());

        let messages = db.room_messages("ROOM01").unwrap();
        assert_eq!(messages.len(), 2);
        assert!(!messages[0].is_ai);
        assert!(messages[1].is_ai);
        assert!(messages[1].text.contains("Something went wrong"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_failure_gets_the_rate_limit_apology() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FakeOracle::failing(|| OracleError::RateLimited("quota".into())));
        let (relay, db) = relay_with(&dir, oracle);
        db.create_room("ROOM01", "alice").unwrap();

        // The pool retries until exhaustion; the apology still names the rate
        // limit because the final error carries it.
        let result = relay.handle_message("ROOM01", "@ai help", "alice").await;
        assert!(result.is_err());

        let messages = db.room_messages("ROOM01").unwrap();
        assert!(messages[1].text.contains("too many requests"));
    }
}
