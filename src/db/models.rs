use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Room {
    pub id: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender: String,
    pub text: String,
    pub is_ai: bool,
    pub created_at: String,
}

/// One similarity-search hit.
#[derive(Debug, Clone)]
pub struct MatchedChunk {
    pub content: String,
    pub similarity: f32,
}
