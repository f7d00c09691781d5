//! Parsing a chat export (`conversations.json`) into flat text segments.
//!
//! An export is a JSON array of conversations. Each conversation has an `id` and a
//! `mapping` of node id to node; a node may carry a message whose content is text.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

/// One extracted text unit: the first text part of one node of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub conversation_id: String,
    /// Node id within the conversation's mapping.
    pub segment_id: String,
    pub text: String,
}

/// A conversation from the export, with its mapping in file order.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub mapping: Vec<(String, Node)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Content {
    pub content_type: String,
    /// Non-text content types may hold objects here, so parts stay untyped until used.
    #[serde(default)]
    pub parts: Vec<Value>,
}

impl Node {
    /// First text part of the node, if the node holds a non-empty text message.
    pub fn first_text(&self) -> Option<&str> {
        let content = self.message.as_ref()?.content.as_ref()?;
        if content.content_type != "text" {
            return None;
        }
        content
            .parts
            .first()
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Deserialize)]
struct RawConversation {
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    mapping: Option<Map<String, Value>>,
}

/// Read and parse an export file.
pub fn read_export(path: &Path) -> Result<Vec<Conversation>, ParseError> {
    let s = std::fs::read_to_string(path).map_err(|e| ParseError::Read(path.to_path_buf(), e))?;
    parse_export(&s)
}

/// Parse export JSON. Fails on the first malformed conversation or node rather than
/// returning a partial result.
pub fn parse_export(json: &str) -> Result<Vec<Conversation>, ParseError> {
    let entries: Vec<Value> = serde_json::from_str(json)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| parse_conversation(index, entry))
        .collect()
}

fn parse_conversation(index: usize, entry: Value) -> Result<Conversation, ParseError> {
    let bad = |reason: String| ParseError::Conversation { index, reason };
    let raw: RawConversation = serde_json::from_value(entry).map_err(|e| bad(e.to_string()))?;
    let id = raw.id.ok_or_else(|| bad("missing field `id`".into()))?;
    let raw_mapping = raw.mapping.ok_or_else(|| bad("missing field `mapping`".into()))?;

    let mut mapping = Vec::with_capacity(raw_mapping.len());
    for (node_id, value) in raw_mapping {
        let node: Node = serde_json::from_value(value).map_err(|e| ParseError::Node {
            conversation_id: id.clone(),
            node_id: node_id.clone(),
            reason: e.to_string(),
        })?;
        mapping.push((node_id, node));
    }
    Ok(Conversation {
        id,
        title: raw.title,
        mapping,
    })
}

/// Flatten conversations into segments, one per node with non-empty text.
/// Only the first text part of a node is kept; later parts are dropped.
/// Order follows the export: conversations first, then mapping entries.
pub fn extract_segments(conversations: &[Conversation]) -> Vec<Segment> {
    conversations
        .iter()
        .flat_map(|conv| {
            conv.mapping.iter().filter_map(move |(node_id, node)| {
                node.first_text().map(|text| Segment {
                    conversation_id: conv.id.clone(),
                    segment_id: node_id.clone(),
                    text: text.to_string(),
                })
            })
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read export {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("export is not a JSON array of conversations: {0}")]
    Json(#[from] serde_json::Error),
    #[error("conversation #{index} is malformed: {reason}")]
    Conversation { index: usize, reason: String },
    #[error("node {node_id} in conversation {conversation_id} is malformed: {reason}")]
    Node {
        conversation_id: String,
        node_id: String,
        reason: String,
    },
}
