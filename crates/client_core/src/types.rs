use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use shared::{
    domain::{ContentKind, DeliveryStatus, Direction, MessageId},
    protocol::{MessageDoc, SenderRole},
};
use uuid::Uuid;

/// Client-assigned identifier of a message that the store has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalMessageId(pub Uuid);

impl LocalMessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LocalMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// The one authoritative identifier of a transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageRef {
    Server(MessageId),
    Local(LocalMessageId),
}

impl MessageRef {
    pub fn as_local(&self) -> Option<LocalMessageId> {
        match self {
            Self::Local(id) => Some(*id),
            Self::Server(_) => None,
        }
    }

    pub fn as_server(&self) -> Option<&MessageId> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Local(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Media {
        location: String,
        file_name: Option<String>,
        caption: Option<String>,
    },
}

impl Payload {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Media { caption, .. } => caption.as_deref(),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::Media { file_name, .. } => file_name.as_deref(),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageRef,
    pub direction: Direction,
    pub kind: ContentKind,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub display_time: String,
    pub status: DeliveryStatus,
}

impl Message {
    pub fn from_doc(doc: MessageDoc) -> Self {
        let direction = match doc.sender {
            SenderRole::Agent => Direction::FromMe,
            SenderRole::Customer => Direction::FromThem,
        };
        let (kind, payload) = match doc.media {
            Some(media) => (
                media.kind,
                Payload::Media {
                    location: media.url,
                    file_name: media.file_name,
                    caption: media.caption.or(doc.text),
                },
            ),
            None => (ContentKind::Text, Payload::Text(doc.text.unwrap_or_default())),
        };

        Self {
            id: MessageRef::Server(doc.id),
            direction,
            kind,
            payload,
            display_time: format_display_time(doc.created_at),
            created_at: doc.created_at,
            status: doc.status,
        }
    }

    /// A `pending`, `from-me` entry shown before the store confirms the send.
    pub fn provisional(kind: ContentKind, payload: Payload, created_at: DateTime<Utc>) -> Self {
        Self {
            id: MessageRef::Local(LocalMessageId::generate()),
            direction: Direction::FromMe,
            kind,
            payload,
            display_time: format_display_time(created_at),
            created_at,
            status: DeliveryStatus::Pending,
        }
    }

    pub fn local_id(&self) -> Option<LocalMessageId> {
        self.id.as_local()
    }

    pub fn server_id(&self) -> Option<&MessageId> {
        self.id.as_server()
    }

    pub fn is_provisional(&self) -> bool {
        self.local_id().is_some()
    }

    /// Whether `self`, a canonical copy from the store, is the persisted form
    /// of `provisional`. With no shared identifier the match is by content and
    /// timestamp proximity.
    pub fn is_canonical_copy_of(&self, provisional: &Message, window: Duration) -> bool {
        if self.is_provisional() || !provisional.is_provisional() {
            return false;
        }
        if self.direction != Direction::FromMe || self.kind != provisional.kind {
            return false;
        }

        let skew_ms = (self.created_at - provisional.created_at)
            .num_milliseconds()
            .unsigned_abs();
        if u128::from(skew_ms) > window.as_millis() {
            return false;
        }

        match (&self.payload, &provisional.payload) {
            (Payload::Text(canonical), Payload::Text(local)) => canonical.trim() == local.trim(),
            (Payload::Media { .. }, Payload::Media { .. }) => {
                let names_agree = match (self.payload.file_name(), provisional.payload.file_name()) {
                    (Some(canonical), Some(local)) => canonical == local,
                    _ => true,
                };
                let captions_agree = match provisional.payload.text() {
                    Some(local) => self.payload.text().map(str::trim) == Some(local.trim()),
                    None => true,
                };
                names_agree && captions_agree
            }
            _ => false,
        }
    }
}

pub fn format_display_time(created_at: DateTime<Utc>) -> String {
    created_at.format("%H:%M").to_string()
}
