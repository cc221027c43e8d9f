use crate::shared::AdapterError;

/// Separator between the prefix, namespace and room segments of a bus channel.
/// Identifiers containing it are rejected at the API boundary.
pub const DELIMITER: char = '#';

/// Prefix used when the caller does not override the channel naming.
pub const DEFAULT_PREFIX: &str = "roomcast";

/// The (namespace, room) target recovered from a bus channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub namespace: String,
    pub room: Option<String>,
}

/// Maps (namespace, optional room) to bus channel names and back.
///
/// Room channels are `<prefix>#<namespace>#<room>#` and whole-namespace
/// channels are `<prefix>#<namespace>#`. External tooling inspects these
/// names directly, so the format is fixed; only the prefix is configurable.
#[derive(Debug, Clone)]
pub struct ChannelScheme {
    prefix: String,
}

impl Default for ChannelScheme {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl ChannelScheme {
    /// Creates a scheme with a custom prefix.
    pub fn new(prefix: impl Into<String>) -> Result<Self, AdapterError> {
        let prefix = prefix.into();
        validate_identifier(&prefix)?;
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Channel carrying broadcasts scoped to a single room.
    pub fn room_channel(&self, namespace: &str, room: &str) -> String {
        format!(
            "{}{d}{}{d}{}{d}",
            self.prefix,
            namespace,
            room,
            d = DELIMITER
        )
    }

    /// Channel carrying broadcasts addressed to a whole namespace.
    pub fn namespace_channel(&self, namespace: &str) -> String {
        format!("{}{d}{}{d}", self.prefix, namespace, d = DELIMITER)
    }

    /// Recovers the (namespace, room) target from a channel name, if the
    /// channel belongs to this scheme. Used only as a defensive cross-check
    /// against the envelope; the envelope stays authoritative.
    pub fn parse(&self, channel: &str) -> Option<ChannelTarget> {
        let rest = channel.strip_prefix(&self.prefix)?;
        let rest = rest.strip_prefix(DELIMITER)?;
        let segments: Vec<&str> = rest.split(DELIMITER).collect();
        match segments.as_slice() {
            [namespace, ""] => Some(ChannelTarget {
                namespace: (*namespace).to_string(),
                room: None,
            }),
            [namespace, room, ""] => Some(ChannelTarget {
                namespace: (*namespace).to_string(),
                room: Some((*room).to_string()),
            }),
            _ => None,
        }
    }
}

/// Rejects namespace, room and connection identifiers that would collide
/// with the channel delimiter.
pub fn validate_identifier(identifier: &str) -> Result<(), AdapterError> {
    if identifier.contains(DELIMITER) {
        return Err(AdapterError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}
