//! Channel identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a multiplexed channel within one connection
///
/// Allocated by the transport; unique only within its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Create a new channel ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_display() {
        let id = ChannelId::new(7);
        assert_eq!(format!("{}", id), "channel-7");
    }

    #[test]
    fn test_channel_id_ordering() {
        assert!(ChannelId::new(1) < ChannelId::new(2));
        assert_eq!(ChannelId::from(3).as_u32(), 3);
    }
}
