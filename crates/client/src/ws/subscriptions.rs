//! Channels the caller wants push updates for.

use std::collections::BTreeSet;

use raptor_shared::ClientCommand;

/// Deduplicated set of channel names, replayed after every reconnect.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    channels: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add channels; returns how many were new.
    pub fn add<I, S>(&mut self, channels: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for channel in channels {
            if self.channels.insert(channel.into()) {
                added += 1;
            }
        }
        added
    }

    /// Remove channels; returns how many were present.
    pub fn remove<I, S>(&mut self, channels: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = 0;
        for channel in channels {
            if self.channels.remove(channel.as_ref()) {
                removed += 1;
            }
        }
        removed
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// The single `subscribe` command that restores every channel.
    pub fn replay_command(&self) -> Option<ClientCommand> {
        if self.channels.is_empty() {
            return None;
        }
        Some(ClientCommand::Subscribe {
            channels: self.channels(),
        })
    }
}
