//! In-process transport. Backs `--dry-run` and the engine's tests.
//!
//! Messages live in per-channel vectors; DMs go to a synthetic `dm-<user>`
//! channel. Failures can be injected per destination or per operation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use spawnwatch_core::error::TransportError;
use spawnwatch_core::traits::Transport;
use spawnwatch_core::types::{Destination, MessageRef, SentMessage};

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    /// channel id -> (message id, content), oldest first.
    channels: HashMap<String, Vec<(String, String)>>,
    sends: Vec<(Destination, String)>,
    edits: Vec<MessageRef>,
    deletes: Vec<MessageRef>,
    unreachable: HashSet<Destination>,
    fail_edits: bool,
    fail_deletes: bool,
}

/// Transport that keeps everything in memory.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Unavailable("memory transport poisoned".into()))
    }

    fn channel_for(destination: &Destination) -> String {
        match destination {
            Destination::Channel(id) => id.clone(),
            Destination::User(id) => format!("dm-{id}"),
        }
    }

    /// Make every send to `destination` fail.
    pub fn set_unreachable(&self, destination: Destination) {
        if let Ok(mut s) = self.lock() {
            s.unreachable.insert(destination);
        }
    }

    pub fn set_fail_edits(&self, fail: bool) {
        if let Ok(mut s) = self.lock() {
            s.fail_edits = fail;
        }
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        if let Ok(mut s) = self.lock() {
            s.fail_deletes = fail;
        }
    }

    /// Place a message in a channel as if it had been sent earlier.
    pub fn inject(&self, channel_id: &str, content: &str) -> MessageRef {
        let mut s = self.state.lock().unwrap_or_else(|p| p.into_inner());
        s.next_id += 1;
        let id = s.next_id.to_string();
        s.channels
            .entry(channel_id.to_string())
            .or_default()
            .push((id.clone(), content.to_string()));
        MessageRef::new(channel_id, id)
    }

    /// Every send attempt, including failed ones.
    pub fn sends(&self) -> Vec<(Destination, String)> {
        self.lock().map(|s| s.sends.clone()).unwrap_or_default()
    }

    pub fn sends_to(&self, destination: &Destination) -> usize {
        self.sends().iter().filter(|(d, _)| d == destination).count()
    }

    pub fn edits(&self) -> Vec<MessageRef> {
        self.lock().map(|s| s.edits.clone()).unwrap_or_default()
    }

    /// Every delete attempt, including failed ones.
    pub fn deletes(&self) -> Vec<MessageRef> {
        self.lock().map(|s| s.deletes.clone()).unwrap_or_default()
    }

    /// Current contents of a channel, oldest first.
    pub fn messages(&self, channel_id: &str) -> Vec<String> {
        self.lock()
            .map(|s| {
                s.channels
                    .get(channel_id)
                    .map(|m| m.iter().map(|(_, c)| c.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(
        &self,
        destination: &Destination,
        content: &str,
    ) -> Result<MessageRef, TransportError> {
        let mut s = self.lock()?;
        s.sends.push((destination.clone(), content.to_string()));
        if s.unreachable.contains(destination) {
            return Err(TransportError::Unavailable(format!("{destination} unreachable")));
        }
        s.next_id += 1;
        let id = s.next_id.to_string();
        let channel = Self::channel_for(destination);
        s.channels
            .entry(channel.clone())
            .or_default()
            .push((id.clone(), content.to_string()));
        tracing::info!("[memory] -> {destination}: {}", content.lines().next().unwrap_or(""));
        Ok(MessageRef::new(channel, id))
    }

    async fn edit(&self, message: &MessageRef, content: &str) -> Result<(), TransportError> {
        let mut s = self.lock()?;
        s.edits.push(message.clone());
        if s.fail_edits {
            return Err(TransportError::Unavailable("edits disabled".into()));
        }
        let slot = s
            .channels
            .get_mut(&message.channel_id)
            .and_then(|msgs| msgs.iter_mut().find(|(id, _)| *id == message.message_id))
            .ok_or(TransportError::NotFound)?;
        slot.1 = content.to_string();
        Ok(())
    }

    async fn delete(&self, message: &MessageRef) -> Result<(), TransportError> {
        let mut s = self.lock()?;
        s.deletes.push(message.clone());
        if s.fail_deletes {
            return Err(TransportError::Unavailable("deletes disabled".into()));
        }
        let msgs = s
            .channels
            .get_mut(&message.channel_id)
            .ok_or(TransportError::NotFound)?;
        let before = msgs.len();
        msgs.retain(|(id, _)| *id != message.message_id);
        if msgs.len() == before {
            return Err(TransportError::NotFound);
        }
        Ok(())
    }

    async fn fetch(&self, message: &MessageRef) -> Result<SentMessage, TransportError> {
        let s = self.lock()?;
        s.channels
            .get(&message.channel_id)
            .and_then(|msgs| msgs.iter().find(|(id, _)| *id == message.message_id))
            .map(|(_, content)| SentMessage {
                reference: message.clone(),
                content: content.clone(),
                from_self: true,
            })
            .ok_or(TransportError::NotFound)
    }

    async fn recent(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<SentMessage>, TransportError> {
        let s = self.lock()?;
        let msgs = s.channels.get(channel_id).cloned().unwrap_or_default();
        Ok(msgs
            .into_iter()
            .rev()
            .take(limit)
            .map(|(id, content)| SentMessage {
                reference: MessageRef::new(channel_id, id),
                content,
                from_self: true,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_edit_fetch_delete() {
        let t = MemoryTransport::new();
        let dest = Destination::Channel("c1".into());
        let r = t.send(&dest, "hello").await.unwrap();
        t.edit(&r, "hello again").await.unwrap();
        assert_eq!(t.fetch(&r).await.unwrap().content, "hello again");

        t.delete(&r).await.unwrap();
        assert_eq!(t.fetch(&r).await.unwrap_err(), TransportError::NotFound);
        assert_eq!(t.delete(&r).await.unwrap_err(), TransportError::NotFound);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let t = MemoryTransport::new();
        t.inject("c1", "one");
        t.inject("c1", "two");
        t.inject("c1", "three");
        let recent = t.recent("c1", 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn test_unreachable_destination_records_attempt() {
        let t = MemoryTransport::new();
        let user = Destination::User("u1".into());
        t.set_unreachable(user.clone());
        assert!(t.send(&user, "hi").await.is_err());
        assert_eq!(t.sends_to(&user), 1);
        assert!(t.messages("dm-u1").is_empty());
    }
}
