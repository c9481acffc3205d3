//! The outbound message buffer shared with the host.
//!
//! A preallocated sequence of `[requestIdWithMsgType, subtaskId, arg1, arg2]`
//! slots with a tail pointer. Slots below the tail are reused in place across
//! ticks to avoid reallocation churn; the buffer grows by push only when the
//! tail passes the allocated length.

use serde_json::Value as JsonValue;
use trellis_commons::protocol::pack_msg;

/// One outbound host message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutMessage {
    /// Request id with the 8-bit message type packed into the top byte.
    pub id: u32,
    /// Subtask identifier, zero when the message is not subtask-scoped.
    pub subtask: u32,
    pub arg1: JsonValue,
    pub arg2: JsonValue,
}

/// The outbound buffer handed to `run_tasks` each tick.
#[derive(Debug, Default)]
pub struct Outbox {
    slots: Vec<OutMessage>,
    tail: usize,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages emitted so far this tick: `slots()[..tail()]`.
    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn slots(&self) -> &[OutMessage] {
        &self.slots
    }

    /// Messages below the current tail.
    pub fn messages(&self) -> &[OutMessage] {
        &self.slots[..self.tail]
    }

    pub(crate) fn set_tail(&mut self, tail: usize) {
        debug_assert!(tail <= self.slots.len());
        self.tail = tail.min(self.slots.len());
    }

    pub(crate) fn emit(
        &mut self,
        msg_type: u8,
        request_id: u32,
        subtask: u32,
        arg1: JsonValue,
        arg2: JsonValue,
    ) {
        let id = pack_msg(msg_type, request_id);
        if self.tail < self.slots.len() {
            let slot = &mut self.slots[self.tail];
            slot.id = id;
            slot.subtask = subtask;
            slot.arg1 = arg1;
            slot.arg2 = arg2;
        } else {
            self.slots.push(OutMessage {
                id,
                subtask,
                arg1,
                arg2,
            });
        }
        self.tail += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_commons::protocol::{msg, msg_type, request_id};

    #[test]
    fn test_emit_packs_type_byte() {
        let mut outbox = Outbox::new();
        outbox.emit(msg::QUERY, 7, 99, json!("fp"), json!({"params": {}}));

        assert_eq!(outbox.tail(), 1);
        let slot = &outbox.messages()[0];
        assert_eq!(msg_type(slot.id), msg::QUERY);
        assert_eq!(request_id(slot.id), 7);
        assert_eq!(slot.subtask, 99);
    }

    #[test]
    fn test_slots_reused_below_tail() {
        let mut outbox = Outbox::new();
        outbox.emit(msg::LOG, 1, 0, json!("a"), JsonValue::Null);
        outbox.emit(msg::LOG, 2, 0, json!("b"), JsonValue::Null);
        assert_eq!(outbox.slots().len(), 2);

        // Next tick: host consumed everything, tail rewinds, capacity stays.
        outbox.set_tail(0);
        outbox.emit(msg::LOG, 3, 0, json!("c"), JsonValue::Null);
        assert_eq!(outbox.slots().len(), 2);
        assert_eq!(outbox.tail(), 1);
        assert_eq!(request_id(outbox.messages()[0].id), 3);
    }

    #[test]
    fn test_grows_past_allocation() {
        let mut outbox = Outbox::new();
        for i in 0..4 {
            outbox.emit(msg::LOG, i, 0, JsonValue::Null, JsonValue::Null);
        }
        assert_eq!(outbox.tail(), 4);
        assert_eq!(outbox.slots().len(), 4);
    }
}
