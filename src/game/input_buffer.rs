//! Lock-free input buffer between network handlers and a room
//!
//! Connection handlers push decoded client messages from any thread; the
//! room drains everything at the start of its tick so arrival jitter never
//! reaches the simulation.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::state::PlayerId;
use crate::net::protocol::{AbilityRequest, InputFrame};

/// What a player sent
#[derive(Debug, Clone, PartialEq)]
pub enum InputPayload {
    Frame(InputFrame),
    Ability(AbilityRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputMessage {
    pub player_id: PlayerId,
    pub payload: InputPayload,
}

/// Bounded MPSC buffer owned by one room
pub struct InputBuffer {
    sender: Sender<InputMessage>,
    receiver: Receiver<InputMessage>,
    capacity: usize,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// New sender handle; each connection holds its own clone
    pub fn sender(&self) -> InputSender {
        InputSender {
            sender: self.sender.clone(),
        }
    }

    /// Drain all pending messages in arrival order
    pub fn drain(&self) -> Vec<InputMessage> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        // 16 players at a 60 Hz client send rate, a few ticks of slack
        Self::new(1024)
    }
}

/// Clonable sender handle for connection handlers
#[derive(Clone)]
pub struct InputSender {
    sender: Sender<InputMessage>,
}

impl InputSender {
    #[inline]
    pub fn try_send(&self, player_id: PlayerId, payload: InputPayload) -> Result<(), InputBufferError> {
        self.sender
            .try_send(InputMessage { player_id, payload })
            .map_err(|e| match e {
                TrySendError::Full(_) => InputBufferError::Full,
                TrySendError::Disconnected(_) => InputBufferError::Disconnected,
            })
    }

    pub fn send_frame(&self, player_id: PlayerId, frame: InputFrame) -> Result<(), InputBufferError> {
        self.try_send(player_id, InputPayload::Frame(frame))
    }

    pub fn send_ability(&self, player_id: PlayerId, request: AbilityRequest) -> Result<(), InputBufferError> {
        self.try_send(player_id, InputPayload::Ability(request))
    }
}

/// Input buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputBufferError {
    /// Buffer is full (backpressure)
    #[error("input buffer full")]
    Full,
    /// Room was dropped
    #[error("input buffer disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::ControlState;
    use uuid::Uuid;

    fn frame(sequence: u64) -> InputFrame {
        InputFrame::new(
            sequence,
            ControlState {
                throttle: 1.0,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_submit_and_drain_in_order() {
        let buffer = InputBuffer::new(10);
        let sender = buffer.sender();
        let player_id = Uuid::from_u128(1);

        sender.send_frame(player_id, frame(1)).unwrap();
        sender.send_ability(player_id, AbilityRequest::new("nitro")).unwrap();
        sender.send_frame(player_id, frame(2)).unwrap();
        assert_eq!(buffer.pending_count(), 3);

        let messages = buffer.drain();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].payload, InputPayload::Frame(frame(1)));
        assert!(matches!(messages[1].payload, InputPayload::Ability(_)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_backpressure() {
        let buffer = InputBuffer::new(2);
        let sender = buffer.sender();
        let player_id = Uuid::from_u128(1);

        assert!(sender.send_frame(player_id, frame(1)).is_ok());
        assert!(sender.send_frame(player_id, frame(2)).is_ok());
        assert_eq!(sender.send_frame(player_id, frame(3)), Err(InputBufferError::Full));

        buffer.drain();
        assert!(sender.send_frame(player_id, frame(3)).is_ok());
    }

    #[test]
    fn test_disconnected_after_drop() {
        let buffer = InputBuffer::new(4);
        let sender = buffer.sender();
        drop(buffer);
        assert_eq!(
            sender.send_frame(Uuid::from_u128(1), frame(1)),
            Err(InputBufferError::Disconnected)
        );
    }

    #[test]
    fn test_senders_from_many_threads() {
        let buffer = InputBuffer::new(100);
        let handles: Vec<_> = (0..4u128)
            .map(|n| {
                let sender = buffer.sender();
                std::thread::spawn(move || {
                    for seq in 0..10 {
                        sender.send_frame(Uuid::from_u128(n), frame(seq)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.drain().len(), 40);
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(InputBuffer::default().capacity(), 1024);
    }
}
