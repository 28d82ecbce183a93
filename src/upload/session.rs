//! Upload session state machine
//!
//! Stop-and-wait: exactly one chunk frame is unacknowledged at any time.
//! The handshake counts as a virtual chunk preceding chunk 0, so the first
//! inbound acknowledgment answers the handshake rather than a chunk.
//!
//! The transition functions are pure. The caller performs the actions
//! they return (read and send a chunk, report progress, close).

use super::key::SessionKey;
use super::source::ChunkPlan;
use super::types::{close_code, Handshake, UploadError};

/// Where the session is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake sent; the next acknowledgment answers it
    AwaitingHandshakeAck,
    /// Chunk frame `index` sent and unacknowledged
    AwaitingAck(u64),
    /// Every chunk accepted; outcome depends on the close code
    AwaitingClose,
    Done,
    Failed,
}

/// What the driver must do after an acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read chunk `index`, seal it and send it
    Send(u64),
    /// Re-read chunk `index`, recompute its tag and send it again
    Resend(u64),
    /// Nothing to send; wait for the connection to close
    AwaitClose,
}

/// Result of applying one acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Chunk index just accepted, for the progress callback
    pub accepted: Option<u64>,
    pub action: Action,
}

/// One upload attempt. Lives exactly as long as its connection.
#[derive(Debug)]
pub struct UploadSession {
    key: SessionKey,
    plan: ChunkPlan,
    state: SessionState,
    /// Consecutive rejections of the chunk in flight
    rejections: u32,
    max_resends: Option<u32>,
}

impl UploadSession {
    pub fn new(key: SessionKey, plan: ChunkPlan, max_resends: Option<u32>) -> Self {
        Self {
            key,
            plan,
            state: SessionState::AwaitingHandshakeAck,
            rejections: 0,
            max_resends,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    pub fn count(&self) -> u64 {
        self.plan.count()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of chunks the server has accepted so far
    pub fn accepted(&self) -> u64 {
        match self.state {
            SessionState::AwaitingHandshakeAck => 0,
            SessionState::AwaitingAck(index) => index,
            SessionState::AwaitingClose | SessionState::Done => self.count(),
            SessionState::Failed => 0,
        }
    }

    /// The control message opening the session
    pub fn handshake(&self) -> Handshake {
        Handshake {
            key: self.key.to_hex(),
            count: self.count(),
        }
    }

    /// Apply an inbound acknowledgment
    pub fn on_ack(&mut self, ack: bool) -> Result<Step, UploadError> {
        match (self.state, ack) {
            (SessionState::AwaitingHandshakeAck, true) => Ok(self.advance_to(0, None)),
            (SessionState::AwaitingHandshakeAck, false) => {
                self.state = SessionState::Failed;
                Err(UploadError::HandshakeRejected)
            }
            (SessionState::AwaitingAck(index), true) => Ok(self.advance_to(index + 1, Some(index))),
            (SessionState::AwaitingAck(index), false) => {
                self.rejections += 1;
                if let Some(max) = self.max_resends {
                    if self.rejections > max {
                        self.state = SessionState::Failed;
                        return Err(UploadError::TooManyRejections {
                            index,
                            rejections: self.rejections,
                        });
                    }
                }
                Ok(Step { accepted: None, action: Action::Resend(index) })
            }
            (SessionState::AwaitingClose, _) => {
                tracing::warn!(ack, "Acknowledgment after final chunk, ignoring");
                Ok(Step { accepted: None, action: Action::AwaitClose })
            }
            (SessionState::Done | SessionState::Failed, _) => Err(UploadError::Protocol(format!(
                "acknowledgment received in terminal state {:?}",
                self.state
            ))),
        }
    }

    /// Apply the connection close. Only a normal close after every chunk
    /// was accepted succeeds.
    pub fn on_close(&mut self, code: u16) -> Result<(), UploadError> {
        if self.state == SessionState::AwaitingClose && code == close_code::NORMAL {
            self.state = SessionState::Done;
            return Ok(());
        }
        let accepted = self.accepted();
        self.state = SessionState::Failed;
        Err(UploadError::AbnormalClose {
            code,
            accepted,
            count: self.count(),
        })
    }

    /// Mark the session failed after a transport-level error
    pub fn fail(&mut self) {
        self.state = SessionState::Failed;
    }

    fn advance_to(&mut self, next: u64, accepted: Option<u64>) -> Step {
        self.rejections = 0;
        if next >= self.count() {
            self.state = SessionState::AwaitingClose;
            Step { accepted, action: Action::AwaitClose }
        } else {
            self.state = SessionState::AwaitingAck(next);
            Step { accepted, action: Action::Send(next) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::{DEFAULT_CHUNK_SIZE, KEY_LEN};

    fn session(size: u64, max_resends: Option<u32>) -> UploadSession {
        UploadSession::new(
            SessionKey::from_bytes([3; KEY_LEN]),
            ChunkPlan::new(size, DEFAULT_CHUNK_SIZE),
            max_resends,
        )
    }

    #[test]
    fn test_starts_awaiting_handshake_ack() {
        let s = session(3_000_000, None);
        assert_eq!(s.state(), SessionState::AwaitingHandshakeAck);
        assert_eq!(s.handshake().count, 3);
        assert_eq!(s.handshake().key, "03".repeat(32));
    }

    #[test]
    fn test_handshake_ack_true_sends_first_chunk() {
        let mut s = session(3_000_000, None);
        let step = s.on_ack(true).unwrap();
        assert_eq!(step, Step { accepted: None, action: Action::Send(0) });
        assert_eq!(s.state(), SessionState::AwaitingAck(0));
    }

    #[test]
    fn test_handshake_ack_false_fails() {
        let mut s = session(3_000_000, None);
        assert!(matches!(s.on_ack(false), Err(UploadError::HandshakeRejected)));
        assert_eq!(s.state(), SessionState::Failed);
    }

    #[test]
    fn test_all_accepted_in_order() {
        let mut s = session(3_000_000, None);
        s.on_ack(true).unwrap();

        let steps: Vec<Step> = (0..3).map(|_| s.on_ack(true).unwrap()).collect();
        assert_eq!(
            steps,
            vec![
                Step { accepted: Some(0), action: Action::Send(1) },
                Step { accepted: Some(1), action: Action::Send(2) },
                Step { accepted: Some(2), action: Action::AwaitClose },
            ]
        );
        assert_eq!(s.state(), SessionState::AwaitingClose);
        assert!(s.on_close(close_code::NORMAL).is_ok());
        assert_eq!(s.state(), SessionState::Done);
    }

    #[test]
    fn test_rejection_resends_same_index() {
        let mut s = session(3_000_000, None);
        s.on_ack(true).unwrap();
        s.on_ack(true).unwrap();

        let step = s.on_ack(false).unwrap();
        assert_eq!(step, Step { accepted: None, action: Action::Resend(1) });
        assert_eq!(s.state(), SessionState::AwaitingAck(1));

        let step = s.on_ack(true).unwrap();
        assert_eq!(step, Step { accepted: Some(1), action: Action::Send(2) });
    }

    #[test]
    fn test_unbounded_resends_by_default() {
        let mut s = session(10, None);
        s.on_ack(true).unwrap();
        for _ in 0..1000 {
            assert_eq!(s.on_ack(false).unwrap().action, Action::Resend(0));
        }
    }

    #[test]
    fn test_resend_cap() {
        let mut s = session(10, Some(2));
        s.on_ack(true).unwrap();
        s.on_ack(false).unwrap();
        s.on_ack(false).unwrap();
        let err = s.on_ack(false).unwrap_err();
        assert!(matches!(err, UploadError::TooManyRejections { index: 0, rejections: 3 }));
    }

    #[test]
    fn test_resend_cap_resets_after_accept() {
        let mut s = session(2 * DEFAULT_CHUNK_SIZE as u64, Some(1));
        s.on_ack(true).unwrap();
        s.on_ack(false).unwrap();
        s.on_ack(true).unwrap();
        assert_eq!(s.on_ack(false).unwrap().action, Action::Resend(1));
    }

    #[test]
    fn test_empty_object_goes_straight_to_close() {
        let mut s = session(0, None);
        assert_eq!(s.count(), 0);
        let step = s.on_ack(true).unwrap();
        assert_eq!(step, Step { accepted: None, action: Action::AwaitClose });
        assert!(s.on_close(close_code::NORMAL).is_ok());
    }

    #[test]
    fn test_close_before_any_ack_fails_with_code() {
        let mut s = session(3_000_000, None);
        let err = s.on_close(close_code::POLICY_VIOLATION).unwrap_err();
        assert_eq!(err.close_code(), Some(1008));
        assert!(matches!(err, UploadError::AbnormalClose { accepted: 0, count: 3, .. }));
    }

    #[test]
    fn test_normal_close_before_completion_fails() {
        let mut s = session(3_000_000, None);
        s.on_ack(true).unwrap();
        s.on_ack(true).unwrap();
        let err = s.on_close(close_code::NORMAL).unwrap_err();
        assert!(matches!(err, UploadError::AbnormalClose { code: 1000, accepted: 1, count: 3 }));
    }

    #[test]
    fn test_non_normal_close_after_completion_fails() {
        let mut s = session(10, None);
        s.on_ack(true).unwrap();
        s.on_ack(true).unwrap();
        let err = s.on_close(close_code::INTERNAL_ERROR).unwrap_err();
        assert_eq!(err.close_code(), Some(1011));
    }

    #[test]
    fn test_ack_after_final_chunk_is_ignored() {
        let mut s = session(10, None);
        s.on_ack(true).unwrap();
        s.on_ack(true).unwrap();
        assert_eq!(s.on_ack(true).unwrap(), Step { accepted: None, action: Action::AwaitClose });
        assert_eq!(s.on_ack(false).unwrap().action, Action::AwaitClose);
        assert!(s.on_close(close_code::NORMAL).is_ok());
    }
}
