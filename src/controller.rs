use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc::UnboundedSender, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    codec,
    error::Result,
    session::Session,
    types::{Capability, CharacteristicRole, MountEvent, Position, PositionState},
};

/// Position reads and move writes
///
/// Reads are serialized by an operation lock that drops, rather than
/// queues, a read requested while another is in flight. Writes bypass the
/// lock. Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct PositionController {
    session: Session,
    state: Arc<RwLock<PositionState>>,
    op_lock: Arc<Mutex<()>>,
    events: UnboundedSender<MountEvent>,
    deferred_disconnect: Duration,
}

impl std::fmt::Debug for PositionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionController")
            .field("session", &self.session)
            .field("deferred_disconnect", &self.deferred_disconnect)
            .finish_non_exhaustive()
    }
}

impl PositionController {
    /// Create a controller publishing capability updates on `events`
    pub fn new(
        session: Session,
        events: UnboundedSender<MountEvent>,
        deferred_disconnect: Duration,
    ) -> Self {
        Self {
            session,
            state: Arc::new(RwLock::new(PositionState::default())),
            op_lock: Arc::new(Mutex::new(())),
            events,
            deferred_disconnect,
        }
    }

    /// Read the current position from the mount
    ///
    /// Returns `Ok(None)` without touching the mount if another read holds
    /// the operation lock. On success both registers are committed together,
    /// the capability values are published and the link is closed.
    ///
    /// # Errors
    ///
    /// Returns the session error of the first failing step. Nothing is
    /// committed or published and the link is left as is.
    pub async fn read(&self) -> Result<Option<Position>> {
        let Ok(_guard) = self.op_lock.try_lock() else {
            debug!("Position read already in progress, skipping");
            return Ok(None);
        };

        info!("Reading position");
        self.session.connect().await?;

        let extend = codec::register(&self.session.read(CharacteristicRole::ExtendPosition).await?)?;
        let turn = codec::register(&self.session.read(CharacteristicRole::TurnPosition).await?)?;

        let state = PositionState { extend, turn };
        *self.state.write().await = state;
        let position = state.position();
        info!("Position: extend {} turn {}", position.extend, position.turn);

        self.publish(Capability::CurrentExtend(codec::hex(&extend)));
        self.publish(Capability::SetExtend(position.extend));
        self.publish(Capability::CurrentTurn(codec::hex(&turn)));
        self.publish(Capability::SetTurn(position.turn));

        self.session.disconnect().await;
        Ok(Some(position))
    }

    /// Move to `extend`/`turn`
    ///
    /// The requested registers become the new [`PositionState`] before the
    /// command is written. The link is closed after the deferred-disconnect
    /// delay.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::InvalidRange`](crate::MountError::InvalidRange)
    /// for an out-of-range value, or the session error if the write fails.
    pub async fn write(&self, extend: i32, turn: i32) -> Result<()> {
        let extend_raw = codec::encode_extend(extend)?;
        let turn_raw = codec::encode_turn(turn)?;

        info!("Moving to extend {} turn {}", extend, turn);
        *self.state.write().await = PositionState {
            extend: extend_raw,
            turn: turn_raw,
        };

        let command = codec::encode_move(extend_raw, turn_raw);
        if let Err(e) = self
            .session
            .write(CharacteristicRole::Move, command.to_vec())
            .await
        {
            warn!("Error writing move command: {}", e);
            return Err(e);
        }

        self.session.disconnect_after(self.deferred_disconnect);
        Ok(())
    }

    /// Move the extend axis, keeping the current turn
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub async fn set_extend(&self, extend: i32) -> Result<()> {
        let turn = self.position().await.turn;
        self.write(extend, turn).await
    }

    /// Move the turn axis, keeping the current extend
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub async fn set_turn(&self, turn: i32) -> Result<()> {
        let extend = self.position().await.extend;
        self.write(extend, turn).await
    }

    /// Last known position
    pub async fn position(&self) -> Position {
        self.state.read().await.position()
    }

    /// Last known raw registers
    pub async fn registers(&self) -> PositionState {
        *self.state.read().await
    }

    fn publish(&self, capability: Capability) {
        if self.events.send(MountEvent::Capability(capability)).is_err() {
            debug!("No observer for capability update");
        }
    }
}
