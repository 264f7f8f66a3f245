//! Validation of optimistically-applied client actions.
//!
//! Clients apply actions locally before the server has seen them. The
//! reconciler replays each submitted action against authoritative state and
//! either acknowledges it or rejects it and repairs the client:
//!
//! - inventory rejections roll the server state back, send the
//!   authoritative slot values, and raise the session's out-of-sync gate
//!   until the client confirms the resync;
//! - block rejections send the authoritative block back, which is repair
//!   enough on its own, so the gate stays down.
//!
//! While the gate is up every further submission is discarded unanswered —
//! the client is replaying corrections and its predictions are meaningless.

use strata_protocol::messages::{ActionAck, ActionSubmit, BlockChange, SlotCorrection};
use strata_protocol::{ClientAction, ItemStack, Message};
use strata_world::{BlockPos, BlockState, ServerWorld, dist_sq_mm};

use crate::chunk_interest::ChunkInterestTracker;
use crate::session::{BreakProgress, Session, SinkError};

/// Default maximum interaction distance in millimetres.
pub const DEFAULT_REACH_MM: i64 = 7_500;

/// Why an action failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionViolation {
    /// The click targeted a window other than the open one.
    #[error("window mismatch: open {open}, clicked {clicked}")]
    WindowMismatch { open: u8, clicked: u8 },

    /// The slot index does not exist in the open window.
    #[error("slot {slot} out of bounds for window of {len} slots")]
    SlotOutOfBounds { slot: u16, len: usize },

    /// The server's result differs from the client's prediction.
    #[error("predicted slot value does not match authoritative result")]
    PredictionMismatch,

    /// Finish or cancel arrived with no break in progress.
    #[error("no block break in progress")]
    NoBreakInProgress,

    /// Finish targeted a different block than the one being broken.
    #[error("break finished at {finished:?} but started at {started:?}")]
    BreakTargetMismatch { started: BlockPos, finished: BlockPos },

    /// The target block is farther than the reach limit.
    #[error("target out of reach: {dist_sq} mm^2 exceeds {max_sq} mm^2")]
    OutOfReach { dist_sq: i64, max_sq: i64 },

    /// The target chunk is not loaded on the server.
    #[error("target chunk not loaded")]
    ChunkNotLoaded,

    /// Break targeted air.
    #[error("cannot break air")]
    NothingToBreak,

    /// Place targeted an occupied position.
    #[error("target position is occupied")]
    TargetOccupied,
}

/// Verdict on one submitted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Applied; the client's optimistic state stands.
    Accepted,
    /// Refused; the client has been sent whatever it needs to repair.
    Rejected(ActionViolation),
    /// Discarded without reply because the session's gate is up.
    DroppedByGate,
}

/// Validates submitted actions against authoritative state.
#[derive(Debug, Clone, Copy)]
pub struct TransactionReconciler {
    reach_mm: i64,
}

impl Default for TransactionReconciler {
    fn default() -> Self {
        Self {
            reach_mm: DEFAULT_REACH_MM,
        }
    }
}

impl TransactionReconciler {
    /// Creates a reconciler with a custom reach limit.
    pub fn new(reach_mm: i64) -> Self {
        Self { reach_mm }
    }

    /// Validates one submission and sends the verdict (and any repair
    /// traffic) to the session.
    pub fn handle_submit(
        &self,
        session: &mut Session,
        world: &mut ServerWorld,
        chunks: &mut ChunkInterestTracker,
        submit: &ActionSubmit,
        tick: u64,
    ) -> Result<ActionOutcome, SinkError> {
        if session.out_of_sync {
            tracing::trace!(client = ?session.client_id, action = submit.action_id, "gated, dropping action");
            return Ok(ActionOutcome::DroppedByGate);
        }

        match &submit.action {
            ClientAction::ClickSlot {
                window_id,
                slot,
                expected,
            } => self.click_slot(session, submit.action_id, *window_id, *slot, *expected),
            ClientAction::StartBreak { pos } => {
                self.start_break(session, submit.action_id, world, *pos, tick)
            }
            ClientAction::CancelBreak => self.cancel_break(session, submit.action_id),
            ClientAction::FinishBreak { pos } => {
                self.finish_break(session, submit.action_id, world, chunks, *pos)
            }
            ClientAction::PlaceBlock { pos, block } => {
                self.place_block(session, submit.action_id, world, chunks, *pos, *block)
            }
        }
    }

    /// Lowers the session's gate: the client has finished applying the
    /// corrections and its view is authoritative again.
    pub fn handle_resync_ack(&self, session: &mut Session) {
        if session.out_of_sync {
            tracing::debug!(client = ?session.client_id, "resync acknowledged, gate lowered");
            session.out_of_sync = false;
        }
    }

    // -----------------------------------------------------------------------
    // Inventory
    // -----------------------------------------------------------------------

    fn click_slot(
        &self,
        session: &mut Session,
        action_id: u32,
        window_id: u8,
        slot: u16,
        expected: Option<ItemStack>,
    ) -> Result<ActionOutcome, SinkError> {
        if window_id != session.window.id {
            let violation = ActionViolation::WindowMismatch {
                open: session.window.id,
                clicked: window_id,
            };
            self.reject_inventory(session, action_id, None, &violation)?;
            return Ok(ActionOutcome::Rejected(violation));
        }
        let len = session.window.slots.len();
        if usize::from(slot) >= len {
            let violation = ActionViolation::SlotOutOfBounds { slot, len };
            self.reject_inventory(session, action_id, None, &violation)?;
            return Ok(ActionOutcome::Rejected(violation));
        }

        // The authoritative click rule: slot and cursor swap.
        let idx = usize::from(slot);
        let before_slot = session.window.slots[idx];
        let before_cursor = session.window.cursor;
        session.window.slots[idx] = before_cursor;
        session.window.cursor = before_slot;

        if session.window.slots[idx] == expected {
            session.send(&Message::ActionAck(ActionAck {
                action_id,
                accepted: true,
            }))?;
            return Ok(ActionOutcome::Accepted);
        }

        // Roll back, then repair the client from the restored state.
        session.window.slots[idx] = before_slot;
        session.window.cursor = before_cursor;
        let violation = ActionViolation::PredictionMismatch;
        self.reject_inventory(session, action_id, Some(slot), &violation)?;
        Ok(ActionOutcome::Rejected(violation))
    }

    /// Sends the full inventory rejection sequence and raises the gate:
    /// verdict, authoritative values for the touched slot and the cursor,
    /// then the terminator the client answers with a resync-ack.
    fn reject_inventory(
        &self,
        session: &mut Session,
        action_id: u32,
        slot: Option<u16>,
        violation: &ActionViolation,
    ) -> Result<(), SinkError> {
        tracing::debug!(client = ?session.client_id, action = action_id, %violation, "inventory action rejected");
        session.send(&Message::ActionAck(ActionAck {
            action_id,
            accepted: false,
        }))?;
        if let Some(slot) = slot {
            let item = session.window.slots[usize::from(slot)];
            session.send(&Message::SlotCorrection(SlotCorrection {
                window_id: session.window.id,
                slot: Some(slot),
                item,
            }))?;
        }
        let cursor = session.window.cursor;
        session.send(&Message::SlotCorrection(SlotCorrection {
            window_id: session.window.id,
            slot: None,
            item: cursor,
        }))?;
        session.send(&Message::ResyncTerminator)?;
        session.out_of_sync = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    fn start_break(
        &self,
        session: &mut Session,
        action_id: u32,
        world: &ServerWorld,
        pos: BlockPos,
        tick: u64,
    ) -> Result<ActionOutcome, SinkError> {
        if let Err(violation) = self.check_block_target(session, world, pos, false) {
            self.reject_block(session, action_id, world, pos, &violation)?;
            return Ok(ActionOutcome::Rejected(violation));
        }
        session.breaking = Some(BreakProgress {
            pos,
            started_tick: tick,
        });
        session.send(&Message::ActionAck(ActionAck {
            action_id,
            accepted: true,
        }))?;
        Ok(ActionOutcome::Accepted)
    }

    fn cancel_break(
        &self,
        session: &mut Session,
        action_id: u32,
    ) -> Result<ActionOutcome, SinkError> {
        if session.breaking.take().is_none() {
            let violation = ActionViolation::NoBreakInProgress;
            session.send(&Message::ActionAck(ActionAck {
                action_id,
                accepted: false,
            }))?;
            return Ok(ActionOutcome::Rejected(violation));
        }
        session.send(&Message::ActionAck(ActionAck {
            action_id,
            accepted: true,
        }))?;
        Ok(ActionOutcome::Accepted)
    }

    fn finish_break(
        &self,
        session: &mut Session,
        action_id: u32,
        world: &mut ServerWorld,
        chunks: &mut ChunkInterestTracker,
        pos: BlockPos,
    ) -> Result<ActionOutcome, SinkError> {
        // Any rejection ends the in-progress break.
        let progress = session.breaking.take();

        let violation = match progress {
            None => Some(ActionViolation::NoBreakInProgress),
            Some(p) if p.pos != pos => Some(ActionViolation::BreakTargetMismatch {
                started: p.pos,
                finished: pos,
            }),
            Some(_) => self.check_block_target(session, world, pos, false).err(),
        };
        if let Some(violation) = violation {
            self.reject_block(session, action_id, world, pos, &violation)?;
            return Ok(ActionOutcome::Rejected(violation));
        }

        match world.set_block(pos, BlockState::AIR) {
            Ok(_) => {}
            Err(e) => {
                // Loaded-ness was checked above; losing the chunk between
                // the check and the write still must not crash the tick.
                tracing::warn!(client = ?session.client_id, ?pos, error = %e, "break write failed");
                let violation = ActionViolation::ChunkNotLoaded;
                self.reject_block(session, action_id, world, pos, &violation)?;
                return Ok(ActionOutcome::Rejected(violation));
            }
        }
        chunks.mark_dirty(pos.chunk(), pos.local());
        session.send(&Message::ActionAck(ActionAck {
            action_id,
            accepted: true,
        }))?;
        Ok(ActionOutcome::Accepted)
    }

    fn place_block(
        &self,
        session: &mut Session,
        action_id: u32,
        world: &mut ServerWorld,
        chunks: &mut ChunkInterestTracker,
        pos: BlockPos,
        block: BlockState,
    ) -> Result<ActionOutcome, SinkError> {
        if let Err(violation) = self.check_block_target(session, world, pos, true) {
            self.reject_block(session, action_id, world, pos, &violation)?;
            return Ok(ActionOutcome::Rejected(violation));
        }
        match world.set_block(pos, block) {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(client = ?session.client_id, ?pos, error = %e, "place write failed");
                let violation = ActionViolation::ChunkNotLoaded;
                self.reject_block(session, action_id, world, pos, &violation)?;
                return Ok(ActionOutcome::Rejected(violation));
            }
        }
        chunks.mark_dirty(pos.chunk(), pos.local());
        session.send(&Message::ActionAck(ActionAck {
            action_id,
            accepted: true,
        }))?;
        Ok(ActionOutcome::Accepted)
    }

    /// Reach and target checks shared by break and place. `want_air` is
    /// `true` for placement (the position must be free) and `false` for
    /// breaking (there must be something to break).
    fn check_block_target(
        &self,
        session: &Session,
        world: &ServerWorld,
        pos: BlockPos,
        want_air: bool,
    ) -> Result<(), ActionViolation> {
        let dist_sq = dist_sq_mm(session.pos, pos.center_mm());
        let max_sq = self.reach_mm * self.reach_mm;
        if dist_sq > max_sq {
            return Err(ActionViolation::OutOfReach { dist_sq, max_sq });
        }
        let block = world.block_at(pos).ok_or(ActionViolation::ChunkNotLoaded)?;
        if want_air && !block.is_air() {
            return Err(ActionViolation::TargetOccupied);
        }
        if !want_air && block.is_air() {
            return Err(ActionViolation::NothingToBreak);
        }
        Ok(())
    }

    /// Sends the block rejection sequence: verdict plus the authoritative
    /// block the client must restore. The block resend already repairs the
    /// client's world, so the gate is not involved.
    fn reject_block(
        &self,
        session: &mut Session,
        action_id: u32,
        world: &ServerWorld,
        pos: BlockPos,
        violation: &ActionViolation,
    ) -> Result<(), SinkError> {
        tracing::debug!(client = ?session.client_id, action = action_id, %violation, "block action rejected");
        session.send(&Message::ActionAck(ActionAck {
            action_id,
            accepted: false,
        }))?;
        if let Some(block) = world.block_at(pos) {
            session.send(&Message::BlockChange(BlockChange { pos, block }))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
