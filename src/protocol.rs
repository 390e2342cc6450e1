use serde::{Deserialize, Deserializer, Serialize};

use crate::board::CellChange;
use crate::catalog::Tetromino;
use crate::engine::{LockOutcome, Piece};
use crate::error::SyncError;
use crate::randomizer::{BagCursor, RandomizerKind};
use crate::session::{Operation, Phase, Snapshot};

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SeedAnnouncement {
    pub seed: u64,
    #[serde(default)]
    pub randomizer: RandomizerKind,
    #[serde(default = "default_queue_len")]
    pub next_queue_len: usize,
}

fn default_queue_len() -> usize {
    5
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DesyncKind {
    /// Game over, yet a live piece is still reported.
    GameOverWithLivePiece,
    /// Game over with the piece still at its spawn row: a snapshot from
    /// before the top-out.
    StaleGameOver,
    GhostMismatch,
    /// Running, not over, and no current piece for too long.
    MissingPiece,
    /// Preview disagrees with the seed projection.
    QueueMismatch,
    /// A delta did not chain onto the last applied sequence.
    BrokenDeltaChain,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RepairRequest {
    pub reason: DesyncKind,
    pub last_seq: Option<u64>,
}

/// Messages exchanged between authority and observers.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Seed(SeedAnnouncement),
    Snapshot(Snapshot),
    Delta(Delta),
    /// Unsolicited or repair snapshot; always applied.
    Correction(Snapshot),
    RepairRequest(RepairRequest),
    Input(Operation),
    End,
}

impl Message {
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Absent field means "unchanged"; `null` on a nullable field clears it.
fn present<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Only the fields that moved between `base_seq` and `seq`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Delta {
    pub base_seq: u64,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<CellChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub current_piece: Option<Option<Piece>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub ghost_piece: Option<Option<Piece>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub held_piece: Option<Option<Tetromino>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_hold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_pieces: Option<Vec<Tetromino>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bag: Option<BagCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_over: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub last_lock: Option<Option<LockOutcome>>,
}

fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
    (old != new).then(|| new.clone())
}

impl Delta {
    pub fn between(old: &Snapshot, new: &Snapshot) -> Delta {
        Delta {
            base_seq: old.seq,
            seq: new.seq,
            cells: old.board.diff(&new.board),
            phase: changed(&old.phase, &new.phase),
            current_piece: changed(&old.current_piece, &new.current_piece),
            ghost_piece: changed(&old.ghost_piece, &new.ghost_piece),
            held_piece: changed(&old.held_piece, &new.held_piece),
            can_hold: changed(&old.can_hold, &new.can_hold),
            next_pieces: changed(&old.next_pieces, &new.next_pieces),
            bag: changed(&old.bag, &new.bag),
            score: changed(&old.score, &new.score),
            level: changed(&old.level, &new.level),
            lines: changed(&old.lines, &new.lines),
            game_over: changed(&old.game_over, &new.game_over),
            paused: changed(&old.paused, &new.paused),
            running: changed(&old.running, &new.running),
            last_lock: changed(&old.last_lock, &new.last_lock),
        }
    }

    /// Produces the patched snapshot, leaving `base` alone so a bad delta
    /// can be thrown away whole.
    pub fn apply_to(&self, base: &Snapshot) -> Result<Snapshot, SyncError> {
        if base.seq != self.base_seq {
            return Err(SyncError::InvalidSnapshot(format!(
                "delta based on {} applied to {}",
                self.base_seq, base.seq
            )));
        }
        let mut next = base.clone();
        next.board
            .apply_changes(&self.cells)
            .map_err(SyncError::InvalidSnapshot)?;
        next.seq = self.seq;
        if let Some(v) = self.phase {
            next.phase = v;
        }
        if let Some(v) = &self.current_piece {
            next.current_piece = v.clone();
        }
        if let Some(v) = &self.ghost_piece {
            next.ghost_piece = v.clone();
        }
        if let Some(v) = self.held_piece {
            next.held_piece = v;
        }
        if let Some(v) = self.can_hold {
            next.can_hold = v;
        }
        if let Some(v) = &self.next_pieces {
            next.next_pieces = v.clone();
        }
        if let Some(v) = self.bag {
            next.bag = v;
        }
        if let Some(v) = self.score {
            next.score = v;
        }
        if let Some(v) = self.level {
            next.level = v;
        }
        if let Some(v) = self.lines {
            next.lines = v;
        }
        if let Some(v) = self.game_over {
            next.game_over = v;
        }
        if let Some(v) = self.paused {
            next.paused = v;
        }
        if let Some(v) = self.running {
            next.running = v;
        }
        if let Some(v) = self.last_lock {
            next.last_lock = v;
        }
        next.validate()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameSettings;
    use crate::session::Session;

    fn running_session() -> Session {
        let mut session = Session::new(GameSettings::default());
        session.start(77).unwrap();
        session.tick(0);
        session
    }

    #[test]
    fn delta_carries_only_what_moved() {
        let mut session = running_session();
        let before = session.snapshot();
        session.apply(Operation::MoveLeft);
        let after = session.snapshot();

        let delta = Delta::between(&before, &after);
        assert!(delta.cells.is_empty());
        assert!(delta.current_piece.is_some());
        assert!(delta.score.is_none());
        assert!(delta.next_pieces.is_none());
        assert_eq!(delta.apply_to(&before).unwrap(), after);
    }

    #[test]
    fn null_in_delta_clears_a_field() {
        let mut session = running_session();
        let before = session.snapshot();
        session.apply(Operation::HardDrop);
        let after = session.snapshot();

        let json = Message::Delta(Delta::between(&before, &after)).to_json().unwrap();
        assert!(json.contains("\"current_piece\":null"));
        let Message::Delta(decoded) = Message::from_json(&json).unwrap() else {
            panic!("expected delta");
        };
        assert_eq!(decoded.current_piece, Some(None));
        let patched = decoded.apply_to(&before).unwrap();
        assert_eq!(patched, after);
        assert!(!patched.board.is_empty());
    }

    #[test]
    fn delta_on_wrong_base_is_refused() {
        let mut session = running_session();
        let first = session.snapshot();
        session.apply(Operation::MoveRight);
        let second = session.snapshot();
        session.apply(Operation::MoveRight);
        let third = session.snapshot();

        let delta = Delta::between(&second, &third);
        assert!(delta.apply_to(&first).is_err());
    }

    #[test]
    fn input_message_wire_shape() {
        let json = Message::Input(Operation::HardDrop).to_json().unwrap();
        assert_eq!(json, r#"{"type":"input","payload":"hard_drop"}"#);
        assert_eq!(Message::from_json(r#"{"type":"end"}"#).unwrap(), Message::End);
        assert!(matches!(
            Message::from_json(r#"{"type":"input","payload":"teleport"}"#),
            Err(SyncError::Malformed(_))
        ));
    }

    #[test]
    fn snapshot_with_forged_shape_fails_validation() {
        let session = running_session();
        let json = Message::Snapshot(session.snapshot()).to_json().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["payload"]["current_piece"]["shape"] = serde_json::json!([[1, 1], [1, 1]]);
        value["payload"]["current_piece"]["type"] = serde_json::json!("T");
        let Message::Snapshot(forged) = serde_json::from_value::<Message>(value).unwrap() else {
            panic!("expected snapshot");
        };
        assert!(matches!(forged.validate(), Err(SyncError::InvalidSnapshot(_))));
    }
}
