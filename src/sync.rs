use std::collections::VecDeque;

use crate::config::{GameSettings, SyncSettings};
use crate::engine::Piece;
use crate::error::SyncError;
use crate::protocol::{Delta, DesyncKind, Message, RepairRequest, SeedAnnouncement};
use crate::randomizer::{project_queue, validate_seed};
use crate::session::{Operation, Session, Snapshot};
use crate::{log, warn};

/// An owned, already-connected pipe. Framing and delivery are its business.
pub trait Transport {
    fn send(&mut self, message: &Message) -> Result<(), SyncError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, message: &Message) -> Result<(), SyncError> {
        (**self).send(message)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, message: &Message) -> Result<(), SyncError> {
        (**self).send(message)
    }
}

/// Queues outgoing messages for someone else to deliver.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<Message>,
    closed: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<Message> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn reopen(&mut self) {
        self.closed = false;
    }
}

impl Transport for Outbox {
    fn send(&mut self, message: &Message) -> Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::Transport("outbox closed".to_string()));
        }
        self.queue.push_back(message.clone());
        Ok(())
    }
}

/// Owns the real session and is the only writer of game state.
pub struct Authority<T: Transport> {
    session: Session,
    transport: T,
    settings: SyncSettings,
    last_sent: Option<Snapshot>,
}

impl<T: Transport> Authority<T> {
    pub fn new(game: GameSettings, settings: SyncSettings, transport: T) -> Self {
        Self {
            session: Session::new(game),
            transport,
            settings,
            last_sent: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Starts a game and tells the observer the seed before any piece exists.
    pub fn start(&mut self, seed: u64) -> Result<(), SyncError> {
        self.session.start(seed)?;
        self.last_sent = None;
        self.announce_seed()?;
        self.publish()
    }

    fn announce_seed(&mut self) -> Result<(), SyncError> {
        let seed = self.session.seed().ok_or(SyncError::NotStarted)?;
        let game = self.session.settings();
        let announcement = SeedAnnouncement {
            seed,
            randomizer: game.randomizer.clone(),
            next_queue_len: game.next_queue_len,
        };
        self.send(Message::Seed(announcement))
    }

    pub fn handle(&mut self, message: Message) -> Result<(), SyncError> {
        match message {
            Message::Input(op) => {
                if self.session.apply(op) {
                    self.publish()?;
                }
                Ok(())
            }
            Message::RepairRequest(request) => {
                warn(&format!(
                    "observer requested repair ({:?}, last seq {:?})",
                    request.reason, request.last_seq
                ));
                self.force_correction()
            }
            other => {
                warn(&format!("authority ignoring {}", message_kind(&other)));
                Ok(())
            }
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> Result<(), SyncError> {
        if self.session.tick(now_ms) {
            self.publish()?;
        }
        Ok(())
    }

    /// Sends whatever changed since the last message, as a delta when the
    /// observer already holds a base.
    pub fn publish(&mut self) -> Result<(), SyncError> {
        let snapshot = self.session.snapshot();
        let message = match &self.last_sent {
            Some(last) if last.seq == snapshot.seq => return Ok(()),
            Some(last) if self.settings.use_deltas => {
                Message::Delta(Delta::between(last, &snapshot))
            }
            _ => Message::Snapshot(snapshot.clone()),
        };
        self.send(message)?;
        self.last_sent = Some(snapshot);
        Ok(())
    }

    /// Pushes the full state; observers apply it no matter what they hold.
    pub fn force_correction(&mut self) -> Result<(), SyncError> {
        let snapshot = self.session.snapshot();
        self.send(Message::Correction(snapshot.clone()))?;
        self.last_sent = Some(snapshot);
        Ok(())
    }

    pub fn end(&mut self) -> Result<(), SyncError> {
        self.session.end();
        self.publish()?;
        self.send(Message::End)
    }

    pub fn transport_lost(&mut self) {
        warn("authority lost its transport; session suspended");
        self.session.suspend();
    }

    /// Re-announces the seed and state, then lets the game move again.
    pub fn transport_restored(&mut self) -> Result<(), SyncError> {
        self.announce_seed()?;
        self.force_correction()?;
        self.session.resume();
        Ok(())
    }

    fn send(&mut self, message: Message) -> Result<(), SyncError> {
        if let Err(e) = self.transport.send(&message) {
            warn(&format!("send failed: {e}"));
            self.session.suspend();
            return Err(e);
        }
        Ok(())
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Seed(_) => "seed",
        Message::Snapshot(_) => "snapshot",
        Message::Delta(_) => "delta",
        Message::Correction(_) => "correction",
        Message::RepairRequest(_) => "repair_request",
        Message::Input(_) => "input",
        Message::End => "end",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Seed,
    Replaced,
    Patched,
    /// Older than what is already shown, or not chainable.
    Discarded,
    Ended,
    Ignored,
}

/// Mirrors an authority. Never simulates; only applies what it receives.
pub struct Observer<T: Transport> {
    transport: T,
    settings: SyncSettings,
    announcement: Option<SeedAnnouncement>,
    state: Option<Snapshot>,
    last_check_ms: Option<u64>,
    missing_piece_checks: u32,
    awaiting_repair: bool,
    frozen: bool,
}

impl<T: Transport> Observer<T> {
    pub fn new(settings: SyncSettings, transport: T) -> Self {
        Self {
            transport,
            settings,
            announcement: None,
            state: None,
            last_check_ms: None,
            missing_piece_checks: 0,
            awaiting_repair: false,
            frozen: false,
        }
    }

    pub fn state(&self) -> Option<&Snapshot> {
        self.state.as_ref()
    }

    pub fn seed(&self) -> Option<u64> {
        self.announcement.as_ref().map(|a| a.seed)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn awaiting_repair(&self) -> bool {
        self.awaiting_repair
    }

    /// The piece a renderer may draw as live. Hidden once the game is over.
    pub fn live_piece(&self) -> Option<&Piece> {
        let state = self.state.as_ref()?;
        if state.game_over {
            return None;
        }
        state.current_piece.as_ref()
    }

    pub fn receive(&mut self, message: Message) -> Result<Applied, SyncError> {
        match message {
            Message::Seed(announcement) => {
                validate_seed(announcement.seed).inspect_err(|e| warn(&e.to_string()))?;
                log(&format!("observer got seed {}", announcement.seed));
                self.announcement = Some(announcement);
                self.state = None;
                self.missing_piece_checks = 0;
                self.awaiting_repair = false;
                self.frozen = false;
                Ok(Applied::Seed)
            }
            Message::Snapshot(snapshot) => {
                snapshot.validate().inspect_err(|e| warn(&e.to_string()))?;
                if let Some(current) = &self.state {
                    if snapshot.seq <= current.seq {
                        return Ok(Applied::Discarded);
                    }
                }
                self.replace(snapshot);
                Ok(Applied::Replaced)
            }
            Message::Correction(snapshot) => {
                snapshot.validate().inspect_err(|e| warn(&e.to_string()))?;
                if self.awaiting_repair {
                    log(&format!("repair applied at seq {}", snapshot.seq));
                }
                self.replace(snapshot);
                Ok(Applied::Replaced)
            }
            Message::Delta(delta) => self.receive_delta(delta),
            Message::End => {
                if let Some(state) = &mut self.state {
                    state.running = false;
                }
                Ok(Applied::Ended)
            }
            other => {
                warn(&format!("observer ignoring {}", message_kind(&other)));
                Ok(Applied::Ignored)
            }
        }
    }

    fn receive_delta(&mut self, delta: Delta) -> Result<Applied, SyncError> {
        let Some(current) = &self.state else {
            self.request_repair(DesyncKind::BrokenDeltaChain)?;
            return Ok(Applied::Discarded);
        };
        if delta.seq <= current.seq {
            return Ok(Applied::Discarded);
        }
        if delta.base_seq != current.seq {
            warn(&format!(
                "delta {}->{} does not chain onto {}",
                delta.base_seq, delta.seq, current.seq
            ));
            self.request_repair(DesyncKind::BrokenDeltaChain)?;
            return Ok(Applied::Discarded);
        }
        let next = delta
            .apply_to(current)
            .inspect_err(|e| warn(&e.to_string()))?;
        self.replace(next);
        Ok(Applied::Patched)
    }

    fn replace(&mut self, snapshot: Snapshot) {
        self.state = Some(snapshot);
        self.awaiting_repair = false;
        self.frozen = false;
    }

    /// Local input never touches local state; it goes to the authority and
    /// shows up in a later snapshot.
    pub fn forward(&mut self, op: Operation) -> Result<(), SyncError> {
        if self.announcement.is_none() && self.state.is_none() {
            return Err(SyncError::NotStarted);
        }
        self.transport.send(&Message::Input(op))
    }

    /// Invariant checks on the mirrored state, without side effects.
    pub fn detect_desync(&self) -> Option<DesyncKind> {
        let state = self.state.as_ref()?;
        if state.game_over {
            if let Some(piece) = &state.current_piece {
                let (_, spawn_y) = piece.kind().spawn_position();
                if (piece.y() - spawn_y).abs() <= self.settings.spawn_row_tolerance {
                    return Some(DesyncKind::StaleGameOver);
                }
                return Some(DesyncKind::GameOverWithLivePiece);
            }
        }
        if let (Some(current), Some(ghost)) = (&state.current_piece, &state.ghost_piece) {
            if current.kind() != ghost.kind() {
                return Some(DesyncKind::GhostMismatch);
            }
        }
        if let Some(announcement) = &self.announcement {
            if state.running && !state.next_pieces.is_empty() {
                let expected = project_queue(
                    &announcement.randomizer,
                    announcement.seed,
                    state.bag,
                    state.next_pieces.len(),
                );
                if expected != state.next_pieces {
                    return Some(DesyncKind::QueueMismatch);
                }
            }
        }
        None
    }

    /// Periodic reconciliation. Runs at most once per configured interval
    /// and asks for a repair when something is off.
    pub fn check_desync(&mut self, now_ms: u64) -> Result<Option<DesyncKind>, SyncError> {
        if self.frozen {
            return Ok(None);
        }
        let Some(state) = &self.state else {
            return Ok(None);
        };
        if let Some(last) = self.last_check_ms {
            if now_ms.saturating_sub(last) < self.settings.desync_check_interval_ms {
                return Ok(None);
            }
        }
        self.last_check_ms = Some(now_ms);

        let missing = state.running && !state.game_over && state.current_piece.is_none();
        self.missing_piece_checks = if missing {
            self.missing_piece_checks + 1
        } else {
            0
        };
        let kind = self.detect_desync().or_else(|| {
            (self.missing_piece_checks > self.settings.null_piece_grace_checks)
                .then_some(DesyncKind::MissingPiece)
        });
        if let Some(kind) = kind {
            warn(&format!("desync detected: {kind:?}"));
            self.request_repair(kind)?;
        }
        Ok(kind)
    }

    pub fn request_repair(&mut self, reason: DesyncKind) -> Result<(), SyncError> {
        let request = RepairRequest {
            reason,
            last_seq: self.state.as_ref().map(|s| s.seq),
        };
        self.transport.send(&Message::RepairRequest(request))?;
        self.awaiting_repair = true;
        Ok(())
    }

    /// Stops trusting the mirror until fresh state arrives.
    pub fn transport_lost(&mut self) {
        warn("observer lost its transport; view frozen");
        self.frozen = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Rotation, Tetromino};

    fn observer() -> Observer<Outbox> {
        Observer::new(SyncSettings::default(), Outbox::new())
    }

    fn running_snapshot() -> Snapshot {
        let mut session = Session::new(GameSettings::default());
        session.start(5).unwrap();
        session.tick(0);
        session.snapshot()
    }

    #[test]
    fn older_snapshots_are_discarded_but_corrections_win() {
        let mut obs = observer();
        let mut newer = running_snapshot();
        newer.seq = 10;
        let mut older = newer.clone();
        older.seq = 4;
        older.score = 999;

        assert_eq!(obs.receive(Message::Snapshot(newer.clone())).unwrap(), Applied::Replaced);
        assert_eq!(obs.receive(Message::Snapshot(older.clone())).unwrap(), Applied::Discarded);
        assert_eq!(obs.state().unwrap().score, newer.score);

        assert_eq!(obs.receive(Message::Correction(older)).unwrap(), Applied::Replaced);
        assert_eq!(obs.state().unwrap().score, 999);
    }

    #[test]
    fn corrupt_snapshot_keeps_previous_state() {
        let mut obs = observer();
        let good = running_snapshot();
        obs.receive(Message::Snapshot(good.clone())).unwrap();

        let mut bad = good.clone();
        bad.seq += 1;
        bad.current_piece = Some(Piece::new(Tetromino::T, 40, 3, Rotation::Spawn));
        assert!(matches!(
            obs.receive(Message::Snapshot(bad)),
            Err(SyncError::InvalidSnapshot(_))
        ));
        assert_eq!(obs.state(), Some(&good));
    }

    #[test]
    fn game_over_with_piece_is_flagged_and_hidden() {
        let mut obs = observer();
        let mut snap = running_snapshot();
        snap.game_over = true;
        obs.receive(Message::Snapshot(snap)).unwrap();

        assert!(obs.live_piece().is_none());
        assert_eq!(obs.check_desync(0).unwrap(), Some(DesyncKind::StaleGameOver));
        assert!(obs.awaiting_repair());
        let sent = obs.transport_mut().drain();
        assert!(matches!(
            sent.as_slice(),
            [Message::RepairRequest(RepairRequest { reason: DesyncKind::StaleGameOver, .. })]
        ));
    }

    #[test]
    fn game_over_with_fallen_piece_is_the_general_case() {
        let mut obs = observer();
        let mut snap = running_snapshot();
        let piece = snap.current_piece.take().unwrap();
        snap.current_piece = Some(Piece::new(piece.kind(), piece.x(), 12, piece.rotation()));
        snap.game_over = true;
        obs.receive(Message::Snapshot(snap)).unwrap();
        assert_eq!(obs.detect_desync(), Some(DesyncKind::GameOverWithLivePiece));
    }

    #[test]
    fn ghost_type_mismatch_is_flagged() {
        let mut obs = observer();
        let mut snap = running_snapshot();
        let current = snap.current_piece.clone().unwrap();
        let other = Tetromino::all()
            .into_iter()
            .find(|&t| t != current.kind())
            .unwrap();
        snap.ghost_piece = Some(Piece::new(other, 3, 10, Rotation::Spawn));
        obs.receive(Message::Snapshot(snap)).unwrap();
        assert_eq!(obs.detect_desync(), Some(DesyncKind::GhostMismatch));
    }

    #[test]
    fn missing_piece_needs_more_than_one_cycle() {
        let mut obs = observer();
        let mut snap = running_snapshot();
        snap.current_piece = None;
        snap.ghost_piece = None;
        obs.receive(Message::Snapshot(snap)).unwrap();

        assert_eq!(obs.check_desync(0).unwrap(), None);
        // Inside the interval nothing is checked.
        assert_eq!(obs.check_desync(100).unwrap(), None);
        assert_eq!(obs.check_desync(3000).unwrap(), Some(DesyncKind::MissingPiece));
    }

    #[test]
    fn queue_is_checked_against_the_seed() {
        let mut obs = observer();
        obs.receive(Message::Seed(SeedAnnouncement {
            seed: 5,
            randomizer: Default::default(),
            next_queue_len: 5,
        }))
        .unwrap();
        let snap = running_snapshot();
        obs.receive(Message::Snapshot(snap.clone())).unwrap();
        assert_eq!(obs.detect_desync(), None);

        let mut tampered = snap;
        tampered.seq += 1;
        tampered.next_pieces[0] =match tampered.next_pieces[0] {
            Tetromino::I => Tetromino::O,
            _ => Tetromino::I,
        };
        obs.receive(Message::Snapshot(tampered)).unwrap();
        assert_eq!(obs.detect_desync(), Some(DesyncKind::QueueMismatch));
    }

    #[test]
    fn delta_gap_requests_repair() {
        let mut obs = observer();
        let base = running_snapshot();
        obs.receive(Message::Snapshot(base.clone())).unwrap();

        let mut later = base.clone();
        later.seq += 5;
        later.score += 10;
        let mut gap = Delta::between(&base, &later);
        gap.base_seq += 2;
        assert_eq!(obs.receive(Message::Delta(gap)).unwrap(), Applied::Discarded);
        assert_eq!(obs.state(), Some(&base));
        assert!(obs.awaiting_repair());
    }

    #[test]
    fn frozen_observer_skips_checks_until_fresh_state() {
        let mut obs = observer();
        let mut snap = running_snapshot();
        snap.game_over = true;
        obs.receive(Message::Snapshot(snap.clone())).unwrap();
        obs.transport_lost();
        assert_eq!(obs.check_desync(0).unwrap(), None);

        snap.seq += 1;
        obs.receive(Message::Snapshot(snap)).unwrap();
        assert!(!obs.is_frozen());
        assert!(obs.check_desync(0).unwrap().is_some());
    }

    #[test]
    fn forward_sends_input_without_touching_state() {
        let mut obs = observer();
        assert!(matches!(obs.forward(Operation::Rotate), Err(SyncError::NotStarted)));
        let snap = running_snapshot();
        obs.receive(Message::Snapshot(snap.clone())).unwrap();
        obs.forward(Operation::MoveLeft).unwrap();
        assert_eq!(obs.state(), Some(&snap));
        assert_eq!(obs.transport_mut().drain(), vec![Message::Input(Operation::MoveLeft)]);
    }

    #[test]
    fn authority_answers_repair_with_correction() {
        let mut auth = Authority::new(GameSettings::default(), SyncSettings::default(), Outbox::new());
        auth.start(8).unwrap();
        auth.tick(0).unwrap();
        auth.transport_mut().drain();

        auth.handle(Message::RepairRequest(RepairRequest {
            reason: DesyncKind::GhostMismatch,
            last_seq: None,
        }))
        .unwrap();
        let sent = auth.transport_mut().drain();
        assert!(matches!(sent.as_slice(), [Message::Correction(_)]));
    }

    #[test]
    fn failed_send_suspends_the_session() {
        let mut auth = Authority::new(GameSettings::default(), SyncSettings::default(), Outbox::new());
        auth.start(8).unwrap();
        auth.tick(0).unwrap();
        auth.transport_mut().close();
        assert!(auth.handle(Message::Input(Operation::HardDrop)).is_err());
        assert!(auth.session().is_suspended());
        assert!(!auth.session().engine().board().is_empty());

        auth.transport_mut().reopen();
        auth.transport_restored().unwrap();
        assert!(!auth.session().is_suspended());
        let sent = auth.transport_mut().drain();
        assert!(matches!(sent.as_slice(), [.., Message::Seed(_), Message::Correction(_)]));
    }
}
