pub mod board;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod randomizer;
pub mod scoring;
pub mod session;
pub mod sync;

use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

pub use board::{Board, CellChange, BOARD_HEIGHT, BOARD_WIDTH};
pub use catalog::{KickTable, Rotation, Shape, Tetromino};
pub use config::{Config, GameSettings, SyncSettings};
pub use engine::{derive_ghost, DropResult, LockOutcome, Piece, PieceEngine, RotationDir};
pub use error::SyncError;
pub use protocol::{Delta, DesyncKind, Message, RepairRequest, SeedAnnouncement};
pub use randomizer::{BagCursor, Randomizer, RandomizerKind, MAX_SEED};
pub use session::{Event, Operation, Phase, Session, Snapshot};
pub use sync::{Applied, Authority, Observer, Outbox, Transport};

#[wasm_bindgen(start)]
pub fn bootstrap() {
    console_error_panic_hook::set_once();
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn log(msg: &str) {
    web_sys::console::log_1(&JsValue::from_str(msg));
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn log(msg: &str) {
    eprintln!("{msg}");
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn warn(msg: &str) {
    web_sys::console::warn_1(&JsValue::from_str(msg));
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn warn(msg: &str) {
    eprintln!("warning: {msg}");
}

fn js_err(e: SyncError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn seed_from_js(seed: Option<f64>) -> Result<u64, JsValue> {
    match seed {
        None => Ok(rand::random::<u64>() & MAX_SEED),
        Some(s) if s.is_finite() && s >= 0.0 && s.fract() == 0.0 && s <= MAX_SEED as f64 => {
            Ok(s as u64)
        }
        Some(s) => Err(JsValue::from_str(&format!("invalid seed {s}"))),
    }
}

/// Browser-side mirror of a remote game. Messages in, rendered state out;
/// anything it wants to say to the authority waits in `drainOutgoing`.
#[wasm_bindgen]
pub struct GameClient {
    observer: Observer<Outbox>,
}

#[wasm_bindgen]
impl GameClient {
    #[wasm_bindgen(constructor)]
    pub fn new(settings: JsValue) -> Result<GameClient, JsValue> {
        let settings: SyncSettings = from_value(settings).unwrap_or_default();
        Ok(Self {
            observer: Observer::new(settings, Outbox::new()),
        })
    }

    /// Applies one JSON message and returns the state to render.
    #[wasm_bindgen(js_name = receive)]
    pub fn receive(&mut self, json: &str) -> Result<JsValue, JsValue> {
        let message = Message::from_json(json).map_err(js_err)?;
        self.observer.receive(message).map_err(js_err)?;
        self.state()
    }

    #[wasm_bindgen(js_name = state)]
    pub fn state(&self) -> Result<JsValue, JsValue> {
        to_value(&self.observer.state()).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = livePiece)]
    pub fn live_piece(&self) -> Result<JsValue, JsValue> {
        to_value(&self.observer.live_piece()).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = input)]
    pub fn input(&mut self, op: JsValue) -> Result<(), JsValue> {
        let op: Operation = from_value(op)?;
        self.observer.forward(op).map_err(js_err)
    }

    #[wasm_bindgen(js_name = checkDesync)]
    pub fn check_desync(&mut self, now_ms: Option<f64>) -> Result<JsValue, JsValue> {
        let now = now_ms.unwrap_or_else(js_sys::Date::now) as u64;
        let found = self.observer.check_desync(now).map_err(js_err)?;
        to_value(&found).map_err(|e| e.into())
    }

    /// JSON strings queued for the authority, oldest first.
    #[wasm_bindgen(js_name = drainOutgoing)]
    pub fn drain_outgoing(&mut self) -> Result<JsValue, JsValue> {
        let encoded = self
            .observer
            .transport_mut()
            .drain()
            .iter()
            .map(Message::to_json)
            .collect::<Result<Vec<_>, _>>()
            .map_err(js_err)?;
        to_value(&encoded).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = transportLost)]
    pub fn transport_lost(&mut self) {
        self.observer.transport_lost();
    }
}

/// A local single-player game with no network in between.
#[wasm_bindgen]
pub struct SoloGame {
    session: Session,
}

#[wasm_bindgen]
impl SoloGame {
    #[wasm_bindgen(constructor)]
    pub fn new(settings: JsValue) -> Result<SoloGame, JsValue> {
        let settings: GameSettings = from_value(settings).unwrap_or_default();
        Ok(Self {
            session: Session::new(settings),
        })
    }

    /// Starts or restarts. Without a seed one is drawn from the browser RNG.
    #[wasm_bindgen(js_name = start)]
    pub fn start(&mut self, seed: Option<f64>) -> Result<JsValue, JsValue> {
        let seed = seed_from_js(seed)?;
        let snapshot = self.session.start(seed).map_err(js_err)?;
        to_value(&snapshot).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = tick)]
    pub fn tick(&mut self, now_ms: f64) -> Result<JsValue, JsValue> {
        let snapshot = self.session.step(Event::Tick {
            now_ms: now_ms as u64,
        });
        to_value(&snapshot).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = input)]
    pub fn input(&mut self, op: JsValue) -> Result<JsValue, JsValue> {
        let op: Operation = from_value(op)?;
        to_value(&self.session.step(Event::Input(op))).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = end)]
    pub fn end(&mut self) -> Result<JsValue, JsValue> {
        to_value(&self.session.end()).map_err(|e| e.into())
    }

    #[wasm_bindgen(js_name = seed)]
    pub fn seed(&self) -> Option<f64> {
        self.session.seed().map(|s| s as f64)
    }
}
