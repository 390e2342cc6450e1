#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use anyhow::Context;
#[cfg(not(target_arch = "wasm32"))]
use blockfall::{Authority, Config, Message, SyncError, Transport, MAX_SEED};
#[cfg(not(target_arch = "wasm32"))]
use clap::Parser;
#[cfg(not(target_arch = "wasm32"))]
use futures::{SinkExt, StreamExt};
#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;
#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};
#[cfg(not(target_arch = "wasm32"))]
use tokio::net::TcpListener;
#[cfg(not(target_arch = "wasm32"))]
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
#[cfg(not(target_arch = "wasm32"))]
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

/// Runs one authoritative game per websocket connection. The browser
/// client mirrors it and forwards its inputs back here.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Parser, Debug, Clone)]
struct Opts {
    /// Address to listen for websocket connections
    #[arg(long, default_value = "127.0.0.1:9000")]
    listen: String,
    /// Fixed seed for every game; random per connection when absent
    #[arg(long)]
    seed: Option<u64>,
    /// Gravity tick period in milliseconds
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,
    /// Optional JSON config with `game` and `sync` sections
    #[arg(long)]
    config: Option<PathBuf>,
}

#[cfg(not(target_arch = "wasm32"))]
struct ChannelTransport(UnboundedSender<String>);

#[cfg(not(target_arch = "wasm32"))]
impl Transport for ChannelTransport {
    fn send(&mut self, message: &Message) -> Result<(), SyncError> {
        let text = message.to_json()?;
        self.0
            .send(text)
            .map_err(|e| SyncError::Transport(e.to_string()))
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let config = match &opts.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Config::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Config::default(),
    };
    let listener = TcpListener::bind(&opts.listen).await?;
    println!("Authority listening on ws://{}", opts.listen);

    loop {
        let (stream, addr) = listener.accept().await?;
        println!("WS connected: {}", addr);
        let opts = opts.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, opts, config).await {
                eprintln!("connection error {}: {:?}", addr, e);
            }
        });
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn handle_conn(
    stream: tokio::net::TcpStream,
    opts: Opts,
    config: Config,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = unbounded_channel::<String>();

    let mut authority = Authority::new(config.game, config.sync, ChannelTransport(out_tx));
    let seed = opts.seed.unwrap_or_else(|| rand::random::<u64>() & MAX_SEED);
    authority.start(seed)?;
    println!("game started with seed {}", seed);

    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(opts.tick_ms.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                authority.tick(started.elapsed().as_millis() as u64)?;
            }
            Some(text) = out_rx.recv() => {
                ws_tx.send(WsMessage::Text(text)).await?;
            }
            Some(msg) = ws_rx.next() => {
                match msg {
                    Ok(WsMessage::Text(t)) => match Message::from_json(&t) {
                        Ok(message) => authority.handle(message)?,
                        Err(e) => eprintln!("dropping malformed message: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        eprintln!("websocket error: {}", e);
                        authority.transport_lost();
                        break;
                    }
                }
            }
            else => break,
        }
    }

    authority.end()?;
    while let Ok(text) = out_rx.try_recv() {
        if ws_tx.send(WsMessage::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
    Ok(())
}
