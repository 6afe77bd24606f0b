use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Instant};

use crate::blend::{Color, ColorBlend, GlowPulse};
use crate::config::Config;
use crate::error::Result;
use crate::lifecycle::PresenceSession;
use crate::reconciler::DisplayState;
use crate::remote::RemoteStore;

pub struct JoinOptions {
    pub server: String,
    pub me: String,
    pub friend: String,
    pub friend_name: String,
    pub my_color: Color,
    pub friend_color: Color,
}

enum Gesture {
    PressIn,
    PressOut,
    Quit,
}

fn parse_gesture(line: &str) -> Option<Gesture> {
    match line.trim() {
        "press" | "p" => Some(Gesture::PressIn),
        "release" | "r" => Some(Gesture::PressOut),
        "quit" | "q" => Some(Gesture::Quit),
        _ => None,
    }
}

/// Enters the shared space with `options.friend` and drives it from stdin
/// until `quit` or end of input.
pub async fn join(options: JoinOptions, config: &Config) -> Result<()> {
    let store = RemoteStore::connect(&options.server, &options.me).await?;
    let session = PresenceSession::mount(store, &options.me, &options.friend).await?;
    let touch = session.touch_handler();
    let mut views = session.watch();

    let blend = ColorBlend::new(
        options.my_color,
        options.friend_color,
        Duration::from_millis(config.blend_period_ms),
    );
    let glow = GlowPulse::new(Duration::from_millis(config.glow_period_ms));
    let started = Instant::now();
    let mut frames = interval(Duration::from_millis(500));
    let mut display = DisplayState::Waiting;

    info!("Type `press`, `release` or `quit`");
    info!("{}", display.caption(&options.friend_name));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match parse_gesture(&line) {
                    Some(Gesture::PressIn) => touch.press_in(),
                    Some(Gesture::PressOut) => touch.press_out(),
                    Some(Gesture::Quit) => break,
                    None => warn!("Unknown command {:?}", line.trim()),
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    warn!("Lost the shared space");
                    break;
                }
                let next = DisplayState::from(*views.borrow_and_update());
                if next != display {
                    display = next;
                    info!("{}", display.caption(&options.friend_name));
                }
            }
            _ = frames.tick() => {
                let elapsed = started.elapsed();
                debug!(
                    "background {} glow #ffffff{:02x} touching={}",
                    blend.color_at(elapsed),
                    glow.alpha_at(elapsed, display.glows()),
                    touch.is_touching()
                );
            }
        }
    }

    session.leave().await;
    Ok(())
}
