use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PresenceError;

pub const BLEND_PERIOD: Duration = Duration::from_secs(8);
pub const GLOW_PERIOD: Duration = Duration::from_secs(2);

const GLOW_REST_ALPHA: u8 = 0x33;
const GLOW_PEAK_ALPHA: u8 = 0x99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

fn lerp(from: u8, to: u8, weight: f64) -> u8 {
    (from as f64 + (to as f64 - from as f64) * weight).round() as u8
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Linear blend towards `other`; `weight` 0 is `self`, 1 is `other`.
    pub fn mix(self, other: Color, weight: f64) -> Color {
        let weight = weight.clamp(0.0, 1.0);
        Color {
            r: lerp(self.r, other.r, weight),
            g: lerp(self.g, other.g, weight),
            b: lerp(self.b, other.b, weight),
        }
    }
}

impl FromStr for Color {
    type Err = PresenceError;

    /// Accepts `#rrggbb` and `#rgb`, with or without the `#`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PresenceError::InvalidColor(s.to_owned());
        let hex = s.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Color::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => {
                let doubled = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
                Ok(Color::new(doubled(0)?, doubled(1)?, doubled(2)?))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Linear back-and-forth progress: 0 to 1 over the first half of the period,
/// back to 0 over the second.
#[derive(Debug, Clone, Copy)]
pub struct PingPong {
    period: Duration,
}

impl PingPong {
    pub fn new(period: Duration) -> Self {
        PingPong { period }
    }

    pub fn progress(&self, elapsed: Duration) -> f64 {
        let period = self.period.as_secs_f64();
        if period <= 0.0 {
            return 0.0;
        }
        let phase = (elapsed.as_secs_f64() % period) / period;
        if phase < 0.5 {
            phase * 2.0
        } else {
            2.0 - phase * 2.0
        }
    }
}

/// Background of the shared space, drifting between both participants' colors.
#[derive(Debug, Clone, Copy)]
pub struct ColorBlend {
    from: Color,
    to: Color,
    cycle: PingPong,
}

impl ColorBlend {
    pub fn new(from: Color, to: Color, period: Duration) -> Self {
        ColorBlend {
            from,
            to,
            cycle: PingPong::new(period),
        }
    }

    pub fn at_progress(&self, progress: f64) -> Color {
        self.from.mix(self.to, progress)
    }

    pub fn color_at(&self, elapsed: Duration) -> Color {
        self.at_progress(self.cycle.progress(elapsed))
    }
}

/// Opacity of the white glow over the shared circle.
#[derive(Debug, Clone, Copy)]
pub struct GlowPulse {
    cycle: PingPong,
}

impl GlowPulse {
    pub fn new(period: Duration) -> Self {
        GlowPulse {
            cycle: PingPong::new(period),
        }
    }

    pub fn alpha_at(&self, elapsed: Duration, holding_hands: bool) -> u8 {
        if !holding_hands {
            return GLOW_REST_ALPHA;
        }
        lerp(GLOW_REST_ALPHA, GLOW_PEAK_ALPHA, self.cycle.progress(elapsed))
    }
}
