use serde::Deserialize;

/// One decoded notification. Every magnitude is kept exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SensorReading {
    pub heel: String,
    pub big_toe: String,
    pub arch: String,
    pub ball: String,
    pub sole: String,
    pub pitch: String,
    pub roll: String,
}

impl SensorReading {
    pub fn magnitude(&self, zone: Zone) -> &str {
        match zone {
            Zone::Heel => &self.heel,
            Zone::BigToe => &self.big_toe,
            Zone::Arch => &self.arch,
            Zone::Ball => &self.ball,
            Zone::Sole => &self.sole,
            Zone::Pitch => &self.pitch,
            Zone::Roll => &self.roll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Zone {
    Heel,
    BigToe,
    Arch,
    Ball,
    Sole,
    Pitch,
    Roll,
}

impl Zone {
    pub const ALL: [Zone; 7] = [Zone::Heel, Zone::BigToe, Zone::Arch, Zone::Ball, Zone::Sole, Zone::Pitch, Zone::Roll];
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Zone::Heel => "heel",
            Zone::BigToe => "big_toe",
            Zone::Arch => "arch",
            Zone::Ball => "ball",
            Zone::Sole => "sole",
            Zone::Pitch => "pitch",
            Zone::Roll => "roll",
        };

        write!(f, "{}", result)
    }
}

/// Color with each channel in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl Rgb {
    pub const fn new(red: f64, green: f64, blue: f64) -> Self {
        Rgb { red, green, blue }
    }

    pub fn channels(&self) -> [f64; 3] {
        [self.red, self.green, self.blue]
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [red, green, blue] = self.channels().map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8);
        write!(f, "#{:02x}{:02x}{:02x}", red, green, blue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Elevated,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedZone {
    pub zone: Zone,
    /// parsed and clamped to [0, 300]
    pub magnitude: i64,
    pub color: Rgb,
    pub severity: Severity,
}
