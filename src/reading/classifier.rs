use std::num::IntErrorKind;
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::reading::types::{ClassifiedZone, Rgb, SensorReading, Severity, Zone};

/**
 * Magnitudes are clamped to [0, MAX_MAGNITUDE] before classification.
 */
pub const MAX_MAGNITUDE: i64 = 300;

/**
 * Magnitudes from this value on are `Severity::Elevated`.
 */
pub const ELEVATED_THRESHOLD: i64 = 150;

/**
 * Magnitudes from this value on are `Severity::Critical`. The canonical gradient saturates here.
 */
pub const CRITICAL_THRESHOLD: i64 = 250;

/// Canonical blue → cyan → green → yellow → red gradient.
pub const GRADIENT: [(i64, Rgb); 9] = [
    (0, Rgb::new(0.0, 0.0, 1.0)),
    (27, Rgb::new(0.0, 1.0, 1.0)),
    (65, Rgb::new(0.0, 1.0, 0.0)),
    (102, Rgb::new(0.5, 1.0, 0.0)),
    (130, Rgb::new(1.0, 1.0, 0.0)),
    (167, Rgb::new(1.0, 0.75, 0.0)),
    (190, Rgb::new(1.0, 0.5, 0.0)),
    (222, Rgb::new(1.0, 0.25, 0.0)),
    (250, Rgb::new(1.0, 0.0, 0.0)),
];

/// Coarse green → yellow → red scale.
pub const COARSE_GRADIENT: [(i64, Rgb); 3] = [
    (0, Rgb::new(0.0, 1.0, 0.0)),
    (150, Rgb::new(1.0, 1.0, 0.0)),
    (300, Rgb::new(1.0, 0.0, 0.0)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClassifierMode {
    #[default]
    Gradient,
    Coarse,
}

impl ClassifierMode {
    pub fn stops(&self) -> &'static [(i64, Rgb)] {
        match self {
            ClassifierMode::Gradient => &GRADIENT,
            ClassifierMode::Coarse => &COARSE_GRADIENT,
        }
    }
}

/// Integers outside the `i64` range clamp like any other out of range value.
pub fn parse_magnitude(raw: &str) -> Result<i64, ClassifyError> {
    let value = match raw.trim().parse::<i64>() {
        Ok(value) => value,
        Err(source) => match source.kind() {
            IntErrorKind::PosOverflow => MAX_MAGNITUDE,
            IntErrorKind::NegOverflow => 0,
            _ => return Err(ClassifyError { value: raw.to_string(), source }),
        },
    };

    Ok(value.clamp(0, MAX_MAGNITUDE))
}

pub fn severity(magnitude: i64) -> Severity {
    if magnitude >= CRITICAL_THRESHOLD {
        Severity::Critical
    } else if magnitude >= ELEVATED_THRESHOLD {
        Severity::Elevated
    } else {
        Severity::Low
    }
}

/// Linear interpolation of every channel between two stops.
pub fn interpolate(lo: (i64, Rgb), hi: (i64, Rgb), value: i64) -> Rgb {
    let (lo_threshold, lo_color) = lo;
    let (hi_threshold, hi_color) = hi;
    let t = (value - lo_threshold) as f64 / (hi_threshold - lo_threshold) as f64;

    Rgb::new(
        lo_color.red + (hi_color.red - lo_color.red) * t,
        lo_color.green + (hi_color.green - lo_color.green) * t,
        lo_color.blue + (hi_color.blue - lo_color.blue) * t,
    )
}

/// Color of an already clamped magnitude. Values past the last stop take its color.
pub fn color_for(stops: &[(i64, Rgb)], value: i64) -> Rgb {
    for pair in stops.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if value <= hi.0 {
            return interpolate(lo, hi, value.max(lo.0));
        }
    }

    stops[stops.len() - 1].1
}

pub fn classify_magnitude(raw: &str, mode: ClassifierMode) -> Result<(i64, Rgb), ClassifyError> {
    let magnitude = parse_magnitude(raw)?;
    Ok((magnitude, color_for(mode.stops(), magnitude)))
}

pub fn classify_zone(reading: &SensorReading, zone: Zone, mode: ClassifierMode) -> Result<ClassifiedZone, ClassifyError> {
    let (magnitude, color) = classify_magnitude(reading.magnitude(zone), mode)?;

    Ok(ClassifiedZone {
        zone,
        magnitude,
        color,
        severity: severity(magnitude),
    })
}
