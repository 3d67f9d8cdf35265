//! Position catalog
//!
//! Static position codes and the built-in preset geometries. Coordinates use a
//! 0-100 pitch grid where:
//! - X: 0 = left touchline, 100 = right touchline
//! - Y: 0 = own goal line, 100 = opponent goal line

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

pub const PITCH_MIN: f64 = 0.0;
pub const PITCH_MAX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PositionCode {
    GK,
    LB,
    LCB,
    CB,
    RCB,
    RB,
    LWB,
    RWB,
    LDM,
    CDM,
    RDM,
    LM,
    LCM,
    CM,
    RCM,
    RM,
    LAM,
    CAM,
    RAM,
    LW,
    RW,
    LF,
    CF,
    RF,
    ST,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Line {
    Goalkeeper,
    Defence,
    Midfield,
    Attack,
}

impl PositionCode {
    pub const ALL: [PositionCode; 25] = [
        PositionCode::GK,
        PositionCode::LB,
        PositionCode::LCB,
        PositionCode::CB,
        PositionCode::RCB,
        PositionCode::RB,
        PositionCode::LWB,
        PositionCode::RWB,
        PositionCode::LDM,
        PositionCode::CDM,
        PositionCode::RDM,
        PositionCode::LM,
        PositionCode::LCM,
        PositionCode::CM,
        PositionCode::RCM,
        PositionCode::RM,
        PositionCode::LAM,
        PositionCode::CAM,
        PositionCode::RAM,
        PositionCode::LW,
        PositionCode::RW,
        PositionCode::LF,
        PositionCode::CF,
        PositionCode::RF,
        PositionCode::ST,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionCode::GK => "GK",
            PositionCode::LB => "LB",
            PositionCode::LCB => "LCB",
            PositionCode::CB => "CB",
            PositionCode::RCB => "RCB",
            PositionCode::RB => "RB",
            PositionCode::LWB => "LWB",
            PositionCode::RWB => "RWB",
            PositionCode::LDM => "LDM",
            PositionCode::CDM => "CDM",
            PositionCode::RDM => "RDM",
            PositionCode::LM => "LM",
            PositionCode::LCM => "LCM",
            PositionCode::CM => "CM",
            PositionCode::RCM => "RCM",
            PositionCode::RM => "RM",
            PositionCode::LAM => "LAM",
            PositionCode::CAM => "CAM",
            PositionCode::RAM => "RAM",
            PositionCode::LW => "LW",
            PositionCode::RW => "RW",
            PositionCode::LF => "LF",
            PositionCode::CF => "CF",
            PositionCode::RF => "RF",
            PositionCode::ST => "ST",
        }
    }

    pub fn line(&self) -> Line {
        match self {
            PositionCode::GK => Line::Goalkeeper,
            PositionCode::LB
            | PositionCode::LCB
            | PositionCode::CB
            | PositionCode::RCB
            | PositionCode::RB
            | PositionCode::LWB
            | PositionCode::RWB => Line::Defence,
            PositionCode::LDM
            | PositionCode::CDM
            | PositionCode::RDM
            | PositionCode::LM
            | PositionCode::LCM
            | PositionCode::CM
            | PositionCode::RCM
            | PositionCode::RM
            | PositionCode::LAM
            | PositionCode::CAM
            | PositionCode::RAM => Line::Midfield,
            PositionCode::LW
            | PositionCode::RW
            | PositionCode::LF
            | PositionCode::CF
            | PositionCode::RF
            | PositionCode::ST => Line::Attack,
        }
    }
}

impl FromStr for PositionCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        PositionCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == upper)
            .ok_or_else(|| AppError::validation("position", format!("Unknown position code: {}", s)))
    }
}

impl fmt::Display for PositionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Facing / run direction of a position, as a compass point where N points at
/// the opponent goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::N => "N",
            Direction::NE => "NE",
            Direction::E => "E",
            Direction::SE => "SE",
            Direction::S => "S",
            Direction::SW => "SW",
            Direction::W => "W",
            Direction::NW => "NW",
        }
    }
}

impl FromStr for Direction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" => Ok(Direction::N),
            "NE" => Ok(Direction::NE),
            "E" => Ok(Direction::E),
            "SE" => Ok(Direction::SE),
            "S" => Ok(Direction::S),
            "SW" => Ok(Direction::SW),
            "W" => Ok(Direction::W),
            "NW" => Ok(Direction::NW),
            _ => Err(AppError::validation(
                "direction",
                format!("Unknown direction: {}", s),
            )),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogSlot {
    pub position: PositionCode,
    pub x: f64,
    pub y: f64,
    pub direction: Direction,
}

const fn slot(position: PositionCode, x: f64, y: f64) -> CatalogSlot {
    CatalogSlot {
        position,
        x,
        y,
        direction: Direction::N,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub name: &'static str,
    pub system: &'static str,
    pub squad_size: i64,
    pub slots: &'static [CatalogSlot],
}

/// 5-a-side 2-2
const FIVE_A_SIDE_22: [CatalogSlot; 5] = [
    slot(PositionCode::GK, 50.0, 5.0),
    slot(PositionCode::LCB, 30.0, 25.0),
    slot(PositionCode::RCB, 70.0, 25.0),
    slot(PositionCode::LF, 30.0, 65.0),
    slot(PositionCode::RF, 70.0, 65.0),
];

/// 7-a-side 2-3-1
const SEVEN_A_SIDE_231: [CatalogSlot; 7] = [
    slot(PositionCode::GK, 50.0, 5.0),
    slot(PositionCode::LCB, 30.0, 22.0),
    slot(PositionCode::RCB, 70.0, 22.0),
    slot(PositionCode::LM, 15.0, 48.0),
    slot(PositionCode::CM, 50.0, 45.0),
    slot(PositionCode::RM, 85.0, 48.0),
    slot(PositionCode::ST, 50.0, 78.0),
];

/// 9-a-side 3-2-3
const NINE_A_SIDE_323: [CatalogSlot; 9] = [
    slot(PositionCode::GK, 50.0, 5.0),
    slot(PositionCode::LCB, 25.0, 22.0),
    slot(PositionCode::CB, 50.0, 18.0),
    slot(PositionCode::RCB, 75.0, 22.0),
    slot(PositionCode::LCM, 35.0, 45.0),
    slot(PositionCode::RCM, 65.0, 45.0),
    slot(PositionCode::LW, 15.0, 72.0),
    slot(PositionCode::ST, 50.0, 80.0),
    slot(PositionCode::RW, 85.0, 72.0),
];

/// 4-3-3
const ELEVEN_433: [CatalogSlot; 11] = [
    // Goalkeeper
    slot(PositionCode::GK, 50.0, 5.0),
    // Defense
    slot(PositionCode::LB, 15.0, 25.0),
    slot(PositionCode::LCB, 37.0, 20.0),
    slot(PositionCode::RCB, 63.0, 20.0),
    slot(PositionCode::RB, 85.0, 25.0),
    // Midfield (3)
    slot(PositionCode::LCM, 30.0, 45.0),
    slot(PositionCode::CM, 50.0, 42.0),
    slot(PositionCode::RCM, 70.0, 45.0),
    // Attack (3)
    slot(PositionCode::LW, 12.0, 75.0),
    slot(PositionCode::ST, 50.0, 82.0),
    slot(PositionCode::RW, 88.0, 75.0),
];

/// 4-4-2
const ELEVEN_442: [CatalogSlot; 11] = [
    slot(PositionCode::GK, 50.0, 5.0),
    slot(PositionCode::LB, 15.0, 25.0),
    slot(PositionCode::LCB, 35.0, 20.0),
    slot(PositionCode::RCB, 65.0, 20.0),
    slot(PositionCode::RB, 85.0, 25.0),
    slot(PositionCode::LM, 15.0, 50.0),
    slot(PositionCode::LCM, 35.0, 45.0),
    slot(PositionCode::RCM, 65.0, 45.0),
    slot(PositionCode::RM, 85.0, 50.0),
    slot(PositionCode::LF, 35.0, 78.0),
    slot(PositionCode::RF, 65.0, 78.0),
];

/// 4-2-3-1
const ELEVEN_4231: [CatalogSlot; 11] = [
    slot(PositionCode::GK, 50.0, 5.0),
    slot(PositionCode::LB, 15.0, 25.0),
    slot(PositionCode::LCB, 35.0, 20.0),
    slot(PositionCode::RCB, 65.0, 20.0),
    slot(PositionCode::RB, 85.0, 25.0),
    // Defensive Midfield (2)
    slot(PositionCode::LDM, 35.0, 38.0),
    slot(PositionCode::RDM, 65.0, 38.0),
    // Attacking Midfield (3)
    slot(PositionCode::LAM, 20.0, 62.0),
    slot(PositionCode::CAM, 50.0, 60.0),
    slot(PositionCode::RAM, 80.0, 62.0),
    slot(PositionCode::ST, 50.0, 82.0),
];

/// Ordered so the first preset for a squad size is its default geometry.
pub const PRESETS: [Preset; 6] = [
    Preset {
        name: "5-a-side 2-2",
        system: "2-2",
        squad_size: 5,
        slots: &FIVE_A_SIDE_22,
    },
    Preset {
        name: "7-a-side 2-3-1",
        system: "2-3-1",
        squad_size: 7,
        slots: &SEVEN_A_SIDE_231,
    },
    Preset {
        name: "9-a-side 3-2-3",
        system: "3-2-3",
        squad_size: 9,
        slots: &NINE_A_SIDE_323,
    },
    Preset {
        name: "4-3-3",
        system: "4-3-3",
        squad_size: 11,
        slots: &ELEVEN_433,
    },
    Preset {
        name: "4-4-2",
        system: "4-4-2",
        squad_size: 11,
        slots: &ELEVEN_442,
    },
    Preset {
        name: "4-2-3-1",
        system: "4-2-3-1",
        squad_size: 11,
        slots: &ELEVEN_4231,
    },
];

pub fn presets() -> &'static [Preset] {
    &PRESETS
}

pub fn default_layout(squad_size: i64) -> Option<&'static [CatalogSlot]> {
    PRESETS
        .iter()
        .find(|preset| preset.squad_size == squad_size)
        .map(|preset| preset.slots)
}

pub fn supported_squad_sizes() -> Vec<i64> {
    let mut sizes: Vec<i64> = PRESETS.iter().map(|preset| preset.squad_size).collect();
    sizes.dedup();
    sizes
}
