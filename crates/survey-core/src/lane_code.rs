//! Lane code parsing and formatting
//!
//! Lane codes arrive as short strings (`"1"`..`"4"`, `"-1"`, `"SK"`, `"SK1"`..`"SK4"`,
//! `"TK1"`..`"TK4"`, `"TM1"`..`"TM4"`). They are parsed once at the boundary into
//! [`LaneCode`] and rendered back to the same grammar through [`std::fmt::Display`].

use crate::SurveyError;
use std::fmt;
use std::str::FromStr;

/// A travel lane number in `1..=4`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneNumber(u8);

impl LaneNumber {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;

    /// Returns `None` outside `1..=4`
    pub const fn new(lane: u8) -> Option<Self> {
        if lane >= Self::MIN && lane <= Self::MAX {
            Some(Self(lane))
        } else {
            None
        }
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for LaneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a turn period (`TK` = left, `TM` = right)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TurnKind {
    Left,
    Right,
}

impl TurnKind {
    fn prefix(self) -> &'static str {
        match self {
            TurnKind::Left => "TK",
            TurnKind::Right => "TM",
        }
    }
}

/// Lane occupancy state of the survey vehicle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LaneCode {
    /// Regular travel lane
    Numeric(LaneNumber),
    /// Segment excluded from lane reporting (`-1`)
    Ignore,
    /// Shoulder, optionally next to a given lane
    Shoulder(Option<LaneNumber>),
    /// Turn period; `lane` is the lane the turn is made from
    Turn { kind: TurnKind, lane: LaneNumber },
}

impl LaneCode {
    /// Convenience constructor for a numeric lane
    pub fn lane(lane: u8) -> Option<Self> {
        LaneNumber::new(lane).map(LaneCode::Numeric)
    }

    /// Convenience constructor for a turn code
    pub fn turn(kind: TurnKind, lane: u8) -> Option<Self> {
        LaneNumber::new(lane).map(|lane| LaneCode::Turn { kind, lane })
    }

    /// Lane number carried by the code, if any
    pub fn lane_number(&self) -> Option<LaneNumber> {
        match self {
            LaneCode::Numeric(lane) => Some(*lane),
            LaneCode::Shoulder(lane) => *lane,
            LaneCode::Turn { lane, .. } => Some(*lane),
            LaneCode::Ignore => None,
        }
    }

    #[inline]
    pub fn is_turn(&self) -> bool {
        matches!(self, LaneCode::Turn { .. })
    }
}

impl fmt::Display for LaneCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneCode::Numeric(lane) => write!(f, "{lane}"),
            LaneCode::Ignore => f.write_str("-1"),
            LaneCode::Shoulder(None) => f.write_str("SK"),
            LaneCode::Shoulder(Some(lane)) => write!(f, "SK{lane}"),
            LaneCode::Turn { kind, lane } => write!(f, "{}{lane}", kind.prefix()),
        }
    }
}

impl FromStr for LaneCode {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let invalid = || SurveyError::InvalidLaneCode(s.to_string());

        fn digit(rest: &str) -> Option<LaneNumber> {
            match rest.as_bytes() {
                [d @ b'1'..=b'4'] => LaneNumber::new(d - b'0'),
                _ => None,
            }
        }

        if code == "-1" {
            return Ok(LaneCode::Ignore);
        }
        if code == "SK" {
            return Ok(LaneCode::Shoulder(None));
        }
        if let Some(rest) = code.strip_prefix("SK") {
            return digit(rest).map(|lane| LaneCode::Shoulder(Some(lane))).ok_or_else(invalid);
        }
        if let Some(rest) = code.strip_prefix("TK") {
            return digit(rest)
                .map(|lane| LaneCode::Turn {
                    kind: TurnKind::Left,
                    lane,
                })
                .ok_or_else(invalid);
        }
        if let Some(rest) = code.strip_prefix("TM") {
            return digit(rest)
                .map(|lane| LaneCode::Turn {
                    kind: TurnKind::Right,
                    lane,
                })
                .ok_or_else(invalid);
        }
        digit(code).map(LaneCode::Numeric).ok_or_else(invalid)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for LaneCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for LaneCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
