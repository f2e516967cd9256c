use crate::Bearing;

/// Below this bearing change (in degrees) the road goes straight on.
const STRAIGHT_THRESHOLD: f64 = 20.0;
const SLIGHT_THRESHOLD: f64 = 45.0;
const TURN_THRESHOLD: f64 = 135.0;
const SHARP_THRESHOLD: f64 = 170.0;

/// Maneuver performed when moving from one road onto the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TurnType {
    Straight,
    SlightLeft,
    SlightRight,
    Left,
    Right,
    SharpLeft,
    SharpRight,
    UTurnLeft,
    UTurnRight,
    /// Entering a roundabout, leaving it at the given exit (1 based).
    EnterRoundabout { exit: usize },
    ExitRoundabout,
}

impl TurnType {
    /// Classifies the maneuver from the bearing the vehicle arrives with to the bearing it
    /// leaves with. U-turns are made towards the center of the road, which depends on the
    /// side of the road traffic keeps to.
    pub fn from_bearings(incoming: Bearing, outgoing: Bearing, left_side_navigation: bool) -> Self {
        let delta = incoming.delta(outgoing);
        let right = delta > 0.0;

        match delta.abs() {
            d if d < STRAIGHT_THRESHOLD => Self::Straight,
            d if d < SLIGHT_THRESHOLD => pick(right, Self::SlightRight, Self::SlightLeft),
            d if d < TURN_THRESHOLD => pick(right, Self::Right, Self::Left),
            d if d <= SHARP_THRESHOLD => pick(right, Self::SharpRight, Self::SharpLeft),
            _ if left_side_navigation => Self::UTurnRight,
            _ => Self::UTurnLeft,
        }
    }

    pub const fn is_left(&self) -> bool {
        matches!(self, Self::SlightLeft | Self::Left | Self::SharpLeft | Self::UTurnLeft)
    }

    pub const fn is_right(&self) -> bool {
        matches!(self, Self::SlightRight | Self::Right | Self::SharpRight | Self::UTurnRight)
    }

    pub const fn is_u_turn(&self) -> bool {
        matches!(self, Self::UTurnLeft | Self::UTurnRight)
    }

    /// Human readable instruction for the maneuver onto the named road.
    pub fn describe(&self, road_name: Option<&str>) -> String {
        let action = match self {
            Self::Straight => "Go straight".to_string(),
            Self::SlightLeft => "Turn slightly left".to_string(),
            Self::SlightRight => "Turn slightly right".to_string(),
            Self::Left => "Turn left".to_string(),
            Self::Right => "Turn right".to_string(),
            Self::SharpLeft => "Turn sharply left".to_string(),
            Self::SharpRight => "Turn sharply right".to_string(),
            Self::UTurnLeft | Self::UTurnRight => "Make a U-turn".to_string(),
            Self::EnterRoundabout { exit } => {
                format!("Enter the roundabout and take the {} exit", ordinal(*exit))
            }
            Self::ExitRoundabout => "Exit the roundabout".to_string(),
        };

        match road_name {
            Some(name) => format!("{action} onto {name}"),
            None => action,
        }
    }
}

const fn pick(right: bool, if_right: TurnType, if_left: TurnType) -> TurnType {
    if right { if_right } else { if_left }
}

fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}
