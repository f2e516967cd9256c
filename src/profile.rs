//! Vehicle profiles and the routing configuration resolved from them.

use std::fmt::Display;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::{ConfigError, Length, MAX_ZOOM, RoadClass, RoadSegment, TurnType};

/// A search needs at least this many tiles resident at the same time.
pub const MIN_WORKING_SET_TILES: usize = 4;

/// Expected in-memory size of a tile, used to size the working set.
pub const DEFAULT_TILE_SIZE_ESTIMATE: usize = 256 * 1024;

/// Priority given to roads the caller asked to avoid.
const AVOID_PRIORITY: f64 = 0.1;

/// Lowest priority a road class can be given: priorities are speed factors and must be
/// positive for travel times to stay finite.
const MIN_PRIORITY: f64 = 0.01;

const KMH_TO_MS: f64 = 1.0 / 3.6;

/// Kind of vehicle the route is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum VehicleProfile {
    Car,
    Bicycle,
    Pedestrian,
}

impl VehicleProfile {
    /// Typical speed in km/h on roads of the class, None if the class cannot be used.
    pub const fn base_speed(self, class: RoadClass) -> Option<f64> {
        use RoadClass::*;

        match self {
            Self::Car => match class {
                Motorway => Some(110.0),
                Trunk => Some(90.0),
                Primary => Some(70.0),
                Secondary => Some(60.0),
                Tertiary => Some(50.0),
                Residential => Some(30.0),
                Service => Some(20.0),
                Track => Some(15.0),
                Ferry => Some(20.0),
                Cycleway | Footway | Steps => None,
            },
            Self::Bicycle => match class {
                Motorway => None,
                Trunk | Primary => Some(16.0),
                Secondary | Tertiary | Residential | Service => Some(18.0),
                Track => Some(12.0),
                Cycleway => Some(20.0),
                Footway => Some(8.0),
                Steps => Some(2.0),
                Ferry => Some(15.0),
            },
            Self::Pedestrian => match class {
                Motorway | Trunk => None,
                Steps => Some(3.0),
                Ferry => Some(10.0),
                _ => Some(5.0),
            },
        }
    }

    /// Preference for roads of the class in (0, 1], applied as a speed factor.
    pub const fn base_priority(self, class: RoadClass) -> f64 {
        use RoadClass::*;

        match (self, class) {
            (Self::Car, Service | Track) => 0.7,
            (Self::Bicycle, Trunk | Primary) => 0.6,
            (Self::Bicycle, Cycleway) => 1.0,
            (Self::Bicycle, Secondary) => 0.8,
            (Self::Pedestrian, Primary | Secondary) => 0.9,
            _ => 1.0,
        }
    }

    /// Upper bound of the vehicle speed in km/h.
    pub const fn default_max_speed(self) -> f64 {
        match self {
            Self::Car => 130.0,
            Self::Bicycle => 25.0,
            Self::Pedestrian => 6.0,
        }
    }

    pub const fn default_turn_costs(self) -> TurnCosts {
        match self {
            Self::Car => TurnCosts {
                left: 6.0,
                right: 3.0,
                u_turn: 30.0,
            },
            Self::Bicycle => TurnCosts {
                left: 2.0,
                right: 1.0,
                u_turn: 5.0,
            },
            Self::Pedestrian => TurnCosts {
                left: 0.0,
                right: 0.0,
                u_turn: 0.0,
            },
        }
    }
}

/// Time penalties in seconds paid when turning, for right-hand traffic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnCosts {
    /// Turning across the oncoming traffic.
    pub left: f64,
    pub right: f64,
    pub u_turn: f64,
}

/// Immutable parameters of a route calculation, resolved once from a vehicle profile.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingConfiguration {
    pub profile: VehicleProfile,
    /// Maximum number of bytes of road graph tiles a search keeps in memory.
    pub memory_limit: usize,
    /// Speed in km/h of each road class, None for the excluded classes.
    pub speeds: [Option<f64>; RoadClass::COUNT],
    /// Speed factor of each road class in (0, 1].
    pub priorities: [f64; RoadClass::COUNT],
    pub avoid_toll: bool,
    pub avoid_ferries: bool,
    pub avoid_motorway: bool,
    /// Avoid tracks.
    pub avoid_unpaved: bool,
    /// Global speed cap in km/h.
    pub max_speed: f64,
    /// Heuristic inflation (>= 1) used by the fast calculation mode.
    pub heuristic_coefficient: f64,
    /// Maximum number of search nodes settled before giving up.
    pub max_visited_segments: usize,
    /// Maximum route cost in seconds.
    pub max_cost: f64,
    pub turn_costs: TurnCosts,
    pub tile_zoom: u8,
    pub tile_size_estimate: usize,
    /// Maximum distance from a route end point to the road it is snapped on.
    pub max_snap_distance: Length,
    /// Dumps the prepared route through the logs.
    pub print_route_information: bool,
}

impl RoutingConfiguration {
    /// Resolves the profile into a configuration, overriding the defaults with the parameters.
    /// Unknown parameters are ignored and values that cannot be parsed keep their default.
    pub fn build<K, V>(
        profile: VehicleProfile,
        memory_limit: usize,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, ConfigError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::from_profile(profile, memory_limit);

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "avoid_toll" => parse_param(key, value, &mut config.avoid_toll),
                "avoid_ferries" => parse_param(key, value, &mut config.avoid_ferries),
                "avoid_motorway" => parse_param(key, value, &mut config.avoid_motorway),
                "avoid_unpaved" => parse_param(key, value, &mut config.avoid_unpaved),
                "max_speed" => parse_param(key, value, &mut config.max_speed),
                "heuristic_coefficient" => {
                    parse_param(key, value, &mut config.heuristic_coefficient)
                }
                "max_visited_segments" => parse_param(key, value, &mut config.max_visited_segments),
                "max_cost" => parse_param(key, value, &mut config.max_cost),
                "left_turn_cost" => parse_param(key, value, &mut config.turn_costs.left),
                "right_turn_cost" => parse_param(key, value, &mut config.turn_costs.right),
                "u_turn_cost" => parse_param(key, value, &mut config.turn_costs.u_turn),
                "tile_zoom" => parse_param(key, value, &mut config.tile_zoom),
                "tile_size_estimate" => parse_param(key, value, &mut config.tile_size_estimate),
                "max_snap_distance" => {
                    let mut meters = config.max_snap_distance.meters();
                    parse_param(key, value, &mut meters);
                    config.max_snap_distance = Length::from_meters(meters);
                }
                "print_route_information" => {
                    parse_param(key, value, &mut config.print_route_information)
                }
                _ => debug!("Ignoring unknown routing parameter {key}"),
            }
        }

        config.sanitize(profile);
        config.apply_avoidances();

        let required = config.min_working_set();
        if config.memory_limit < required {
            return Err(ConfigError::InsufficientMemoryBudget {
                limit: config.memory_limit,
                required,
            });
        }

        Ok(config)
    }

    /// Parses the profile name and builds its configuration.
    pub fn build_named<K, V>(
        profile: &str,
        memory_limit: usize,
        params: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, ConfigError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let profile = VehicleProfile::from_str(profile)
            .map_err(|_| ConfigError::UnknownProfile(profile.to_string()))?;
        Self::build(profile, memory_limit, params)
    }

    fn from_profile(profile: VehicleProfile, memory_limit: usize) -> Self {
        Self {
            profile,
            memory_limit,
            speeds: RoadClass::ALL.map(|class| profile.base_speed(class)),
            priorities: RoadClass::ALL.map(|class| profile.base_priority(class)),
            avoid_toll: false,
            avoid_ferries: false,
            avoid_motorway: false,
            avoid_unpaved: false,
            max_speed: profile.default_max_speed(),
            heuristic_coefficient: 1.5,
            max_visited_segments: 1_000_000,
            max_cost: 24.0 * 3600.0,
            turn_costs: profile.default_turn_costs(),
            tile_zoom: 16,
            tile_size_estimate: DEFAULT_TILE_SIZE_ESTIMATE,
            max_snap_distance: Length::from_meters(1000.0),
            print_route_information: false,
        }
    }

    fn sanitize(&mut self, profile: VehicleProfile) {
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            warn!("Invalid max speed {}, using the profile default", self.max_speed);
            self.max_speed = profile.default_max_speed();
        }
        if !(self.heuristic_coefficient.is_finite() && self.heuristic_coefficient >= 1.0) {
            warn!("Invalid heuristic coefficient {}, using 1", self.heuristic_coefficient);
            self.heuristic_coefficient = 1.0;
        }
        if !(1..=MAX_ZOOM).contains(&self.tile_zoom) {
            warn!("Invalid tile zoom {}, using 16", self.tile_zoom);
            self.tile_zoom = 16;
        }
        if self.tile_size_estimate == 0 {
            warn!("Invalid tile size estimate 0, using {DEFAULT_TILE_SIZE_ESTIMATE}");
            self.tile_size_estimate = DEFAULT_TILE_SIZE_ESTIMATE;
        }
        for cost in [
            &mut self.turn_costs.left,
            &mut self.turn_costs.right,
            &mut self.turn_costs.u_turn,
        ] {
            if !(cost.is_finite() && *cost >= 0.0) {
                *cost = 0.0;
            }
        }
    }

    fn apply_avoidances(&mut self) {
        let avoided = [
            (self.avoid_ferries, RoadClass::Ferry),
            (self.avoid_motorway, RoadClass::Motorway),
            (self.avoid_unpaved, RoadClass::Track),
        ];
        for (avoid, class) in avoided {
            if avoid {
                self.priorities[class.index()] *= AVOID_PRIORITY;
            }
        }
        for priority in &mut self.priorities {
            *priority = priority.clamp(MIN_PRIORITY, 1.0);
        }
    }

    /// Smallest memory limit the configuration accepts.
    pub const fn min_working_set(&self) -> usize {
        MIN_WORKING_SET_TILES.saturating_mul(self.tile_size_estimate)
    }

    pub fn is_traversable(&self, road: &RoadSegment) -> bool {
        self.speeds[road.class.index()].is_some()
    }

    /// Speed in m/s a vehicle is considered to travel at on the road, already reduced by the
    /// road priority. None if the road cannot be used.
    pub fn speed(&self, road: &RoadSegment) -> Option<f64> {
        let class = road.class.index();
        let base = self.speeds[class]?;
        let mut speed = base.min(self.max_speed);
        if let Some(posted) = road.max_speed.filter(|s| *s > 0.0) {
            speed = speed.min(posted);
        }

        let mut priority = self.priorities[class];
        if road.toll && self.avoid_toll {
            priority = (priority * AVOID_PRIORITY).max(MIN_PRIORITY);
        }

        Some(speed * priority * KMH_TO_MS)
    }

    /// Time in seconds to travel the given length of the road.
    pub fn travel_time(&self, road: &RoadSegment, length: Length) -> Option<f64> {
        self.speed(road).map(|speed| length.meters() / speed)
    }

    /// Highest speed in m/s reachable on any road, used to bound the remaining travel time.
    pub fn max_effective_speed(&self) -> f64 {
        RoadClass::ALL
            .iter()
            .filter_map(|class| {
                let speed = self.speeds[class.index()]?;
                Some(speed.min(self.max_speed) * self.priorities[class.index()])
            })
            .fold(MIN_PRIORITY, f64::max)
            * KMH_TO_MS
    }

    /// Lower bound of the time needed to travel the distance.
    pub fn min_travel_time(&self, distance: Length) -> f64 {
        distance.meters() / self.max_effective_speed()
    }

    /// Time in seconds paid for the maneuver. On left-side traffic the left and right costs
    /// are swapped.
    pub fn turn_cost(&self, turn: TurnType, left_side_navigation: bool) -> f64 {
        let (left, right) = if left_side_navigation {
            (self.turn_costs.right, self.turn_costs.left)
        } else {
            (self.turn_costs.left, self.turn_costs.right)
        };

        match turn {
            TurnType::Left | TurnType::SharpLeft => left,
            TurnType::Right | TurnType::SharpRight => right,
            TurnType::UTurnLeft | TurnType::UTurnRight => self.turn_costs.u_turn,
            TurnType::Straight
            | TurnType::SlightLeft
            | TurnType::SlightRight
            | TurnType::EnterRoundabout { .. }
            | TurnType::ExitRoundabout => 0.0,
        }
    }
}

fn parse_param<T>(key: &str, value: &str, target: &mut T)
where
    T: FromStr + Display,
{
    match value.parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!("Cannot parse routing parameter {key}={value}, keeping {target}"),
    }
}
