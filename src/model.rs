use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use approx::abs_diff_eq;
use geo::{Bearing as _, Closest, Distance, Haversine, HaversineClosestPoint, Line, Point};

/// Resolution of the fixed-point grid coordinates are quantized to (1e-7 degrees).
pub const COORDINATE_PRECISION: f64 = 1e7;

/// Coordinate pair stands for a pair of WGS84 longitude (lon) and latitude (lat) values.
/// Road geometries are quantized to a 1e-7 degree grid, so two roads touching the same
/// point always share bit-identical coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        const EPSILON: f64 = 1e-7;
        abs_diff_eq!(self.lon, other.lon, epsilon = EPSILON)
            && abs_diff_eq!(self.lat, other.lat, epsilon = EPSILON)
    }
}

impl Coordinate {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn from_fixed(lon: i32, lat: i32) -> Self {
        Self {
            lon: f64::from(lon) / COORDINATE_PRECISION,
            lat: f64::from(lat) / COORDINATE_PRECISION,
        }
    }

    /// Fixed-point representation used by the tile format and the intersection index.
    pub fn to_fixed(&self) -> (i32, i32) {
        (
            (self.lon * COORDINATE_PRECISION).round() as i32,
            (self.lat * COORDINATE_PRECISION).round() as i32,
        )
    }

    /// Snaps the coordinate onto the fixed-point grid.
    pub fn quantized(&self) -> Self {
        let (lon, lat) = self.to_fixed();
        Self::from_fixed(lon, lat)
    }

    pub fn point_key(&self) -> PointKey {
        let (lon, lat) = self.to_fixed();
        PointKey(lon, lat)
    }

    /// Great circle distance to the other coordinate.
    pub fn distance_to(&self, other: &Self) -> Length {
        Length::from_meters(Haversine.distance(self.to_point(), other.to_point()))
    }

    /// Initial bearing towards the other coordinate.
    pub fn bearing_to(&self, other: &Self) -> Bearing {
        Bearing::from_degrees(Haversine.bearing(self.to_point(), other.to_point()))
    }

    pub(crate) fn to_point(self) -> Point {
        Point::new(self.lon, self.lat)
    }
}

/// Exact key of a quantized coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointKey(pub i32, pub i32);

/// Distance in meters.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Length(f64);

impl Length {
    pub const ZERO: Self = Self(0.0);
    pub const MAX: Self = Self(f64::MAX);

    pub const fn from_meters(meters: f64) -> Self {
        Self(meters)
    }

    pub const fn meters(&self) -> f64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }
}

impl Add for Length {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Length {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Length {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Length {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul<f64> for Length {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Length {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, length| acc + length)
    }
}

/// The bearing describes the angle between the true North and the road, in degrees within
/// [0, 360).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Bearing(f64);

impl Bearing {
    pub fn from_degrees(degrees: f64) -> Self {
        Self(degrees.rem_euclid(360.0))
    }

    pub const fn degrees(&self) -> f64 {
        self.0
    }

    /// Signed angle in (-180, 180] to rotate from this bearing to the other one.
    /// Positive values are clockwise (turning right).
    pub fn delta(&self, other: Self) -> f64 {
        let delta = (other.0 - self.0).rem_euclid(360.0);
        if delta > 180.0 { delta - 360.0 } else { delta }
    }
}

/// Axis aligned lon/lat box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub min: Coordinate,
    pub max: Coordinate,
}

impl BoundingBox {
    pub const fn new(min: Coordinate, max: Coordinate) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all the coordinates, None if there are no coordinates.
    pub fn from_coordinates<'a>(
        coordinates: impl IntoIterator<Item = &'a Coordinate>,
    ) -> Option<Self> {
        coordinates.into_iter().fold(None, |bbox, c| {
            Some(match bbox {
                None => Self::new(*c, *c),
                Some(bbox) => bbox.including(c),
            })
        })
    }

    pub fn including(&self, c: &Coordinate) -> Self {
        Self {
            min: Coordinate::new(self.min.lon.min(c.lon), self.min.lat.min(c.lat)),
            max: Coordinate::new(self.max.lon.max(c.lon), self.max.lat.max(c.lat)),
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        self.including(&other.min).including(&other.max)
    }

    pub fn contains(&self, c: &Coordinate) -> bool {
        (self.min.lon..=self.max.lon).contains(&c.lon)
            && (self.min.lat..=self.max.lat).contains(&c.lat)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.min.lon <= other.max.lon
            && other.min.lon <= self.max.lon
            && self.min.lat <= other.max.lat
            && other.min.lat <= self.max.lat
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min.lon + self.max.lon) / 2.0,
            (self.min.lat + self.max.lat) / 2.0,
        )
    }

    /// Grows the box on every side by (approximately) the given distance.
    pub fn expand(&self, distance: Length) -> Self {
        const METERS_PER_DEGREE: f64 = 111_320.0;
        let dlat = distance.meters() / METERS_PER_DEGREE;
        let cos = self.center().lat.to_radians().cos().max(0.01);
        let dlon = dlat / cos;

        Self {
            min: Coordinate::new(self.min.lon - dlon, self.min.lat - dlat),
            max: Coordinate::new(self.max.lon + dlon, self.max.lat + dlat),
        }
    }
}

/// Identity of a road object in the map data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RoadId(pub u64);

/// Functional classification of a road, from the most to the least important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum RoadClass {
    Motorway = 0,
    Trunk = 1,
    Primary = 2,
    Secondary = 3,
    Tertiary = 4,
    Residential = 5,
    Service = 6,
    /// Unpaved agricultural or forest road.
    Track = 7,
    Cycleway = 8,
    Footway = 9,
    Steps = 10,
    Ferry = 11,
}

impl RoadClass {
    pub const COUNT: usize = 12;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Motorway,
        Self::Trunk,
        Self::Primary,
        Self::Secondary,
        Self::Tertiary,
        Self::Residential,
        Self::Service,
        Self::Track,
        Self::Cycleway,
        Self::Footway,
        Self::Steps,
        Self::Ferry,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl Default for RoadClass {
    fn default() -> Self {
        Self::Residential
    }
}

/// Direction of travel along a road polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Towards increasing point indices.
    Forward,
    /// Towards decreasing point indices.
    Backward,
}

impl Direction {
    pub const BOTH: [Self; 2] = [Self::Forward, Self::Backward];

    pub const fn reverse(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }

    /// Index of the point reached by moving one step from `point` in this direction.
    pub fn step(self, point: usize, len: usize) -> Option<usize> {
        match self {
            Self::Forward => Some(point + 1).filter(|&next| next < len),
            Self::Backward => point.checked_sub(1),
        }
    }
}

/// Traversal permission of a road relative to its polyline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Oneway {
    #[default]
    Both = 0,
    Forward = 1,
    Backward = 2,
}

impl Oneway {
    pub const fn allows(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Self::Both, _)
                | (Self::Forward, Direction::Forward)
                | (Self::Backward, Direction::Backward)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RestrictionKind {
    /// Turning into the target road is forbidden.
    No = 0,
    /// Turning into the target road is the only allowed turn.
    Only = 1,
}

/// Restriction on turning from the road that owns it into the target road.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnRestriction {
    pub kind: RestrictionKind,
    pub to: RoadId,
}

/// An edge of the road graph: a polyline with its traversal attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoadSegment {
    pub id: RoadId,
    pub name: Option<String>,
    pub class: RoadClass,
    pub oneway: Oneway,
    pub roundabout: bool,
    pub toll: bool,
    /// Posted speed limit in km/h.
    pub max_speed: Option<f64>,
    pub points: Vec<Coordinate>,
    pub restrictions: Vec<TurnRestriction>,
}

impl RoadSegment {
    pub fn new(id: RoadId, class: RoadClass, points: impl IntoIterator<Item = Coordinate>) -> Self {
        Self {
            id,
            class,
            points: points.into_iter().map(|c| c.quantized()).collect(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_oneway(mut self, oneway: Oneway) -> Self {
        self.oneway = oneway;
        self
    }

    pub fn with_roundabout(mut self) -> Self {
        self.roundabout = true;
        self.oneway = Oneway::Forward;
        self
    }

    pub fn with_toll(mut self) -> Self {
        self.toll = true;
        self
    }

    pub fn with_max_speed(mut self, kmh: f64) -> Self {
        self.max_speed = Some(kmh);
        self
    }

    pub fn with_restriction(mut self, kind: RestrictionKind, to: RoadId) -> Self {
        self.restrictions.push(TurnRestriction { kind, to });
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn allows(&self, direction: Direction) -> bool {
        self.oneway.allows(direction)
    }

    pub fn point(&self, index: usize) -> Option<Coordinate> {
        self.points.get(index).copied()
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_coordinates(&self.points)
    }

    /// Length of the polyline between two point indices, in either order.
    pub fn length_between(&self, from: usize, to: usize) -> Length {
        let (start, end) = if from <= to { (from, to) } else { (to, from) };
        self.points
            .get(start..=end.min(self.points.len().saturating_sub(1)))
            .into_iter()
            .flat_map(|points| points.windows(2))
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }

    /// Polyline edge passing closest to the coordinate: the index of its first point and the
    /// distance to it. The first edge wins ties. None if the road has no edge.
    pub fn closest_edge(&self, coordinate: &Coordinate) -> Option<(usize, Length)> {
        let target = coordinate.to_point();

        self.points
            .windows(2)
            .enumerate()
            .filter_map(|(index, edge)| {
                let line = Line::new(edge[0].to_point(), edge[1].to_point());
                match line.haversine_closest_point(&target) {
                    Closest::SinglePoint(p) | Closest::Intersection(p) => {
                        Some((index, Length::from_meters(Haversine.distance(p, target))))
                    }
                    Closest::Indeterminate => None,
                }
            })
            .min_by(|(_, a), (_, b)| a.meters().total_cmp(&b.meters()))
    }

    /// Bearing of the first non degenerate polyline edge leaving `point` in `direction`.
    pub fn bearing_from(&self, point: usize, direction: Direction) -> Option<Bearing> {
        let origin = self.point(point)?;
        let mut next = direction.step(point, self.len());
        while let Some(index) = next {
            let target = self.points[index];
            if target.point_key() != origin.point_key() {
                return Some(origin.bearing_to(&target));
            }
            next = direction.step(index, self.len());
        }
        None
    }

    /// Bearing of the last non degenerate polyline edge arriving at `point` while travelling in
    /// `direction`.
    pub fn bearing_into(&self, point: usize, direction: Direction) -> Option<Bearing> {
        let target = self.point(point)?;
        let mut previous = direction.reverse().step(point, self.len());
        while let Some(index) = previous {
            let origin = self.points[index];
            if origin.point_key() != target.point_key() {
                return Some(origin.bearing_to(&target));
            }
            previous = direction.reverse().step(index, self.len());
        }
        None
    }

    /// Returns true if turning from this road into the other one is not allowed.
    /// A restriction pointing back to the road itself is ignored.
    pub fn forbids_turn_into(&self, to: RoadId) -> bool {
        let mut has_only = false;

        for restriction in self.restrictions.iter().filter(|r| r.to != self.id) {
            match restriction.kind {
                RestrictionKind::No if restriction.to == to => return true,
                RestrictionKind::Only if restriction.to == to => return false,
                RestrictionKind::Only => has_only = true,
                RestrictionKind::No => (),
            }
        }

        has_only && to != self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn coordinate_quantization_001() {
        let c = Coordinate::new(13.123_456_789, 52.987_654_321);
        let q = c.quantized();
        assert_eq!(q.to_fixed(), (131_234_568, 529_876_543));
        assert_eq!(q.quantized().to_fixed(), q.to_fixed());
        assert_eq!(c.point_key(), q.point_key());
    }

    #[test]
    fn coordinate_distance_001() {
        let a = Coordinate::new(13.400, 52.500);
        let b = Coordinate::new(13.400, 52.501);
        assert_relative_eq!(a.distance_to(&b).meters(), 111.19, epsilon = 0.1);
        assert_relative_eq!(a.bearing_to(&b).degrees(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(b.bearing_to(&a).degrees(), 180.0, epsilon = 1e-6);
    }

    #[test]
    fn bearing_delta_001() {
        let east = Bearing::from_degrees(90.0);
        assert_relative_eq!(east.delta(Bearing::from_degrees(180.0)), 90.0);
        assert_relative_eq!(east.delta(Bearing::from_degrees(0.0)), -90.0);
        assert_relative_eq!(Bearing::from_degrees(350.0).delta(Bearing::from_degrees(10.0)), 20.0);
        assert_relative_eq!(Bearing::from_degrees(-90.0).degrees(), 270.0);
    }

    #[test]
    fn bounding_box_001() {
        let a = BoundingBox::new(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0));
        let b = BoundingBox::new(Coordinate::new(1.0, 1.0), Coordinate::new(2.0, 2.0));
        let c = BoundingBox::new(Coordinate::new(1.5, 0.0), Coordinate::new(2.0, 0.5));

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.contains(&Coordinate::new(0.5, 0.5)));
        assert!(a.expand(Length::from_meters(1000.0)).contains(&Coordinate::new(-0.005, 0.5)));
    }

    #[test]
    fn road_restrictions_001() {
        let road = RoadSegment::new(RoadId(1), RoadClass::Primary, [])
            .with_restriction(RestrictionKind::No, RoadId(2));
        assert!(road.forbids_turn_into(RoadId(2)));
        assert!(!road.forbids_turn_into(RoadId(3)));

        let road = RoadSegment::new(RoadId(1), RoadClass::Primary, [])
            .with_restriction(RestrictionKind::Only, RoadId(3));
        assert!(road.forbids_turn_into(RoadId(2)));
        assert!(!road.forbids_turn_into(RoadId(3)));
        assert!(!road.forbids_turn_into(RoadId(1)));

        // malformed restriction onto itself
        let road = RoadSegment::new(RoadId(1), RoadClass::Primary, [])
            .with_restriction(RestrictionKind::No, RoadId(1));
        assert!(!road.forbids_turn_into(RoadId(1)));
    }

    #[test]
    fn road_geometry_001() {
        let road = RoadSegment::new(
            RoadId(1),
            RoadClass::Primary,
            [
                Coordinate::new(13.400, 52.500),
                Coordinate::new(13.400, 52.500),
                Coordinate::new(13.401, 52.500),
            ],
        );

        let (forward, backward) = (Direction::Forward, Direction::Backward);
        let deg = |bearing: Option<Bearing>| bearing.unwrap().degrees();
        assert_relative_eq!(deg(road.bearing_from(0, forward)), 90.0, epsilon = 0.01);
        assert_relative_eq!(deg(road.bearing_into(2, forward)), 90.0, epsilon = 0.01);
        assert_relative_eq!(deg(road.bearing_from(2, backward)), 270.0, epsilon = 0.01);
        assert!(road.bearing_from(2, Direction::Forward).is_none());
        assert_relative_eq!(road.length_between(2, 0).meters(), road.length_between(0, 2).meters());
        assert_eq!(Direction::Backward.step(0, 3), None);
        assert_eq!(Direction::Forward.step(1, 3), Some(2));
    }

    #[test]
    fn road_closest_edge_001() {
        let road = RoadSegment::new(
            RoadId(1),
            RoadClass::Primary,
            [
                Coordinate::new(13.40, 52.50),
                Coordinate::new(13.43, 52.50),
                Coordinate::new(13.43, 52.52),
            ],
        );

        // far from every vertex but right next to the first edge
        let (edge, distance) = road.closest_edge(&Coordinate::new(13.415, 52.50001)).unwrap();
        assert_eq!(edge, 0);
        assert!(distance < Length::from_meters(2.0));

        let (edge, distance) = road.closest_edge(&Coordinate::new(13.431, 52.51)).unwrap();
        assert_eq!(edge, 1);
        assert_relative_eq!(distance.meters(), 67.9, epsilon = 1.0);

        let single = RoadSegment::new(RoadId(2), RoadClass::Primary, [Coordinate::new(13.4, 52.5)]);
        assert_eq!(single.closest_edge(&Coordinate::new(13.4, 52.5)), None);
    }
}
