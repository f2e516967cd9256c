#![allow(dead_code)]

use std::sync::Arc;

use tileroute::{
    Coordinate, MemoryTileSource, Oneway, RestrictionKind, RoadClass, RoadId, RoadSegment,
    RoutingConfiguration, TileSource, VehicleProfile,
};

pub const NETWORK_ZOOM: u8 = 16;

pub fn memory_source(roads: impl IntoIterator<Item = RoadSegment>) -> Arc<dyn TileSource> {
    Arc::new(MemoryTileSource::from_roads(NETWORK_ZOOM, roads).unwrap())
}

pub fn config(profile: VehicleProfile, params: &[(&str, &str)]) -> RoutingConfiguration {
    RoutingConfiguration::build(profile, 64 << 20, params.iter().copied()).unwrap()
}

/// Oneway roads A -> B -> C -> D along the 52.5 parallel, plus a oneway bypass running from C
/// back to A along the 52.501 parallel.
pub fn collinear_network() -> Vec<RoadSegment> {
    let a = Coordinate::new(13.400, 52.500);
    let b = Coordinate::new(13.401, 52.500);
    let c = Coordinate::new(13.402, 52.500);
    let d = Coordinate::new(13.403, 52.500);

    vec![
        RoadSegment::new(RoadId(1), RoadClass::Secondary, [a, Coordinate::new(13.4005, 52.500), b])
            .with_name("First Street")
            .with_oneway(Oneway::Forward),
        RoadSegment::new(RoadId(2), RoadClass::Secondary, [b, c])
            .with_name("Second Street")
            .with_oneway(Oneway::Forward),
        RoadSegment::new(RoadId(3), RoadClass::Secondary, [c, d])
            .with_name("Third Street")
            .with_oneway(Oneway::Forward),
        RoadSegment::new(
            RoadId(10),
            RoadClass::Tertiary,
            [c, Coordinate::new(13.402, 52.501), Coordinate::new(13.400, 52.501), a],
        )
        .with_name("Bypass")
        .with_oneway(Oneway::Forward),
    ]
}

/// Two roads meeting at a right angle; turning from the first into the second is forbidden.
pub fn bend_network() -> Vec<RoadSegment> {
    let corner = Coordinate::new(13.401, 52.500);

    vec![
        RoadSegment::new(
            RoadId(1),
            RoadClass::Residential,
            [Coordinate::new(13.400, 52.500), corner],
        )
        .with_restriction(RestrictionKind::No, RoadId(2)),
        RoadSegment::new(
            RoadId(2),
            RoadClass::Residential,
            [corner, Coordinate::new(13.401, 52.501)],
        ),
    ]
}

/// Main Street running east with Side Street branching off to the north in its middle.
pub fn t_junction_network() -> Vec<RoadSegment> {
    let junction = Coordinate::new(13.401, 52.500);

    vec![
        RoadSegment::new(
            RoadId(1),
            RoadClass::Primary,
            [Coordinate::new(13.400, 52.500), junction, Coordinate::new(13.402, 52.500)],
        )
        .with_name("Main Street"),
        RoadSegment::new(
            RoadId(2),
            RoadClass::Residential,
            [junction, Coordinate::new(13.401, 52.501)],
        )
        .with_name("Side Street"),
    ]
}

/// A four arm roundabout (counterclockwise ring) centered on (13.405, 52.502).
pub fn roundabout_network() -> Vec<RoadSegment> {
    let west = Coordinate::new(13.4045, 52.502);
    let south = Coordinate::new(13.405, 52.5017);
    let east = Coordinate::new(13.4055, 52.502);
    let north = Coordinate::new(13.405, 52.5023);

    let ring = |id, from: Coordinate, via: Coordinate, to: Coordinate| {
        RoadSegment::new(RoadId(id), RoadClass::Tertiary, [from, via, to]).with_roundabout()
    };
    let arm = |id, from: Coordinate, to: Coordinate, name: &str| {
        RoadSegment::new(RoadId(id), RoadClass::Secondary, [from, to]).with_name(name)
    };

    vec![
        ring(20, west, Coordinate::new(13.40465, 52.50179), south),
        ring(21, south, Coordinate::new(13.40535, 52.50179), east),
        ring(22, east, Coordinate::new(13.40535, 52.50221), north),
        ring(23, north, Coordinate::new(13.40465, 52.50221), west),
        arm(30, Coordinate::new(13.403, 52.502), west, "West Road"),
        arm(31, south, Coordinate::new(13.405, 52.5005), "South Road"),
        arm(32, east, Coordinate::new(13.407, 52.502), "East Road"),
        arm(33, north, Coordinate::new(13.405, 52.5035), "North Road"),
    ]
}

/// Square grid of `size` x `size` vertices, `spacing` degrees apart, south west corner on
/// (13.4, 52.5). Rows are roads `100 + row` (row 0 is the primary Main Street, row 2 is oneway
/// eastwards), columns are roads `200 + column`.
pub fn grid_network(size: usize, spacing: f64) -> Vec<RoadSegment> {
    let vertex = |row: usize, column: usize| {
        Coordinate::new(13.4 + column as f64 * spacing, 52.5 + row as f64 * spacing)
    };

    let rows = (0..size).map(|row| {
        let road = RoadSegment::new(
            RoadId(100 + row as u64),
            if row == 0 { RoadClass::Primary } else { RoadClass::Residential },
            (0..size).map(|column| vertex(row, column)),
        );
        match row {
            0 => road.with_name("Main Street").with_max_speed(50.0),
            2 => road.with_name("Row 2 Street").with_oneway(Oneway::Forward),
            _ => road.with_name(format!("Row {row} Street")),
        }
    });

    let columns = (0..size).map(|column| {
        RoadSegment::new(
            RoadId(200 + column as u64),
            RoadClass::Residential,
            (0..size).map(|row| vertex(row, column)),
        )
        .with_name(format!("Column {column} Avenue"))
    });

    rows.chain(columns).collect()
}
