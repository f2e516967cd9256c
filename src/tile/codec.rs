//! Binary tile format.
//!
//! All integers are big endian. A tile is a header followed by road records:
//!
//! ```text
//! "RGT" version:u8 zoom:u8 x:u32 y:u32 roads:u32
//! record := length:u32 bbox:4*i32 id:u64 attributes:u8 max_speed:u16
//!           name_length:u16 name:[u8] points:u16 first:2*i32 deltas:[2*i32]
//!           restrictions:u8 [kind:u8 to:u64]
//! ```
//!
//! Every record starts with its byte length and bounding box so that a reader can skip the
//! roads that fall outside the region it is interested in without materializing them.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use tracing::warn;

use crate::tile::{RoadGraphTile, TileKey};
use crate::{
    BoundingBox, Coordinate, Oneway, RestrictionKind, RoadClass, RoadId, RoadSegment, SHIFT_ID,
    StoreError, TurnRestriction,
};

const MAGIC: &[u8; 3] = b"RGT";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 17;
/// Length prefix, bounding box, id, attributes, max speed, name length, points count and
/// restrictions count.
const MIN_RECORD_LEN: usize = 4 + 16 + 8 + 1 + 2 + 2 + 2 + 1;

/// Serializes the roads of a tile into its binary representation.
pub fn serialize_tile<'a>(
    key: TileKey,
    roads: impl IntoIterator<Item = &'a RoadSegment>,
) -> Result<Vec<u8>, StoreError> {
    let roads: Vec<_> = roads.into_iter().collect();

    let mut writer = TileBinaryWriter::default();
    writer.write_header(key, roads.len())?;
    for road in roads {
        writer.write_road(road)?;
    }

    Ok(writer.cursor.into_inner())
}

/// Deserializes the binary tile expected to hold the given key, materializing only the roads
/// whose bounding box intersects the region. Records that are malformed beyond repair fail the
/// whole tile, while recoverable defects (degenerate geometries, unknown restriction kinds) are
/// skipped.
pub fn deserialize_tile(
    data: &[u8],
    expected: TileKey,
    region: &BoundingBox,
) -> Result<RoadGraphTile, StoreError> {
    let mut reader = TileBinaryReader::new(data);
    let (key, count) = reader.read_header()?;
    if key != expected {
        return Err(StoreError::TileKeyMismatch {
            expected,
            found: key,
        });
    }

    // the header count is untrusted, every record takes at least MIN_RECORD_LEN bytes
    let remaining = data.len().saturating_sub(HEADER_LEN);
    let mut roads = Vec::with_capacity(count.min(remaining / MIN_RECORD_LEN));
    for _ in 0..count {
        if let Some(road) = reader.read_road(region)? {
            roads.push(Arc::new(road));
        }
    }

    Ok(RoadGraphTile::new(key, roads))
}

#[derive(Debug)]
struct TileBinaryReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> TileBinaryReader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn read_header(&mut self) -> Result<(TileKey, usize), StoreError> {
        let mut magic = [0u8; 3];
        self.cursor.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }

        let version = self.read_u8()?;
        if version != VERSION {
            return Err(StoreError::VersionNotSupported(version));
        }

        let zoom = self.read_u8()?;
        let x = self.read_u32()?;
        let y = self.read_u32()?;
        let count = self.read_u32()? as usize;

        let key = TileKey::new(zoom, x, y);
        if !key.is_valid() {
            return Err(StoreError::InvalidTileKey(key));
        }

        Ok((key, count))
    }

    fn read_road(&mut self, region: &BoundingBox) -> Result<Option<RoadSegment>, StoreError> {
        let length = u64::from(self.read_u32()?);
        let start = self.cursor.position();
        let end = start + length;
        if end > self.cursor.get_ref().len() as u64 {
            return Err(StoreError::IO(std::io::ErrorKind::UnexpectedEof));
        }

        let min = self.read_coordinate()?;
        let max = self.read_coordinate()?;
        if !BoundingBox::new(min, max).intersects(region) {
            self.cursor.seek(SeekFrom::Start(end))?;
            return Ok(None);
        }

        let id = RoadId(self.read_u64()?);
        let attributes = EncodedAttributes(self.read_u8()?);
        let max_speed = match self.read_u16()? {
            0 => None,
            speed => Some(f64::from(speed)),
        };

        let name_length = usize::from(self.read_u16()?);
        let mut name = vec![0u8; name_length];
        self.cursor.read_exact(&mut name)?;
        let name = String::from_utf8(name).map_err(|_| StoreError::InvalidName)?;

        let points_count = usize::from(self.read_u16()?);
        let mut points = Vec::with_capacity(points_count);
        if points_count > 0 {
            let (mut lon, mut lat) = self.read_fixed()?;
            points.push(Coordinate::from_fixed(lon, lat));
            for _ in 1..points_count {
                let (dlon, dlat) = self.read_fixed()?;
                lon = lon.wrapping_add(dlon);
                lat = lat.wrapping_add(dlat);
                points.push(Coordinate::from_fixed(lon, lat));
            }
        }

        let restrictions_count = self.read_u8()?;
        let mut restrictions = Vec::with_capacity(usize::from(restrictions_count));
        for _ in 0..restrictions_count {
            let kind = self.read_u8()?;
            let to = RoadId(self.read_u64()?);
            match RestrictionKind::try_from_byte(kind) {
                Some(kind) => restrictions.push(TurnRestriction { kind, to }),
                None => warn!("Ignoring road {id:?} restriction of unknown kind {kind}"),
            }
        }

        // the record may carry trailing fields written by newer encoders
        self.cursor.seek(SeekFrom::Start(end))?;

        if points.len() < 2 {
            warn!("Ignoring road {id:?} with {} points", points.len());
            return Ok(None);
        }

        Ok(Some(RoadSegment {
            id,
            name: Some(name).filter(|name| !name.is_empty()),
            class: attributes.class()?,
            oneway: attributes.oneway()?,
            roundabout: attributes.roundabout(),
            toll: attributes.toll(),
            max_speed,
            points,
            restrictions,
        }))
    }

    fn read_coordinate(&mut self) -> Result<Coordinate, StoreError> {
        let (lon, lat) = self.read_fixed()?;
        Ok(Coordinate::from_fixed(lon, lat))
    }

    fn read_fixed(&mut self) -> Result<(i32, i32), StoreError> {
        let lon = self.read_i32()?;
        let lat = self.read_i32()?;
        Ok((lon, lat))
    }

    fn read_u8(&mut self) -> Result<u8, StoreError> {
        let mut buf = [0u8; 1];
        self.cursor.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> Result<u16, StoreError> {
        let mut buf = [0u8; 2];
        self.cursor.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32, StoreError> {
        let mut buf = [0u8; 4];
        self.cursor.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_i32(&mut self) -> Result<i32, StoreError> {
        let mut buf = [0u8; 4];
        self.cursor.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64, StoreError> {
        let mut buf = [0u8; 8];
        self.cursor.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
}

#[derive(Debug, Default)]
struct TileBinaryWriter {
    cursor: Cursor<Vec<u8>>,
}

impl TileBinaryWriter {
    fn write_header(&mut self, key: TileKey, count: usize) -> Result<(), StoreError> {
        self.cursor.write_all(MAGIC)?;
        self.cursor.write_all(&[VERSION, key.zoom])?;
        self.cursor.write_all(&key.x.to_be_bytes())?;
        self.cursor.write_all(&key.y.to_be_bytes())?;
        let count =
            u32::try_from(count).map_err(|_| StoreError::IO(std::io::ErrorKind::InvalidInput))?;
        self.cursor.write_all(&count.to_be_bytes())?;
        Ok(())
    }

    fn write_road(&mut self, road: &RoadSegment) -> Result<(), StoreError> {
        if road.id.0 >> (u64::BITS - SHIFT_ID) != 0 {
            return Err(StoreError::InvalidRoadId(road.id));
        }

        let bbox = road.bbox().ok_or(StoreError::InvalidGeometry(road.id))?;
        let points_count =
            u16::try_from(road.points.len()).map_err(|_| StoreError::InvalidGeometry(road.id))?;
        let restrictions_count = u8::try_from(road.restrictions.len())
            .map_err(|_| StoreError::InvalidGeometry(road.id))?;
        let name = road.name.as_deref().unwrap_or_default().as_bytes();
        let name_length = u16::try_from(name.len()).map_err(|_| StoreError::InvalidName)?;
        let max_speed = road
            .max_speed
            .map_or(0, |speed| speed.round().clamp(1.0, f64::from(u16::MAX)) as u16);

        let mut record = Cursor::new(Vec::new());
        write_coordinate(&mut record, &bbox.min)?;
        write_coordinate(&mut record, &bbox.max)?;
        record.write_all(&road.id.0.to_be_bytes())?;
        record.write_all(&[EncodedAttributes::from(road).0])?;
        record.write_all(&max_speed.to_be_bytes())?;
        record.write_all(&name_length.to_be_bytes())?;
        record.write_all(name)?;
        record.write_all(&points_count.to_be_bytes())?;

        let mut previous = (0i32, 0i32);
        for (index, point) in road.points.iter().enumerate() {
            let (lon, lat) = point.to_fixed();
            let (dlon, dlat) = if index == 0 {
                (lon, lat)
            } else {
                (lon.wrapping_sub(previous.0), lat.wrapping_sub(previous.1))
            };
            record.write_all(&dlon.to_be_bytes())?;
            record.write_all(&dlat.to_be_bytes())?;
            previous = (lon, lat);
        }

        record.write_all(&[restrictions_count])?;
        for restriction in &road.restrictions {
            record.write_all(&[restriction.kind.into_byte()])?;
            record.write_all(&restriction.to.0.to_be_bytes())?;
        }

        let record = record.into_inner();
        let length =
            u32::try_from(record.len()).map_err(|_| StoreError::InvalidGeometry(road.id))?;
        self.cursor.write_all(&length.to_be_bytes())?;
        self.cursor.write_all(&record)?;
        Ok(())
    }
}

fn write_coordinate(writer: &mut impl Write, coordinate: &Coordinate) -> Result<(), StoreError> {
    let (lon, lat) = coordinate.to_fixed();
    writer.write_all(&lon.to_be_bytes())?;
    writer.write_all(&lat.to_be_bytes())?;
    Ok(())
}

/// Road attributes packed in a single byte: class (4 bits), oneway (2 bits), roundabout and toll.
#[derive(Debug, Clone, Copy)]
struct EncodedAttributes(u8);

impl From<&RoadSegment> for EncodedAttributes {
    fn from(road: &RoadSegment) -> Self {
        Self(
            road.class.into_byte() << 4
                | road.oneway.into_byte() << 2
                | u8::from(road.roundabout) << 1
                | u8::from(road.toll),
        )
    }
}

impl EncodedAttributes {
    const fn class(&self) -> Result<RoadClass, StoreError> {
        RoadClass::try_from_byte(self.0 >> 4)
    }

    const fn oneway(&self) -> Result<Oneway, StoreError> {
        Oneway::try_from_byte((self.0 >> 2) & 0b11)
    }

    const fn roundabout(&self) -> bool {
        self.0 & 0b10 != 0
    }

    const fn toll(&self) -> bool {
        self.0 & 0b01 != 0
    }
}

impl RoadClass {
    pub(crate) const fn try_from_byte(byte: u8) -> Result<Self, StoreError> {
        match byte {
            0 => Ok(Self::Motorway),
            1 => Ok(Self::Trunk),
            2 => Ok(Self::Primary),
            3 => Ok(Self::Secondary),
            4 => Ok(Self::Tertiary),
            5 => Ok(Self::Residential),
            6 => Ok(Self::Service),
            7 => Ok(Self::Track),
            8 => Ok(Self::Cycleway),
            9 => Ok(Self::Footway),
            10 => Ok(Self::Steps),
            11 => Ok(Self::Ferry),
            _ => Err(StoreError::InvalidRoadClass(byte)),
        }
    }

    pub(crate) const fn into_byte(self) -> u8 {
        self as u8
    }
}

impl Oneway {
    pub(crate) const fn try_from_byte(byte: u8) -> Result<Self, StoreError> {
        match byte {
            0 => Ok(Self::Both),
            1 => Ok(Self::Forward),
            2 => Ok(Self::Backward),
            _ => Err(StoreError::InvalidOneway(byte)),
        }
    }

    pub(crate) const fn into_byte(self) -> u8 {
        self as u8
    }
}

impl RestrictionKind {
    pub(crate) const fn try_from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::No),
            1 => Some(Self::Only),
            _ => None,
        }
    }

    pub(crate) const fn into_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn everywhere() -> BoundingBox {
        BoundingBox::new(Coordinate::new(-180.0, -90.0), Coordinate::new(180.0, 90.0))
    }

    fn roads() -> Vec<RoadSegment> {
        vec![
            RoadSegment::new(
                RoadId(7),
                RoadClass::Secondary,
                [
                    Coordinate::new(13.4001, 52.5001),
                    Coordinate::new(13.4002, 52.5001),
                    Coordinate::new(13.4003, 52.5004),
                ],
            )
            .with_name("Hauptstraße")
            .with_oneway(Oneway::Backward)
            .with_toll()
            .with_max_speed(50.0)
            .with_restriction(RestrictionKind::Only, RoadId(8)),
            RoadSegment::new(
                RoadId(8),
                RoadClass::Ferry,
                [Coordinate::new(13.4003, 52.5004), Coordinate::new(13.5, 52.6)],
            )
            .with_roundabout(),
        ]
    }

    #[test]
    fn tile_codec_001() {
        let key = TileKey::from_coordinate(&Coordinate::new(13.4001, 52.5001), 16);
        let roads = roads();
        let data = serialize_tile(key, &roads).unwrap();

        let tile = deserialize_tile(&data, key, &key.bounds()).unwrap();
        assert_eq!(tile.key(), key);
        assert_eq!(tile.roads().len(), 2);
        assert_eq!(tile.road(RoadId(7)).map(|r| r.as_ref()), Some(&roads[0]));
        assert_eq!(tile.road(RoadId(8)).map(|r| r.as_ref()), Some(&roads[1]));
    }

    #[test]
    fn tile_codec_skips_roads_outside_region_001() {
        let key = TileKey::from_coordinate(&Coordinate::new(13.4001, 52.5001), 16);
        let mut roads = roads();
        roads.push(RoadSegment::new(
            RoadId(9),
            RoadClass::Residential,
            [Coordinate::new(14.0, 53.0), Coordinate::new(14.1, 53.0)],
        ));
        let data = serialize_tile(key, &roads).unwrap();

        let tile = deserialize_tile(&data, key, &key.bounds()).unwrap();
        assert_eq!(tile.roads().len(), 2);
        assert!(tile.road(RoadId(9)).is_none());
    }

    #[test]
    fn tile_codec_invalid_001() {
        let key = TileKey::new(16, 1, 2);
        let region = key.bounds();

        assert_eq!(
            deserialize_tile(b"XYZ", key, &region),
            Err(StoreError::InvalidMagic)
        );
        assert_eq!(
            deserialize_tile(b"RGT\x02", key, &region),
            Err(StoreError::VersionNotSupported(2))
        );

        let mut data = serialize_tile(key, &roads()).unwrap();
        data.truncate(data.len() - 5);
        assert_eq!(
            deserialize_tile(&data, key, &everywhere()),
            Err(StoreError::IO(std::io::ErrorKind::UnexpectedEof))
        );
    }

    #[test]
    fn tile_codec_invalid_header_001() {
        let key = TileKey::new(16, 1, 2);
        let data = serialize_tile(key, &roads()).unwrap();

        // road count far beyond the bytes of the tile
        let mut huge_count = data.clone();
        huge_count[13..17].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(deserialize_tile(&huge_count, key, &everywhere()).is_err());

        let mut deep_zoom = data.clone();
        deep_zoom[4] = 40;
        assert_eq!(
            deserialize_tile(&deep_zoom, key, &everywhere()),
            Err(StoreError::InvalidTileKey(TileKey::new(40, 1, 2)))
        );

        let mut column_out_of_range = data;
        column_out_of_range[5..9].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(
            deserialize_tile(&column_out_of_range, key, &everywhere()),
            Err(StoreError::InvalidTileKey(TileKey::new(16, u32::MAX, 2)))
        );
    }

    #[test]
    fn tile_codec_key_mismatch_001() {
        let key = TileKey::new(16, 1, 2);
        let other = TileKey::new(16, 6, 2);
        let data = serialize_tile(other, &roads()).unwrap();

        assert_eq!(
            deserialize_tile(&data, key, &everywhere()),
            Err(StoreError::TileKeyMismatch {
                expected: key,
                found: other,
            })
        );
        assert!(deserialize_tile(&data, other, &everywhere()).is_ok());
    }

    #[test]
    fn tile_codec_invalid_road_id_001() {
        let road = RoadSegment::new(
            RoadId(u64::MAX),
            RoadClass::Primary,
            [Coordinate::new(0.0, 0.0), Coordinate::new(0.1, 0.0)],
        );
        assert_eq!(
            serialize_tile(TileKey::new(1, 0, 0), [&road]),
            Err(StoreError::InvalidRoadId(RoadId(u64::MAX)))
        );
    }

    #[test]
    fn tile_codec_tolerates_malformed_roads_001() {
        let key = TileKey::new(16, 1, 2);
        let single_point = RoadSegment {
            id: RoadId(1),
            points: vec![Coordinate::new(0.0, 0.0)],
            ..Default::default()
        };
        let valid = RoadSegment::new(
            RoadId(2),
            RoadClass::Primary,
            [Coordinate::new(0.0, 0.0), Coordinate::new(0.1, 0.0)],
        )
        .with_restriction(RestrictionKind::No, RoadId(1));

        let mut data = serialize_tile(key, [&single_point, &valid]).unwrap();
        // corrupt the restriction kind of the last road, the byte before its 8 id bytes
        let kind_index = data.len() - 9;
        data[kind_index] = 42;

        let tile = deserialize_tile(&data, key, &everywhere()).unwrap();
        assert_eq!(tile.roads().len(), 1);
        assert!(tile.road(RoadId(2)).unwrap().restrictions.is_empty());
    }
}
