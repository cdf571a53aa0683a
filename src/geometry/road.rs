use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::wire::{WireError, parse_i32};

const CHUNK: i32 = 16;

/// One 16x16 chunk of a road footprint. Bit `z` of `rows[x]` marks the
/// column at in-chunk position (x, z).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct ChunkMatrix {
    rows: [u16; 16],
}

impl ChunkMatrix {
    fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| *row == 0)
    }

    fn count(&self) -> u64 {
        self.rows.iter().map(|row| u64::from(row.count_ones())).sum()
    }

    fn to_hex(self) -> String {
        self.rows.iter().map(|row| format!("{:04x}", row)).collect()
    }

    fn from_hex(text: &str) -> Result<Self, WireError> {
        let invalid = || WireError::Number(text.to_string());
        if text.len() != 64 || !text.is_ascii() {
            return Err(invalid());
        }
        let mut rows = [0u16; 16];
        for (i, row) in rows.iter_mut().enumerate() {
            *row = u16::from_str_radix(&text[i * 4..i * 4 + 4], 16).map_err(|_| invalid())?;
        }
        Ok(Self { rows })
    }
}

fn split(value: i32) -> (i32, usize) {
    (value.div_euclid(CHUNK), value.rem_euclid(CHUNK) as usize)
}

/// Free-form set of XZ block columns, bucketed by chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoadMatrix {
    chunks: BTreeMap<i32, BTreeMap<i32, ChunkMatrix>>,
}

impl RoadMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, x: i32, z: i32) {
        let ((cx, ix), (cz, iz)) = (split(x), split(z));
        let chunk = self.chunks.entry(cx).or_default().entry(cz).or_default();
        chunk.rows[ix] |= 1 << iz;
    }

    /// Returns whether the column was present. Empty chunks are dropped.
    pub fn remove_point(&mut self, x: i32, z: i32) -> bool {
        let ((cx, ix), (cz, iz)) = (split(x), split(z));
        let Some(column) = self.chunks.get_mut(&cx) else {
            return false;
        };
        let Some(chunk) = column.get_mut(&cz) else {
            return false;
        };
        let present = chunk.rows[ix] & (1 << iz) != 0;
        chunk.rows[ix] &= !(1 << iz);
        if chunk.is_empty() {
            column.remove(&cz);
            if column.is_empty() {
                self.chunks.remove(&cx);
            }
        }
        present
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        let ((cx, ix), (cz, iz)) = (split(x), split(z));
        self.chunks
            .get(&cx)
            .and_then(|column| column.get(&cz))
            .is_some_and(|chunk| chunk.rows[ix] & (1 << iz) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn count_points(&self) -> u64 {
        self.chunks
            .values()
            .flat_map(BTreeMap::values)
            .map(ChunkMatrix::count)
            .sum()
    }

    /// Every column, ordered by x then z.
    pub fn points(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.chunks.iter().flat_map(|(&cx, column)| {
            (0..CHUNK).flat_map(move |ix| {
                column.iter().flat_map(move |(&cz, chunk)| {
                    let row = chunk.rows[ix as usize];
                    (0..CHUNK)
                        .filter(move |iz| row & (1 << *iz) != 0)
                        .map(move |iz| (cx * CHUNK + ix, cz * CHUNK + iz))
                })
            })
        })
    }

    /// Inclusive `(min_x, min_z, max_x, max_z)`, `None` when empty.
    pub fn bounds(&self) -> Option<(i32, i32, i32, i32)> {
        self.points().fold(None, |acc, (x, z)| {
            Some(match acc {
                None => (x, z, x, z),
                Some((x1, z1, x2, z2)) => (x1.min(x), z1.min(z), x2.max(x), z2.max(z)),
            })
        })
    }

    /// `cx:cz:<64 hex digits>` per chunk, joined by ':'.
    pub fn to_wire(&self) -> String {
        self.chunks
            .iter()
            .flat_map(|(cx, column)| {
                column
                    .iter()
                    .map(move |(cz, chunk)| format!("{}:{}:{}", cx, cz, chunk.to_hex()))
            })
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Decode the fields produced by [`RoadMatrix::to_wire`], already split.
    pub fn from_wire_fields(fields: &[&str]) -> Result<Self, WireError> {
        if fields.len() % 3 != 0 {
            return Err(WireError::FieldCount {
                expected: fields.len() - fields.len() % 3 + 3,
                got: fields.len(),
                value: fields.join(":"),
            });
        }
        let mut road = Self::new();
        for triple in fields.chunks(3) {
            let (cx, cz) = (parse_i32(triple[0])?, parse_i32(triple[1])?);
            let chunk = ChunkMatrix::from_hex(triple[2])?;
            if !chunk.is_empty() {
                road.chunks.entry(cx).or_default().insert(cz, chunk);
            }
        }
        Ok(road)
    }
}

impl FromIterator<(i32, i32)> for RoadMatrix {
    fn from_iter<I: IntoIterator<Item = (i32, i32)>>(iter: I) -> Self {
        let mut road = Self::new();
        for (x, z) in iter {
            road.add_point(x, z);
        }
        road
    }
}
