// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use fvm_shared4::sector::SectorNumber;

use super::Error;

/// Fill level of a sector that still accepts pieces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsealedSectorInfo {
    // always equal to the sum of piece_sizes
    stored: u64,
    piece_sizes: Vec<u64>,
}

impl UnsealedSectorInfo {
    pub fn stored(&self) -> u64 {
        self.stored
    }

    pub fn piece_sizes(&self) -> &[u64] {
        &self.piece_sizes
    }
}

/// In-memory index of the sectors open for packing. It is not persisted and
/// gets rebuilt from the sectors' piece lists on startup.
#[derive(Clone, Debug, Default)]
pub struct UnsealedTracker {
    sectors: BTreeMap<SectorNumber, UnsealedSectorInfo>,
}

impl UnsealedTracker {
    pub fn lookup(&self, sector: SectorNumber) -> Option<&UnsealedSectorInfo> {
        self.sectors.get(&sector)
    }

    pub fn open(&mut self, sector: SectorNumber) {
        self.sectors.entry(sector).or_default();
    }

    /// Re-opens a sector with the pieces it already holds.
    pub fn restore(&mut self, sector: SectorNumber, piece_sizes: Vec<u64>) {
        let stored = piece_sizes.iter().sum();
        self.sectors.insert(
            sector,
            UnsealedSectorInfo {
                stored,
                piece_sizes,
            },
        );
    }

    pub fn record(&mut self, sector: SectorNumber, size: u64) -> Result<(), Error> {
        let info = self
            .sectors
            .get_mut(&sector)
            .ok_or(Error::NotAcceptingPieces(sector))?;
        info.stored += size;
        info.piece_sizes.push(size);
        Ok(())
    }

    pub fn close(&mut self, sector: SectorNumber) -> Option<UnsealedSectorInfo> {
        self.sectors.remove(&sector)
    }

    /// First open sector with room for `size` bytes whose pieces, if any,
    /// have that same size. Mixed piece sizes within a sector are not
    /// supported.
    pub fn find_available(&self, size: u64, capacity: u64) -> Option<SectorNumber> {
        self.sectors
            .iter()
            .find(|(_, info)| {
                info.stored + size <= capacity
                    && info.piece_sizes.first().is_none_or(|&first| first == size)
            })
            .map(|(&sector, _)| sector)
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<SectorNumber, UnsealedSectorInfo> {
        self.sectors.clone()
    }
}
