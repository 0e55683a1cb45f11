// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use anyhow::ensure;
use tokio::io::AsyncReadExt as _;

use super::{Error, api::PieceData};

/// Piece size rules of a sector: the padding unit every piece size is built
/// from and the number of unpadded bytes a sector holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorGeometry {
    padding_unit: u64,
    capacity: u64,
}

impl SectorGeometry {
    /// The usable capacity is the largest `padding_unit * 2^k` that fits in
    /// `sector_size`, which for the Fr32 unit of 127 is exactly the unpadded
    /// size of a padded power-of-two sector.
    pub fn new(padding_unit: u64, sector_size: u64) -> anyhow::Result<Self> {
        ensure!(padding_unit > 0, "padding unit must not be zero");
        let units = sector_size / padding_unit;
        ensure!(
            units > 0,
            "sector size {sector_size} is smaller than the padding unit {padding_unit}"
        );
        let units = 1 << units.ilog2();
        Ok(Self {
            padding_unit,
            capacity: padding_unit * units,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_valid_piece_size(&self, size: u64) -> bool {
        size >= self.padding_unit
            && size % self.padding_unit == 0
            && (size / self.padding_unit).is_power_of_two()
    }

    pub fn check_piece_size(&self, size: u64) -> Result<(), Error> {
        if !self.is_valid_piece_size(size) {
            return Err(Error::InvalidPieceSize(size));
        }
        if size > self.capacity {
            return Err(Error::PieceTooLarge {
                size,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Filler sizes that take a sector holding `stored` bytes up to capacity,
    /// smallest first. One filler per set bit of the remaining unit count.
    pub fn fillers(&self, stored: u64) -> Vec<u64> {
        let remaining = self.capacity.saturating_sub(stored) / self.padding_unit;
        (0..u64::BITS)
            .filter(|bit| remaining & (1 << bit) != 0)
            .map(|bit| self.padding_unit << bit)
            .collect()
    }
}

/// Zero-filled stream used for filler and pledge pieces.
pub fn zero_piece(size: u64) -> PieceData {
    Box::new(tokio::io::repeat(0).take(size))
}
