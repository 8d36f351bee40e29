use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::items::{ItemId, ItemInfo, ScreenId, CONTAINER_DESKTOP, CONTAINER_HOTSEAT};

/// Workspace grid dimensions. Read once at startup; a persisted layout
/// written under different dimensions goes through store migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    pub columns: i32,
    pub rows: i32,
    pub hotseat_size: i32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            columns: 5,
            rows: 5,
            hotseat_size: 5,
        }
    }
}

impl GridSpec {
    /// Grid knobs from the environment (`HEARTH_GRID_COLUMNS`,
    /// `HEARTH_GRID_ROWS`, `HEARTH_HOTSEAT_SIZE`), falling back to defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            columns: env_dim("HEARTH_GRID_COLUMNS", default.columns),
            rows: env_dim("HEARTH_GRID_ROWS", default.rows),
            hotseat_size: env_dim("HEARTH_HOTSEAT_SIZE", default.hotseat_size),
        }
    }

    pub fn cell_count(&self) -> usize {
        (self.columns * self.rows) as usize
    }
}

fn env_dim(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<i32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PlacementError {
    #[error("cell rect ({x},{y}) span {span_x}x{span_y} outside {columns}x{rows} grid")]
    OutOfBounds {
        x: i32,
        y: i32,
        span_x: i32,
        span_y: i32,
        columns: i32,
        rows: i32,
    },
    #[error("cell rect overlaps an already reserved rect on screen {screen}")]
    Overlap { screen: ScreenId },
    #[error("hotseat rank {rank} outside capacity {capacity}")]
    HotseatRankOutOfRange { rank: i64, capacity: i32 },
    #[error("hotseat rank {rank} already occupied")]
    HotseatOccupied { rank: i32 },
    #[error("container {0} is not a placeable root container")]
    NotRootContainer(ItemId),
}

/// Per-screen occupancy tracker. First reservation wins; a later item whose
/// rect intersects a reserved rect is rejected and the caller drops the row.
#[derive(Default)]
pub struct GridOccupancy {
    screens: HashMap<ScreenId, Vec<bool>>,
    hotseat: HashMap<i32, bool>,
}

impl GridOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the item's placement against `grid` and reserve its cells.
    /// Only desktop and hotseat placements participate; collection contents
    /// are ranked, not grid-placed.
    pub fn check_and_reserve(
        &mut self,
        grid: &GridSpec,
        item: &ItemInfo,
    ) -> Result<(), PlacementError> {
        match item.container {
            // The persisted rank is wider than the capacity type; anything
            // that does not fit is out of range, never truncated.
            CONTAINER_HOTSEAT => match i32::try_from(item.screen) {
                Ok(rank) => self.reserve_hotseat(grid, rank),
                Err(_) => Err(PlacementError::HotseatRankOutOfRange {
                    rank: item.screen,
                    capacity: grid.hotseat_size,
                }),
            },
            CONTAINER_DESKTOP => self.reserve_desktop(grid, item),
            other => Err(PlacementError::NotRootContainer(other)),
        }
    }

    fn reserve_hotseat(&mut self, grid: &GridSpec, rank: i32) -> Result<(), PlacementError> {
        if rank < 0 || rank >= grid.hotseat_size {
            return Err(PlacementError::HotseatRankOutOfRange {
                rank: i64::from(rank),
                capacity: grid.hotseat_size,
            });
        }
        if self.hotseat.insert(rank, true).is_some() {
            return Err(PlacementError::HotseatOccupied { rank });
        }
        Ok(())
    }

    fn reserve_desktop(&mut self, grid: &GridSpec, item: &ItemInfo) -> Result<(), PlacementError> {
        let (x, y, w, h) = (item.cell_x, item.cell_y, item.span_x, item.span_y);
        if x < 0 || y < 0 || w < 1 || h < 1 || x + w > grid.columns || y + h > grid.rows {
            return Err(PlacementError::OutOfBounds {
                x,
                y,
                span_x: w,
                span_y: h,
                columns: grid.columns,
                rows: grid.rows,
            });
        }
        let cells = self
            .screens
            .entry(item.screen)
            .or_insert_with(|| vec![false; grid.cell_count()]);
        for cy in y..y + h {
            for cx in x..x + w {
                if cells[(cy * grid.columns + cx) as usize] {
                    return Err(PlacementError::Overlap {
                        screen: item.screen,
                    });
                }
            }
        }
        for cy in y..y + h {
            for cx in x..x + w {
                cells[(cy * grid.columns + cx) as usize] = true;
            }
        }
        Ok(())
    }
}
