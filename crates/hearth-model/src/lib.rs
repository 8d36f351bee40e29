//! Canonical in-memory data model for the Hearth home-screen shell.
//!
//! The model is the single source of truth between the persisted layout
//! store and the UI consumers: a coarse-locked id-to-item map plus the
//! all-apps inventory, with a monotonically increasing bind-epoch used to
//! discard stale asynchronous publishes.

pub mod apps;
pub mod grid;
pub mod items;
pub mod model;

pub use apps::{section_name, AppEntry, AppsList};
pub use grid::{GridOccupancy, GridSpec, PlacementError};
pub use items::{
    flags, is_root_container, restore, CollectionKind, ComponentKey, ItemId, ItemInfo, ItemKind,
    ItemVariant, ProfileHandle, ScreenId, CONTAINER_DESKTOP, CONTAINER_HOTSEAT, NO_ID,
};
pub use model::{CanonicalModel, WorkspaceSnapshot};
