use serde::{Deserialize, Serialize};

pub type ItemId = i64;
pub type ScreenId = i64;

/// Sentinel container for items placed directly on a workspace screen.
pub const CONTAINER_DESKTOP: ItemId = -100;
/// Sentinel container for items pinned to the hotseat strip.
pub const CONTAINER_HOTSEAT: ItemId = -101;
/// Id of an item that has not been persisted yet.
pub const NO_ID: ItemId = -1;

pub fn is_root_container(container: ItemId) -> bool {
    container == CONTAINER_DESKTOP || container == CONTAINER_HOTSEAT
}

/// Opaque handle for the OS profile (user / work / private) owning an item.
/// The persisted form is the profile serial number; the handle is whatever
/// the inventory collaborator resolved that serial to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProfileHandle(pub i64);

/// Identity of one launchable activity: package plus class.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentKey {
    pub package: String,
    pub class: String,
}

impl ComponentKey {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    /// Flat `package/Class` form used in the persisted intent column.
    pub fn flat(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }

    pub fn parse_flat(s: &str) -> Option<Self> {
        let (package, class) = s.split_once('/')?;
        if package.is_empty() || class.is_empty() {
            return None;
        }
        Some(Self::new(package, class))
    }
}

/// Item type tags as persisted in the layout table. The numeric values are
/// part of the on-disk format and must never be reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Application,
    DeepShortcut,
    Folder,
    Widget,
    AppPair,
}

impl ItemKind {
    pub fn tag(&self) -> i64 {
        match self {
            ItemKind::Application => 0,
            ItemKind::DeepShortcut => 1,
            ItemKind::Folder => 2,
            ItemKind::Widget => 4,
            ItemKind::AppPair => 10,
        }
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(ItemKind::Application),
            1 => Some(ItemKind::DeepShortcut),
            2 => Some(ItemKind::Folder),
            4 => Some(ItemKind::Widget),
            10 => Some(ItemKind::AppPair),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Application => "application",
            ItemKind::DeepShortcut => "deep_shortcut",
            ItemKind::Folder => "folder",
            ItemKind::Widget => "widget",
            ItemKind::AppPair => "app_pair",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, ItemKind::Folder | ItemKind::AppPair)
    }
}

/// Runtime status flag bits on a placed item.
pub mod flags {
    /// Target package is suspended by policy.
    pub const DISABLED_SUSPENDED: u32 = 1 << 0;
    /// Owning profile is in quiet (locked) mode.
    pub const DISABLED_QUIET_PROFILE: u32 = 1 << 1;
    /// Target is currently not available on the device.
    pub const DISABLED_NOT_AVAILABLE: u32 = 1 << 2;
    /// Item stands in for an install that has not completed.
    pub const PROMISE: u32 = 1 << 3;
    /// Item was restored from a backup and awaits first verification.
    pub const RESTORED: u32 = 1 << 4;
    /// Target package is archived; only its icon remains on device.
    pub const ARCHIVED: u32 = 1 << 5;

    pub const DISABLED_MASK: u32 =
        DISABLED_SUSPENDED | DISABLED_QUIET_PROFILE | DISABLED_NOT_AVAILABLE;
}

/// Restore bookkeeping bits persisted alongside a row.
pub mod restore {
    /// Row refers to a package whose install is still pending.
    pub const PENDING_INSTALL: u32 = 1 << 0;
    /// Promise UI has not been shown for this row yet.
    pub const UI_NOT_READY: u32 = 1 << 1;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Folder,
    AppPair,
}

impl CollectionKind {
    pub fn item_kind(&self) -> ItemKind {
        match self {
            CollectionKind::Folder => ItemKind::Folder,
            CollectionKind::AppPair => ItemKind::AppPair,
        }
    }
}

/// Typed payload distinguishing the item variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemVariant {
    App {
        component: ComponentKey,
    },
    DeepShortcut {
        package: String,
        shortcut_id: String,
        /// Web fallback URI; shortcuts carrying one survive package removal.
        url: Option<String>,
    },
    Collection {
        kind: CollectionKind,
        children: Vec<ItemId>,
        /// True while the collection exists only as a forward reference and
        /// its defining row has not been read yet.
        pending: bool,
    },
    Widget {
        provider: String,
    },
}

/// One placed layout entity. All fields are owned values, so a `clone()` is
/// an immutable projection safe to hand to consumers while the canonical
/// copy keeps being mutated in place under the model lock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub id: ItemId,
    pub container: ItemId,
    pub screen: ScreenId,
    pub cell_x: i32,
    pub cell_y: i32,
    pub span_x: i32,
    pub span_y: i32,
    pub profile: ProfileHandle,
    pub title: Option<String>,
    pub status: u32,
    pub restore_flags: u32,
    /// Install progress percentage for promise items.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Vec<u8>>,
    pub variant: ItemVariant,
}

impl ItemInfo {
    pub fn kind(&self) -> ItemKind {
        match &self.variant {
            ItemVariant::App { .. } => ItemKind::Application,
            ItemVariant::DeepShortcut { .. } => ItemKind::DeepShortcut,
            ItemVariant::Collection { kind, .. } => kind.item_kind(),
            ItemVariant::Widget { .. } => ItemKind::Widget,
        }
    }

    /// Package the item ultimately points at, when it points at one.
    pub fn package(&self) -> Option<&str> {
        match &self.variant {
            ItemVariant::App { component } => Some(component.package.as_str()),
            ItemVariant::DeepShortcut { package, .. } => Some(package.as_str()),
            ItemVariant::Widget { provider } => provider.split('/').next(),
            ItemVariant::Collection { .. } => None,
        }
    }

    pub fn component(&self) -> Option<&ComponentKey> {
        match &self.variant {
            ItemVariant::App { component } => Some(component),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.variant, ItemVariant::Collection { .. })
    }

    pub fn has_flag(&self, mask: u32) -> bool {
        self.status & mask != 0
    }

    pub fn set_flag(&mut self, mask: u32, enabled: bool) {
        if enabled {
            self.status |= mask;
        } else {
            self.status &= !mask;
        }
    }

    pub fn has_restore_flag(&self, mask: u32) -> bool {
        self.restore_flags & mask != 0
    }

    pub fn is_promise(&self) -> bool {
        self.has_flag(flags::PROMISE)
    }

    pub fn matches_package(&self, package: &str, profile: ProfileHandle) -> bool {
        self.profile == profile && self.package() == Some(package)
    }
}
