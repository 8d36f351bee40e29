use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde_json::json;

use hearth_events::topics;
use hearth_model::{flags, AppEntry, ComponentKey, ItemInfo, ItemVariant, ProfileHandle};

use crate::inventory::ActivityInfo;
use crate::ShellContext;

/// One incremental model mutation. Tasks run strictly serially on the same
/// worker as the loader, never concurrently with a load phase, and must be
/// internally idempotent: a full reload is always a safe retry.
pub trait ModelTask: Send {
    fn name(&self) -> &'static str;

    fn execute(&self, ctx: &ShellContext) -> Result<()>;
}

/// Re-publish the all-apps list when any task changed it.
pub(crate) fn publish_apps_if_changed(ctx: &ShellContext) {
    if ctx.apps.get_and_reset_change_flag() {
        let (apps, app_flags) = ctx.apps.snapshot();
        let epoch = ctx.model.current_epoch();
        ctx.binder
            .publish(epoch, |cb| cb.bind_all_applications(&apps, app_flags));
        ctx.bus
            .publish(topics::TOPIC_APPS_CHANGED, &json!({"count": apps.len()}));
    }
}

fn entry_from_activity(activity: &ActivityInfo, quiet: bool) -> AppEntry {
    let mut entry = AppEntry::new(
        activity.component.clone(),
        activity.profile,
        activity.title.clone(),
    );
    if activity.suspended {
        entry.flags |= flags::DISABLED_SUSPENDED;
    }
    if activity.archived {
        entry.flags |= flags::ARCHIVED;
    }
    if quiet {
        entry.flags |= flags::DISABLED_QUIET_PROFILE;
    }
    entry
}

fn profile_is_quiet(ctx: &ShellContext, profile: ProfileHandle) -> bool {
    ctx.inventory
        .profiles()
        .iter()
        .any(|p| p.handle == profile && p.quiet)
}

/// Packages appeared (install finished, or became available again).
pub struct PackageAddedTask {
    pub packages: Vec<String>,
    pub profile: ProfileHandle,
}

impl ModelTask for PackageAddedTask {
    fn name(&self) -> &'static str {
        "package-added"
    }

    fn execute(&self, ctx: &ShellContext) -> Result<()> {
        let quiet = profile_is_quiet(ctx, self.profile);
        for activity in ctx.inventory.list_activities(self.profile) {
            if self.packages.contains(&activity.component.package) {
                ctx.apps.add(entry_from_activity(&activity, quiet));
            }
        }

        // Promise placeholders and "not available" items become live.
        let changed = ctx.model.update_items(
            |i| {
                self.packages
                    .iter()
                    .any(|p| i.matches_package(p, self.profile))
                    && (i.has_flag(flags::DISABLED_NOT_AVAILABLE) || i.is_promise())
            },
            |i| {
                i.set_flag(flags::DISABLED_NOT_AVAILABLE, false);
                i.set_flag(flags::PROMISE, false);
                i.set_flag(flags::RESTORED, false);
                i.progress = 100;
            },
        );
        if !changed.is_empty() {
            let epoch = ctx.model.current_epoch();
            ctx.binder
                .publish(epoch, |cb| cb.bind_items_updated(&changed));
        }
        publish_apps_if_changed(ctx);
        Ok(())
    }
}

/// Packages were updated in place: refresh inventory entries, refresh or
/// remove the layout items pointing at them.
pub struct PackageUpdatedTask {
    pub packages: Vec<String>,
    pub profile: ProfileHandle,
}

impl ModelTask for PackageUpdatedTask {
    fn name(&self) -> &'static str {
        "package-updated"
    }

    fn execute(&self, ctx: &ShellContext) -> Result<()> {
        let quiet = profile_is_quiet(ctx, self.profile);
        let sessions = ctx.inventory.active_install_sessions();

        // Resolve everything up front; the model lock is never held across
        // inventory calls.
        let mut resolved: HashMap<ComponentKey, ActivityInfo> = HashMap::new();
        let mut enabled: HashMap<String, bool> = HashMap::new();
        let mut providers: HashSet<String> = HashSet::new();
        for w in ctx.inventory.list_widget_providers(self.profile) {
            providers.insert(w.provider);
        }
        for pkg in &self.packages {
            enabled.insert(
                pkg.clone(),
                ctx.inventory.is_package_enabled(pkg, self.profile),
            );
        }
        for activity in ctx.inventory.list_activities(self.profile) {
            if self.packages.contains(&activity.component.package) {
                resolved.insert(activity.component.clone(), activity);
            }
        }

        // Inventory entries are replaced atomically per package.
        for pkg in &self.packages {
            ctx.apps.remove_package(pkg, self.profile);
        }
        for activity in resolved.values() {
            ctx.apps.add(entry_from_activity(activity, quiet));
        }

        let matches =
            |i: &ItemInfo| self.packages.iter().any(|p| i.matches_package(p, self.profile));

        let changed = ctx.model.update_items(&matches, |i| {
            match &i.variant {
                ItemVariant::App { component } => {
                    if let Some(activity) = resolved.get(component) {
                        i.title = Some(activity.title.clone());
                        i.set_flag(flags::DISABLED_NOT_AVAILABLE, false);
                        i.set_flag(flags::PROMISE, false);
                        i.set_flag(flags::DISABLED_SUSPENDED, activity.suspended);
                        i.set_flag(flags::ARCHIVED, activity.archived);
                        i.progress = 100;
                    } else if let Some(progress) =
                        i.package().and_then(|p| sessions.get(p)).copied()
                    {
                        i.set_flag(flags::PROMISE, true);
                        i.progress = progress;
                    }
                }
                ItemVariant::DeepShortcut { .. } | ItemVariant::Widget { .. } => {
                    if let Some(progress) = i.package().and_then(|p| sessions.get(p)).copied() {
                        i.progress = progress;
                    }
                }
                ItemVariant::Collection { .. } => {}
            }
        });

        // Items whose target became invalid (and that nothing protects) are
        // collected and removed, model and store both.
        let remove_ids = ctx.model.collect_ids(|i| {
            if !matches(i) {
                return false;
            }
            let in_session = i.package().map(|p| sessions.contains_key(p)).unwrap_or(false);
            match &i.variant {
                ItemVariant::App { component } => {
                    !resolved.contains_key(component) && !in_session
                }
                ItemVariant::DeepShortcut { package, url, .. } => {
                    !enabled.get(package).copied().unwrap_or(false)
                        && url.is_none()
                        && !in_session
                }
                ItemVariant::Widget { provider } => {
                    !providers.contains(provider) && !in_session
                }
                ItemVariant::Collection { .. } => false,
            }
        });

        let epoch = ctx.model.current_epoch();
        if !remove_ids.is_empty() {
            ctx.model.remove_items(&remove_ids);
            ctx.store.delete_ids(&remove_ids)?;
            ctx.binder.publish(epoch, |cb| {
                cb.bind_workspace_components_removed(&self.packages, self.profile)
            });
        }
        if !changed.is_empty() {
            ctx.binder
                .publish(epoch, |cb| cb.bind_items_updated(&changed));
        }
        publish_apps_if_changed(ctx);
        Ok(())
    }
}

/// Packages were uninstalled: drop inventory entries and unprotected layout
/// items, with a batched persisted delete.
pub struct PackageRemovedTask {
    pub packages: Vec<String>,
    pub profile: ProfileHandle,
}

impl ModelTask for PackageRemovedTask {
    fn name(&self) -> &'static str {
        "package-removed"
    }

    fn execute(&self, ctx: &ShellContext) -> Result<()> {
        for pkg in &self.packages {
            ctx.apps.remove_package(pkg, self.profile);
        }

        let remove_ids = ctx.model.collect_ids(|i| {
            let matches = self
                .packages
                .iter()
                .any(|p| i.matches_package(p, self.profile));
            // Web-capable shortcuts keep working without the package.
            let protected = matches!(
                &i.variant,
                ItemVariant::DeepShortcut { url: Some(_), .. }
            );
            matches && !protected
        });

        if !remove_ids.is_empty() {
            ctx.model.remove_items(&remove_ids);
            ctx.store.delete_ids(&remove_ids)?;
            let epoch = ctx.model.current_epoch();
            ctx.binder.publish(epoch, |cb| {
                cb.bind_workspace_components_removed(&self.packages, self.profile)
            });
        }
        publish_apps_if_changed(ctx);
        Ok(())
    }
}

/// A profile was locked or unlocked. Pure flag flip across that profile's
/// items and entries; nothing is removed.
pub struct ProfileAvailabilityTask {
    pub profile: ProfileHandle,
    pub quiet: bool,
}

impl ModelTask for ProfileAvailabilityTask {
    fn name(&self) -> &'static str {
        "profile-availability"
    }

    fn execute(&self, ctx: &ShellContext) -> Result<()> {
        let changed = ctx.model.update_items(
            |i| i.profile == self.profile,
            |i| i.set_flag(flags::DISABLED_QUIET_PROFILE, self.quiet),
        );
        ctx.apps
            .set_profile_flags(self.profile, flags::DISABLED_QUIET_PROFILE, self.quiet);
        let any_quiet = ctx.inventory.profiles().iter().any(|p| p.quiet);
        ctx.apps
            .set_flags(hearth_model::apps::list_flags::QUIET_MODE, any_quiet);

        if !changed.is_empty() {
            let epoch = ctx.model.current_epoch();
            ctx.binder
                .publish(epoch, |cb| cb.bind_items_updated(&changed));
        }
        publish_apps_if_changed(ctx);
        Ok(())
    }
}

/// Download/install progress for one package moved. Updates the progress
/// field on matching promise items and entries; never removes anything.
pub struct InstallProgressTask {
    pub package: String,
    pub profile: ProfileHandle,
    pub progress: u8,
}

impl ModelTask for InstallProgressTask {
    fn name(&self) -> &'static str {
        "install-progress"
    }

    fn execute(&self, ctx: &ShellContext) -> Result<()> {
        let changed = ctx.model.update_items(
            |i| i.matches_package(&self.package, self.profile) && i.is_promise(),
            |i| i.progress = self.progress,
        );
        let entries = ctx
            .apps
            .update_package(&self.package, self.profile, |e| e.progress = self.progress);

        let epoch = ctx.model.current_epoch();
        for entry in &entries {
            ctx.binder
                .publish(epoch, |cb| cb.bind_incremental_download_progress(entry));
        }
        if !changed.is_empty() {
            ctx.binder
                .publish(epoch, |cb| cb.bind_items_updated(&changed));
        }
        publish_apps_if_changed(ctx);
        Ok(())
    }
}
