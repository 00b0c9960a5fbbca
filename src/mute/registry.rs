// Running-application registry
//
// Maintains the current snapshot of running applications grouped by
// bundle id. The snapshot is rebuilt wholesale on every refresh and never
// partially mutated; subscribers get the new snapshot whenever it differs
// from the previous one. The registry never decides whether the mute
// session should be rebuilt; that call belongs to the orchestrator.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Result;
use sysinfo::System;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::types::{Pid, RunningApp};

/// Tracks running applications and their helper processes.
///
/// Refresh is triggered by explicit caller request; the embedding app is
/// expected to call `refresh()` from its application-lifecycle
/// notification handlers (launch, terminate, hide, unhide).
pub struct RunningAppRegistry {
    system: System,
    known_audio_apps: HashMap<String, String>, // process name -> bundle ID
    bundle_id_cache: HashMap<PathBuf, Option<String>>,
    snapshot: Vec<RunningApp>,
    changed_tx: broadcast::Sender<Vec<RunningApp>>,
}

impl RunningAppRegistry {
    pub fn new() -> Self {
        let mut known_audio_apps = HashMap::new();

        // Well-known audio applications whose bundle ids we can map
        // without touching the bundle on disk.
        known_audio_apps.insert("Spotify".to_string(), "com.spotify.client".to_string());
        known_audio_apps.insert("Music".to_string(), "com.apple.Music".to_string());
        known_audio_apps.insert("Safari".to_string(), "com.apple.Safari".to_string());
        known_audio_apps.insert("Tidal".to_string(), "com.tidal.desktop".to_string());
        known_audio_apps.insert("Deezer".to_string(), "com.deezer.desktop".to_string());
        known_audio_apps.insert("VLC".to_string(), "org.videolan.vlc".to_string());
        known_audio_apps.insert("IINA".to_string(), "com.colliderli.iina".to_string());
        known_audio_apps.insert(
            "QuickTime Player".to_string(),
            "com.apple.QuickTimePlayerX".to_string(),
        );

        let (changed_tx, _) = broadcast::channel(16);

        Self {
            system: System::new_all(),
            known_audio_apps,
            bundle_id_cache: HashMap::new(),
            snapshot: Vec::new(),
            changed_tx,
        }
    }

    /// The most recent snapshot. Read-only to consumers.
    pub fn snapshot(&self) -> Vec<RunningApp> {
        self.snapshot.clone()
    }

    /// Subscribe to snapshot changes. Each event carries the full new
    /// snapshot; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<RunningApp>> {
        self.changed_tx.subscribe()
    }

    /// Re-enumerate running applications and rebuild the snapshot.
    /// Returns the current snapshot; notifies subscribers only when it
    /// differs from the previous one.
    pub fn refresh(&mut self) -> Result<Vec<RunningApp>> {
        self.system.refresh_all();

        let mut raw: Vec<(Pid, String, String)> = Vec::new();
        for (pid, process) in self.system.processes() {
            let Some(app_root) = process.exe().and_then(outermost_app_bundle) else {
                continue;
            };
            let display_name = app_display_name(&app_root);

            // Cache by bundle path: the id of an installed bundle never
            // changes. Field-level borrow keeps the process iterator valid.
            let bundle_id = match self.known_audio_apps.get(process.name()) {
                Some(bundle_id) => Some(bundle_id.clone()),
                None => self
                    .bundle_id_cache
                    .entry(app_root.clone())
                    .or_insert_with(|| read_bundle_identifier(&app_root))
                    .clone(),
            };
            let Some(bundle_id) = bundle_id else {
                debug!(app = %app_root.display(), "no bundle identifier, skipping");
                continue;
            };

            raw.push((pid.as_u32(), bundle_id, display_name));
        }

        let snapshot = build_snapshot(raw);
        if snapshot != self.snapshot {
            info!(apps = snapshot.len(), "running-app snapshot changed");
            self.snapshot = snapshot.clone();
            let _ = self.changed_tx.send(snapshot);
        }
        Ok(self.snapshot.clone())
    }
}

impl Default for RunningAppRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The outermost `.app` ancestor of an executable path. Helper bundles
/// nested inside an app (Foo.app/Contents/.../Helper.app) group under the
/// outer app so all of its processes share one mute target.
fn outermost_app_bundle(exe: &Path) -> Option<PathBuf> {
    exe.ancestors()
        .filter(|p| p.extension().map(|e| e == "app").unwrap_or(false))
        .last()
        .map(Path::to_path_buf)
}

fn app_display_name(app_root: &Path) -> String {
    app_root
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| app_root.display().to_string())
}

/// Group (pid, bundle id, display name) rows into one entry per bundle.
fn build_snapshot(raw: Vec<(Pid, String, String)>) -> Vec<RunningApp> {
    let mut apps: HashMap<String, RunningApp> = HashMap::new();
    for (pid, bundle_id, display_name) in raw {
        apps.entry(bundle_id.clone())
            .or_insert_with(|| RunningApp {
                bundle_id,
                display_name,
                pids: BTreeSet::new(),
            })
            .pids
            .insert(pid);
    }
    let mut snapshot: Vec<RunningApp> = apps.into_values().collect();
    snapshot.sort_by(|a, b| a.bundle_id.cmp(&b.bundle_id));
    snapshot
}

/// Read CFBundleIdentifier from the bundle's Info.plist.
#[cfg(target_os = "macos")]
fn read_bundle_identifier(app_root: &Path) -> Option<String> {
    use std::process::Command;

    let info = app_root.join("Contents/Info");
    let output = Command::new("defaults")
        .arg("read")
        .arg(&info)
        .arg("CFBundleIdentifier")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let bundle_id = String::from_utf8(output.stdout).ok()?.trim().to_string();
    if bundle_id.is_empty() {
        None
    } else {
        Some(bundle_id)
    }
}

#[cfg(not(target_os = "macos"))]
fn read_bundle_identifier(_app_root: &Path) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outermost_bundle_wins_for_nested_helpers() {
        let exe = Path::new(
            "/Applications/Safari.app/Contents/Frameworks/Helper.app/Contents/MacOS/Helper",
        );
        assert_eq!(
            outermost_app_bundle(exe),
            Some(PathBuf::from("/Applications/Safari.app"))
        );
    }

    #[test]
    fn non_bundle_paths_do_not_group() {
        assert_eq!(outermost_app_bundle(Path::new("/usr/bin/say")), None);
    }

    #[test]
    fn snapshot_groups_helper_pids_under_one_bundle() {
        let snapshot = build_snapshot(vec![
            (10, "com.apple.Safari".into(), "Safari".into()),
            (11, "com.apple.Safari".into(), "Safari".into()),
            (20, "com.spotify.client".into(), "Spotify".into()),
        ]);

        assert_eq!(snapshot.len(), 2);
        let safari = &snapshot[0];
        assert_eq!(safari.bundle_id, "com.apple.Safari");
        assert_eq!(safari.pids.iter().copied().collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(snapshot[1].pids.len(), 1);
    }

    #[test]
    fn snapshot_is_sorted_and_stable() {
        let a = build_snapshot(vec![
            (2, "b.app".into(), "B".into()),
            (1, "a.app".into(), "A".into()),
        ]);
        let b = build_snapshot(vec![
            (1, "a.app".into(), "A".into()),
            (2, "b.app".into(), "B".into()),
        ]);
        assert_eq!(a, b);
    }

    #[test]
    fn refresh_enumerates_and_is_repeatable() {
        let mut registry = RunningAppRegistry::new();

        let first = registry.refresh().expect("refresh should not fail");
        assert_eq!(first, registry.snapshot());

        // A second pass reuses the bundle-id cache and must still succeed.
        let second = registry.refresh().expect("repeated refresh should not fail");
        assert_eq!(second, registry.snapshot());
    }

    #[tokio::test]
    async fn subscribers_see_snapshot_changes() {
        let registry = RunningAppRegistry::new();
        let mut rx = registry.subscribe();

        // Simulate a refresh publishing a changed snapshot.
        let snapshot = build_snapshot(vec![(1, "a.app".into(), "A".into())]);
        registry.changed_tx.send(snapshot.clone()).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, snapshot);
    }
}
