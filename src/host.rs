//! The host environment a decompilation runs inside.
//!
//! The host owns the shared read lock over project state, the cancellation
//! signal, user settings and registry flags, and knows which project a file
//! belongs to.

use anyhow::{Result, anyhow};
use parking_lot::RwLock;
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use crate::api::OptionMap;
use crate::config::BridgeSettings;
use crate::error::Canceled;
use crate::index::{ClasspathIndex, ProjectIndex};
use crate::options::{DUMP_ORIGINAL_LINES_FLAG, HostOptions, LINE_MAPPING_FLAG};
use crate::vfs::VirtualFile;

pub trait Host: Send + Sync + 'static {
    /// Whether the calling thread may read project state right now.
    fn is_read_access_allowed(&self) -> bool;

    /// Runs `action` on the calling thread with read access held.
    fn run_read_action(&self, action: &mut dyn FnMut());

    fn check_canceled(&self) -> Result<(), Canceled>;

    fn locate_project(&self, file: &dyn VirtualFile) -> Option<Arc<dyn ProjectIndex>>;

    fn registry_flag(&self, key: &str) -> bool;

    /// User-facing decompiler settings, keyed by option key.
    fn settings(&self) -> OptionMap;

    fn indent_size(&self) -> usize;

    fn is_unit_test_mode(&self) -> bool {
        false
    }
}

/// Typed wrapper over [`Host::run_read_action`].
pub fn read_action<R>(host: &dyn Host, action: impl FnOnce() -> R) -> Result<R> {
    let mut action = Some(action);
    let mut result = None;
    host.run_read_action(&mut || {
        if let Some(action) = action.take() {
            result = Some(action());
        }
    });
    result.ok_or_else(|| anyhow!("host did not run the read action"))
}

pub fn host_options(host: &dyn Host) -> HostOptions {
    HostOptions {
        indent_size: host.indent_size(),
        unit_test_mode: host.is_unit_test_mode(),
        line_mapping: host.registry_flag(LINE_MAPPING_FLAG),
        dump_original_lines: host.registry_flag(DUMP_ORIGINAL_LINES_FLAG),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() {
            return Err(Canceled::default());
        }
        Ok(())
    }
}

static NEXT_ACCESS_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static HELD: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Shared read lock over project state, with per-thread tracking so nested
/// reads on the same thread do not re-acquire.
#[derive(Debug)]
pub struct ReadAccess {
    id: u64,
    lock: RwLock<()>,
}

impl Default for ReadAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadAccess {
    pub fn new() -> Self {
        Self {
            id: NEXT_ACCESS_ID.fetch_add(1, Ordering::Relaxed),
            lock: RwLock::new(()),
        }
    }

    pub fn is_read_access_allowed(&self) -> bool {
        HELD.with(|held| held.borrow().contains(&self.id))
    }

    pub fn run_read_action<R>(&self, action: impl FnOnce() -> R) -> R {
        if self.is_read_access_allowed() {
            return action();
        }
        let _guard = self.lock.read();
        let _held = Held::enter(self.id);
        action()
    }

    /// Exclusive access. Must not be requested from inside a read action on
    /// the same thread.
    pub fn run_write_action<R>(&self, action: impl FnOnce() -> R) -> R {
        let _guard = self.lock.write();
        let _held = Held::enter(self.id);
        action()
    }
}

struct Held {
    id: u64,
}

impl Held {
    fn enter(id: u64) -> Self {
        HELD.with(|held| held.borrow_mut().push(id));
        Self { id }
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|id| *id == self.id) {
                held.remove(pos);
            }
        });
    }
}

/// A standalone host: settings from disk, classpath projects, one read lock.
#[derive(Debug)]
pub struct Workspace {
    access: ReadAccess,
    cancellation: CancellationToken,
    settings: BridgeSettings,
    projects: RwLock<Vec<Arc<ClasspathIndex>>>,
}

impl Workspace {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            access: ReadAccess::new(),
            cancellation: CancellationToken::new(),
            settings,
            projects: RwLock::new(Vec::new()),
        }
    }

    pub fn read_access(&self) -> &ReadAccess {
        &self.access
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn bridge_settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn add_project(&self, project: ClasspathIndex) {
        self.access.run_write_action(|| {
            debug!(project = project.name(), classes = project.len(), "project registered");
            self.projects.write().push(Arc::new(project));
        });
    }
}

impl Host for Workspace {
    fn is_read_access_allowed(&self) -> bool {
        self.access.is_read_access_allowed()
    }

    fn run_read_action(&self, action: &mut dyn FnMut()) {
        self.access.run_read_action(action)
    }

    fn check_canceled(&self) -> Result<(), Canceled> {
        self.cancellation.check()
    }

    fn locate_project(&self, file: &dyn VirtualFile) -> Option<Arc<dyn ProjectIndex>> {
        let projects = self.projects.read();
        let path = file.path();
        if let Some(project) = projects.iter().find(|p| p.contains_file(&path)) {
            return Some(Arc::clone(project) as Arc<dyn ProjectIndex>);
        }
        match projects.as_slice() {
            [only] => Some(Arc::clone(only) as Arc<dyn ProjectIndex>),
            _ => None,
        }
    }

    fn registry_flag(&self, key: &str) -> bool {
        self.settings.registry.get(key).copied().unwrap_or(false)
    }

    fn settings(&self) -> OptionMap {
        self.settings.settings.clone()
    }

    fn indent_size(&self) -> usize {
        self.settings.indent_size
    }

    fn is_unit_test_mode(&self) -> bool {
        self.settings.unit_test_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::LocalFile;
    use crate::vfs::tests::temp_dir;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn read_access_is_tracked_per_thread() {
        let access = Arc::new(ReadAccess::new());
        assert!(!access.is_read_access_allowed());

        access.run_read_action(|| {
            assert!(access.is_read_access_allowed());
            // nested reads do not re-acquire
            access.run_read_action(|| assert!(access.is_read_access_allowed()));

            let other = Arc::clone(&access);
            let seen = std::thread::spawn(move || other.is_read_access_allowed())
                .join()
                .unwrap();
            assert!(!seen);
        });
        assert!(!access.is_read_access_allowed());

        let unrelated = ReadAccess::new();
        access.run_read_action(|| assert!(!unrelated.is_read_access_allowed()));
    }

    #[test]
    fn writers_wait_for_readers() {
        let access = Arc::new(ReadAccess::new());
        let (tx, rx) = mpsc::channel();

        access.run_read_action(|| {
            let writer = Arc::clone(&access);
            let tx = tx.clone();
            std::thread::spawn(move || {
                writer.run_write_action(|| {
                    let _ = tx.send("written");
                });
            });
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "written");
    }

    #[test]
    fn read_action_returns_the_value() {
        let workspace = Workspace::new(BridgeSettings::default());
        let value = read_action(&workspace, || {
            assert!(workspace.is_read_access_allowed());
            42
        })
        .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn cancellation_is_observed() {
        let workspace = Workspace::new(BridgeSettings::default());
        assert!(workspace.check_canceled().is_ok());
        workspace.cancellation().cancel();
        assert!(workspace.check_canceled().is_err());
    }

    #[test]
    fn host_options_follow_settings() {
        let mut settings = BridgeSettings::default();
        settings.indent_size = 2;
        settings.registry.insert(LINE_MAPPING_FLAG.to_string(), true);
        let workspace = Workspace::new(settings);

        let options = host_options(&workspace);
        assert_eq!(options.indent_size, 2);
        assert!(options.line_mapping);
        assert!(!options.dump_original_lines);
        assert!(!options.unit_test_mode);
    }

    #[test]
    fn locate_project_prefers_containing_roots() -> Result<()> {
        let base = temp_dir("locate_project");
        let a = base.join("a");
        let b = base.join("b");
        std::fs::create_dir_all(&a)?;
        std::fs::create_dir_all(&b)?;
        std::fs::write(b.join("X.class"), b"x")?;

        let workspace = Workspace::new(BridgeSettings::default());
        let file = LocalFile::new(b.join("X.class"))?;
        assert!(workspace.locate_project(file.as_ref()).is_none());

        workspace.add_project(ClasspathIndex::build("a", &[a.clone()])?);
        // a single project claims everything
        assert_eq!(workspace.locate_project(file.as_ref()).unwrap().name(), "a");

        workspace.add_project(ClasspathIndex::build("b", &[b.clone()])?);
        assert_eq!(workspace.locate_project(file.as_ref()).unwrap().name(), "b");

        let outside = LocalFile::new(base.join("Y.class"))?;
        assert!(workspace.locate_project(outside.as_ref()).is_none());

        let _ = std::fs::remove_dir_all(base);
        Ok(())
    }
}
