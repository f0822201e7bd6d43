use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::api::ContextSource;
use crate::index::{ProjectIndex, qualified_name};
use crate::pump::ReadActionRunner;

/// Lets the decompiler look up referenced classes in the host project.
///
/// Lookups happen on the decompiler thread, so every query is routed through
/// the read-action runner.
pub struct ProjectContextSource {
    project: Arc<dyn ProjectIndex>,
    reads: ReadActionRunner,
}

impl ProjectContextSource {
    pub fn new(project: Arc<dyn ProjectIndex>, reads: ReadActionRunner) -> Self {
        Self { project, reads }
    }
}

impl ContextSource for ProjectContextSource {
    fn name(&self) -> String {
        format!("project {}", self.project.name())
    }

    fn has_class(&self, internal_name: &str) -> Result<bool> {
        let project = Arc::clone(&self.project);
        let name = internal_name.to_string();
        self.reads
            .run(move || does_class_exist(project.as_ref(), &name))
    }

    fn class_bytes(&self, internal_name: &str) -> Result<Option<Vec<u8>>> {
        let project = Arc::clone(&self.project);
        let name = internal_name.to_string();
        self.reads.run(move || class_bytes(project.as_ref(), &name))
    }
}

pub fn does_class_exist(project: &dyn ProjectIndex, internal_name: &str) -> bool {
    project.find_class(&qualified_name(internal_name)).is_some()
}

/// Bytes of the exact class file for `internal_name`.
///
/// The index answers with the top-level class's file, so nested classes are
/// looked up as siblings named after the last path segment.
pub fn class_bytes(project: &dyn ProjectIndex, internal_name: &str) -> Option<Vec<u8>> {
    let file = project.find_class(&qualified_name(internal_name))?;
    if file.extension().as_deref() != Some("class") {
        return None;
    }

    let simple = internal_name.rsplit('/').next().unwrap_or(internal_name);
    let actual = file
        .parent()
        .and_then(|parent| parent.find_child(&format!("{simple}.class")))
        .unwrap_or(file);

    match actual.contents() {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            debug!(class = internal_name, error = %format!("{err:#}"), "failed to read class bytes");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ClasspathIndex;
    use crate::vfs::tests::{temp_dir, write_jar};
    use std::fs;

    #[test]
    fn nested_classes_read_their_own_file() -> Result<()> {
        let base = temp_dir("resolver_nested");
        let pkg = base.join("demo");
        fs::create_dir_all(&pkg)?;
        fs::write(pkg.join("Outer.class"), b"outer")?;
        fs::write(pkg.join("Outer$Inner.class"), b"inner")?;

        let index = ClasspathIndex::build("demo", &[base.clone()])?;
        assert!(does_class_exist(&index, "demo/Outer$Inner"));
        assert!(!does_class_exist(&index, "demo/Missing"));
        assert_eq!(class_bytes(&index, "demo/Outer").unwrap(), b"outer");
        assert_eq!(class_bytes(&index, "demo/Outer$Inner").unwrap(), b"inner");
        assert!(class_bytes(&index, "demo/Missing").is_none());

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn jar_classes_resolve_through_entries() -> Result<()> {
        let base = temp_dir("resolver_jar");
        let jar = base.join("lib.jar");
        write_jar(
            &jar,
            &[
                ("org/example/A.class", b"a"),
                ("org/example/A$B.class", b"ab"),
            ],
        )?;

        let index = ClasspathIndex::build("lib", &[jar])?;
        assert_eq!(class_bytes(&index, "org/example/A$B").unwrap(), b"ab");
        assert_eq!(class_bytes(&index, "org/example/A").unwrap(), b"a");

        let _ = fs::remove_dir_all(base);
        Ok(())
    }
}
