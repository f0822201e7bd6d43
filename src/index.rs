use anyhow::{Context, Result};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use tracing::{debug, warn};

use crate::vfs::{JarArchive, LocalFile, VirtualFile};

/// A project's view of its classes.
pub trait ProjectIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `path` lies under one of the project's roots.
    fn contains_file(&self, path: &Path) -> bool;

    /// Finds the file defining a class by qualified name, nested classes
    /// written with dots (`a.b.Outer.Inner`).
    ///
    /// Nested classes resolve to the file of their top-level class.
    fn find_class(&self, qualified_name: &str) -> Option<Arc<dyn VirtualFile>>;
}

/// `a/b/Outer$Inner` -> `a.b.Outer.Inner`.
pub fn qualified_name(internal_name: &str) -> String {
    internal_name.replace(['/', '$'], ".")
}

#[derive(Debug, Clone)]
enum ClassLocation {
    Local(PathBuf),
    Jar {
        archive: Arc<JarArchive>,
        entry: String,
    },
}

/// Class index over directories of class files and jars.
///
/// Roots are scanned in parallel; on duplicate names the earlier root wins.
#[derive(Debug)]
pub struct ClasspathIndex {
    name: String,
    roots: Vec<PathBuf>,
    classes: HashMap<String, ClassLocation>,
}

impl ClasspathIndex {
    pub fn build(name: impl Into<String>, roots: &[PathBuf]) -> Result<Self> {
        let roots = roots
            .iter()
            .map(|root| {
                std::path::absolute(root)
                    .with_context(|| format!("Failed to resolve classpath root: {}", root.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        let scanned: Vec<Vec<(String, ClassLocation)>> = roots
            .par_iter()
            .map(|root| index_root(root))
            .collect::<Result<_>>()?;

        let mut classes = HashMap::new();
        for entries in scanned {
            for (class, location) in entries {
                classes.entry(class).or_insert(location);
            }
        }

        let name = name.into();
        debug!(project = %name, roots = roots.len(), classes = classes.len(), "classpath indexed");
        Ok(Self {
            name,
            roots,
            classes,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ProjectIndex for ClasspathIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn contains_file(&self, path: &Path) -> bool {
        let rendered = path.to_string_lossy();
        self.roots.iter().any(|root| {
            path.starts_with(root) || rendered.starts_with(&format!("{}!/", root.display()))
        })
    }

    fn find_class(&self, qualified_name: &str) -> Option<Arc<dyn VirtualFile>> {
        match self.classes.get(qualified_name)? {
            ClassLocation::Local(path) => match LocalFile::new(path) {
                Ok(file) => Some(file as Arc<dyn VirtualFile>),
                Err(err) => {
                    debug!(class = qualified_name, error = %format!("{err:#}"), "class file vanished");
                    None
                }
            },
            ClassLocation::Jar { archive, entry } => {
                archive.file(entry).map(|f| f as Arc<dyn VirtualFile>)
            }
        }
    }
}

fn index_root(root: &Path) -> Result<Vec<(String, ClassLocation)>> {
    if root.is_file() {
        if root.extension().is_some_and(|e| e == "jar") {
            return index_jar(root);
        }
        warn!(root = %root.display(), "ignoring classpath entry that is neither a directory nor a jar");
        return Ok(Vec::new());
    }
    if !root.is_dir() {
        warn!(root = %root.display(), "classpath entry does not exist");
        return Ok(Vec::new());
    }

    let (class_files, jars) = scan_directory(root);

    let mut entries: Vec<(String, ClassLocation)> = Vec::new();
    let relative: Vec<(String, PathBuf)> = class_files
        .into_iter()
        .filter_map(|path| {
            let rel = path.strip_prefix(root).ok()?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            Some((rel, path))
        })
        .collect();
    let by_rel: HashMap<&str, &PathBuf> = relative.iter().map(|(r, p)| (r.as_str(), p)).collect();

    for (rel, path) in &relative {
        let top = top_level_entry(rel);
        let location = by_rel.get(top.as_str()).copied().unwrap_or(path);
        entries.push((class_key(rel), ClassLocation::Local(location.clone())));
    }

    let mut jars = jars;
    jars.sort();
    for jar in jars {
        match index_jar(&jar) {
            Ok(found) => entries.extend(found),
            Err(err) => warn!(jar = %jar.display(), error = %format!("{err:#}"), "skipping unreadable jar"),
        }
    }
    Ok(entries)
}

fn scan_directory(root: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if entry.file_type().is_some_and(|t| t.is_file())
                    && path.extension().is_some_and(|e| e == "class" || e == "jar")
                {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut classes = Vec::new();
    let mut jars = Vec::new();
    for path in rx {
        if path.extension().is_some_and(|e| e == "jar") {
            jars.push(path);
        } else {
            classes.push(path);
        }
    }
    classes.sort();
    (classes, jars)
}

fn index_jar(path: &Path) -> Result<Vec<(String, ClassLocation)>> {
    let archive = JarArchive::open(path)?;
    let mut entries = Vec::new();
    for entry in archive.entries() {
        if !entry.ends_with(".class") || entry.starts_with("META-INF/") {
            continue;
        }
        let top = top_level_entry(entry);
        let location = if archive.contains(&top) {
            top
        } else {
            entry.clone()
        };
        entries.push((
            class_key(entry),
            ClassLocation::Jar {
                archive: Arc::clone(&archive),
                entry: location,
            },
        ));
    }
    Ok(entries)
}

/// `a/b/Outer$Inner$Deep.class` -> `a/b/Outer.class`.
fn top_level_entry(entry: &str) -> String {
    let (dir, file) = match entry.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, entry),
    };
    let stem = file.trim_end_matches(".class");
    let top = stem.split('$').next().unwrap_or(stem);
    match dir {
        Some(dir) => format!("{dir}/{top}.class"),
        None => format!("{top}.class"),
    }
}

fn class_key(entry: &str) -> String {
    qualified_name(entry.trim_end_matches(".class"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::tests::{temp_dir, write_jar};
    use std::fs;

    #[test]
    fn qualified_names_flatten_nesting() {
        assert_eq!(qualified_name("a/b/Outer$Inner"), "a.b.Outer.Inner");
        assert_eq!(qualified_name("Top"), "Top");
        assert_eq!(top_level_entry("a/b/Outer$Inner$Deep.class"), "a/b/Outer.class");
        assert_eq!(top_level_entry("Outer.class"), "Outer.class");
    }

    #[test]
    fn nested_classes_resolve_to_the_top_level_file() -> Result<()> {
        let base = temp_dir("index_nested");
        let classes = base.join("classes/demo");
        fs::create_dir_all(&classes)?;
        fs::write(classes.join("Outer.class"), b"outer")?;
        fs::write(classes.join("Outer$Inner.class"), b"inner")?;
        fs::write(classes.join("Lone$Anon.class"), b"anon")?;

        let index = ClasspathIndex::build("demo", &[base.join("classes")])?;
        let outer = index.find_class("demo.Outer").unwrap();
        assert_eq!(outer.name(), "Outer.class");
        assert_eq!(index.find_class("demo.Outer.Inner").unwrap().name(), "Outer.class");
        // no top-level file, so the nested class stands for itself
        assert_eq!(index.find_class("demo.Lone.Anon").unwrap().name(), "Lone$Anon.class");
        assert!(index.find_class("demo.Missing").is_none());
        assert!(index.contains_file(&classes.join("Outer.class")));
        assert!(!index.contains_file(&base.join("elsewhere/X.class")));

        let _ = fs::remove_dir_all(base);
        Ok(())
    }

    #[test]
    fn jars_are_indexed_and_earlier_roots_win() -> Result<()> {
        let base = temp_dir("index_jars");
        let first = base.join("first.jar");
        let second = base.join("libs/second.jar");
        write_jar(&first, &[("org/example/A.class", b"first")])?;
        write_jar(
            &second,
            &[
                ("org/example/A.class", b"second"),
                ("org/example/B.class", b"b"),
                ("org/example/B$1.class", b"b1"),
            ],
        )?;

        let index = ClasspathIndex::build("jars", &[first.clone(), base.join("libs")])?;
        assert_eq!(index.len(), 3);
        assert_eq!(index.find_class("org.example.A").unwrap().contents()?, b"first");
        let nested = index.find_class("org.example.B.1").unwrap();
        assert_eq!(nested.contents()?, b"b");
        assert!(index.contains_file(&nested.path()));

        let _ = fs::remove_dir_all(base);
        Ok(())
    }
}
