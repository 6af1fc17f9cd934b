use anyhow::{bail, Context, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use swimmer_common::TRAJECTORY_EXTENSION;

/// Every trajectory file below `root`, sorted by path.
pub fn find_trajectories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    visit(root, &mut found)?;
    found.sort();
    debug!("Found {} trajectories under {}", found.len(), root.display());
    Ok(found)
}

fn visit(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read directory '{}'", dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to read entry in '{}'", dir.display()))?
            .path();
        if path.is_dir() {
            visit(&path, found)?;
        } else if path.extension().is_some_and(|e| e == TRAJECTORY_EXTENSION) {
            found.push(path);
        }
    }
    Ok(())
}

/// The single trajectory below `root`; individual analysis refuses ambiguous input.
pub fn single_trajectory(root: &Path) -> Result<PathBuf> {
    let mut found = find_trajectories(root)?;
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => bail!("No .{} file found under '{}'", TRAJECTORY_EXTENSION, root.display()),
        n => bail!(
            "Expected exactly one .{} file under '{}', found {}",
            TRAJECTORY_EXTENSION,
            root.display(),
            n
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("swimmer_discover_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn scans_nested_directories_in_order() {
        let root = temp_dir("nested");
        fs::create_dir_all(root.join("b/deep")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        for file in ["b/deep/run.traj", "a/run.traj", "a/notes.txt", "top.traj"] {
            fs::write(root.join(file), b"").unwrap();
        }

        let found = find_trajectories(&root).unwrap();
        let relative: Vec<_> = found.iter().map(|p| p.strip_prefix(&root).unwrap().to_path_buf()).collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("a/run.traj"),
                PathBuf::from("b/deep/run.traj"),
                PathBuf::from("top.traj"),
            ]
        );
        assert!(single_trajectory(&root).is_err());
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn single_trajectory_requires_exactly_one() {
        let root = temp_dir("single");
        assert!(single_trajectory(&root).is_err());
        fs::write(root.join("only.traj"), b"").unwrap();
        assert_eq!(single_trajectory(&root).unwrap(), root.join("only.traj"));
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(find_trajectories(Path::new("/nonexistent/swimmer/runs")).is_err());
    }
}
