//! Repository scanning: file trees and project detection.

use std::path::Path;

use crate::domain::models::FileNode;

/// Directories never surfaced to agents or the API.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "target",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
    ".foreman",
];

fn is_ignored(name: &str) -> bool {
    IGNORED_DIRS.contains(&name) || name.starts_with(".git")
}

/// Recursively collect repo-relative file paths under `base`.
pub fn collect_files(repo_root: &Path, base: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(base) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if !is_ignored(&name) {
                collect_files(repo_root, &path, out);
            }
        } else if let Ok(relative) = path.strip_prefix(repo_root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}

/// Build the nested file-node tree for a repository, directories first,
/// each level sorted by name.
pub fn build_file_tree(repo_root: &Path) -> FileNode {
    let name = repo_root
        .file_name()
        .map_or_else(|| ".".to_string(), |n| n.to_string_lossy().into_owned());

    FileNode {
        name,
        path: String::new(),
        is_dir: true,
        children: build_children(repo_root, repo_root),
    }
}

fn build_children(repo_root: &Path, dir: &Path) -> Vec<FileNode> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut nodes: Vec<FileNode> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = path.is_dir();

            if is_dir && is_ignored(&name) {
                return None;
            }

            let relative = path
                .strip_prefix(repo_root)
                .ok()?
                .to_string_lossy()
                .replace('\\', "/");

            Some(FileNode {
                name,
                path: relative,
                is_dir,
                children: if is_dir {
                    build_children(repo_root, &path)
                } else {
                    Vec::new()
                },
            })
        })
        .collect();

    nodes.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    nodes
}

/// Detect project type and framework from marker files.
pub fn detect_project(repo_root: &Path) -> (Option<String>, Option<String>) {
    let has = |name: &str| repo_root.join(name).exists();

    if has("Cargo.toml") {
        let framework = std::fs::read_to_string(repo_root.join("Cargo.toml"))
            .ok()
            .and_then(|content| {
                ["axum", "actix-web", "rocket", "warp"]
                    .iter()
                    .find(|f| content.contains(**f))
                    .map(|f| (*f).to_string())
            });
        return (Some("rust".to_string()), framework);
    }

    if has("package.json") {
        let framework = std::fs::read_to_string(repo_root.join("package.json"))
            .ok()
            .and_then(|content| {
                [("next", "next"), ("react", "react"), ("vue", "vue"), ("express", "express")]
                    .iter()
                    .find(|(marker, _)| content.contains(&format!("\"{marker}\"")))
                    .map(|(_, name)| (*name).to_string())
            });
        return (Some("node".to_string()), framework);
    }

    if has("pyproject.toml") || has("requirements.txt") || has("setup.py") {
        let mut content = String::new();
        for marker in ["pyproject.toml", "requirements.txt"] {
            if let Ok(text) = std::fs::read_to_string(repo_root.join(marker)) {
                content.push_str(&text);
            }
        }
        let framework = [("fastapi", "fastapi"), ("django", "django"), ("flask", "flask")]
            .iter()
            .find(|(marker, _)| content.contains(marker))
            .map(|(_, name)| (*name).to_string());
        return (Some("python".to_string()), framework);
    }

    if has("go.mod") {
        return (Some("go".to_string()), None);
    }

    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_tree_shape() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi").unwrap();

        let tree = build_file_tree(dir.path());
        assert!(tree.is_dir);

        let names: Vec<&str> = tree.children.iter().map(|n| n.name.as_str()).collect();
        // Directories first, .git skipped
        assert_eq!(names, vec!["src", "README.md"]);
        assert_eq!(tree.children[0].children[0].path, "src/main.rs");
    }

    #[test]
    fn test_detect_rust_with_framework() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[dependencies]\naxum = \"0.7\"\n",
        )
        .unwrap();

        let (project, framework) = detect_project(dir.path());
        assert_eq!(project.as_deref(), Some("rust"));
        assert_eq!(framework.as_deref(), Some("axum"));
    }

    #[test]
    fn test_detect_python() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "fastapi==0.110\n").unwrap();

        let (project, framework) = detect_project(dir.path());
        assert_eq!(project.as_deref(), Some("python"));
        assert_eq!(framework.as_deref(), Some("fastapi"));
    }

    #[test]
    fn test_detect_unknown() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_project(dir.path()), (None, None));
    }
}
