//! End-to-end farm creation against real directory trees.
#![cfg(unix)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use shade_config::testing::TestEnvironment;
use shade_farm::{cleanup_farm, create_farm, FarmError, FarmOptions, MARKER_FILE};
use walkdir::WalkDir;

fn options(env: &TestEnvironment) -> FarmOptions {
    FarmOptions::from_config(&env.config())
}

/// Every file reachable through `root`, following links, as relative paths
fn visible_files(root: &Path) -> BTreeSet<PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
        .filter(|rel| rel != Path::new(MARKER_FILE))
        .collect()
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

#[test]
fn test_no_patterns_mirrors_everything_but_git() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("src/index.ts", b"export {}").unwrap();
    env.create_file("src/util/math.ts", b"export const one = 1").unwrap();
    env.create_file("package.json", b"{}").unwrap();
    env.create_file(".git/HEAD", b"ref: refs/heads/main").unwrap();
    env.create_file(".git/objects/ab/cdef", b"blob").unwrap();

    let farm = create_farm(&env.project_root, &options(&env)).unwrap();

    let mut expected = visible_files(&env.project_root);
    expected.retain(|rel| !rel.starts_with(".git"));
    assert_eq!(visible_files(farm.path()), expected);
    assert!(!farm.path().join(".git").exists());

    cleanup_farm(farm.path()).unwrap();
}

#[test]
fn test_concrete_overlay_layout() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("src/index.ts", b"export {}").unwrap();
    env.create_file(".opencode/skill/a/SKILL.md", b"a").unwrap();
    env.create_file(".opencode/skill/b/SKILL.md", b"b").unwrap();
    env.create_file(".opencode/command/x.md", b"x").unwrap();

    let opts = FarmOptions {
        include: vec![".opencode/skill/a/**".to_string()],
        ..options(&env)
    };
    let farm = create_farm(&env.project_root, &opts).unwrap();
    let root = farm.path();

    assert!(is_symlink(&root.join("src")));
    assert_eq!(
        fs::read_to_string(root.join("src/index.ts")).unwrap(),
        "export {}"
    );
    assert!(is_real_dir(&root.join(".opencode")) && !is_symlink(&root.join(".opencode")));
    assert!(is_real_dir(&root.join(".opencode/skill")));
    assert!(root.join(".opencode/skill/a/SKILL.md").exists());
    assert!(!root.join(".opencode/skill/b").exists());
    assert!(!root.join(".opencode/command").exists());
}

#[test]
fn test_partial_expansion_keeps_ancestors_real() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("a/b/c/file.txt", b"deep").unwrap();
    env.create_file("a/b/sibling.txt", b"sibling").unwrap();
    env.create_file("a/top.txt", b"top").unwrap();

    let opts = FarmOptions {
        include: vec!["a/b/c/**".to_string()],
        ..options(&env)
    };
    let farm = create_farm(&env.project_root, &opts).unwrap();
    let root = farm.path();

    assert!(!is_symlink(&root.join("a")) && is_real_dir(&root.join("a")));
    assert!(!is_symlink(&root.join("a/b")) && is_real_dir(&root.join("a/b")));
    assert!(is_symlink(&root.join("a/b/c")));
    assert!(root.join("a/b/c/file.txt").exists());
    assert!(!root.join("a/b/sibling.txt").exists());
    assert!(!root.join("a/top.txt").exists());
}

#[test]
fn test_exclude_and_reinclude() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("logs/keep.txt", b"keep").unwrap();
    env.create_file("logs/noise.txt", b"noise").unwrap();
    env.create_file("main.rs", b"fn main() {}").unwrap();

    let excluded = FarmOptions {
        exclude: vec!["logs/**".to_string()],
        ..options(&env)
    };
    let farm = create_farm(&env.project_root, &excluded).unwrap();
    assert_eq!(
        visible_files(farm.path()),
        BTreeSet::from([PathBuf::from("main.rs")])
    );

    let reincluded = FarmOptions {
        include: vec!["logs/keep.txt".to_string()],
        ..excluded
    };
    let farm = create_farm(&env.project_root, &reincluded).unwrap();
    assert_eq!(
        visible_files(farm.path()),
        BTreeSet::from([PathBuf::from("logs/keep.txt"), PathBuf::from("main.rs")])
    );
}

#[test]
fn test_gitignore_rules_hide_files() {
    let env = TestEnvironment::new().unwrap();
    env.create_file(".gitignore", b"*.secret\n!shared.secret\n").unwrap();
    env.create_file("api.secret", b"token").unwrap();
    env.create_file("shared.secret", b"public").unwrap();
    env.create_file("pkg/.gitignore", b"gen/\n").unwrap();
    env.create_file("pkg/gen/out.js", b"generated").unwrap();
    env.create_file("pkg/lib.rs", b"lib").unwrap();
    // A pattern under pkg makes the walk open it and meet its .gitignore
    let opts = FarmOptions {
        exclude: vec!["pkg/tmp/**".to_string()],
        ..options(&env)
    };

    let farm = create_farm(&env.project_root, &opts).unwrap();
    let root = farm.path();
    assert!(!root.join("api.secret").exists());
    assert!(root.join("shared.secret").exists());
    assert!(root.join("pkg/lib.rs").exists());
    // Ignored directories stay reachable as a single link
    assert!(is_symlink(&root.join("pkg/gen")));
}

#[test]
fn test_entry_limit_leaves_no_farm() {
    let env = TestEnvironment::new().unwrap();
    for i in 0..11 {
        env.create_file(&format!("f{i}.txt"), b"x").unwrap();
    }

    let opts = FarmOptions {
        max_entries: 10,
        ..options(&env)
    };
    let err = create_farm(&env.project_root, &opts).unwrap_err();
    assert!(matches!(err, FarmError::TooManyEntries { limit: 10 }));
    assert_eq!(fs::read_dir(&env.temp_base).unwrap().count(), 0);
}

#[test]
fn test_cleanup_never_touches_the_project() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("src/main.rs", b"fn main() {}").unwrap();

    let farm = create_farm(&env.project_root, &options(&env)).unwrap();
    let path = farm.path().to_path_buf();
    farm.cleanup().unwrap();
    cleanup_farm(&path).unwrap();

    assert!(!path.exists());
    assert!(env.project_root.join("src/main.rs").exists());
    assert_eq!(fs::read_dir(&env.temp_base).unwrap().count(), 0);
}
