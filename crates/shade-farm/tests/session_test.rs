//! Sessions: profile overlay, live sync and cleanup.
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use shade_config::testing::TestEnvironment;
use shade_farm::{FarmSession, Profile};

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    false
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

fn project_with_profile() -> TestEnvironment {
    let env = TestEnvironment::new().unwrap();
    env.create_file("src/main.rs", b"fn main() {}").unwrap();
    env.create_file(".opencode/skill/local/SKILL.md", b"local").unwrap();
    env.create_profile_file("AGENTS.md", b"be nice").unwrap();
    env.create_profile_file(".opencode/skill/review/SKILL.md", b"review")
        .unwrap();
    env
}

#[test]
fn test_session_overlays_profile() {
    let env = project_with_profile();
    let mut config = env.config();
    config.sync.enabled = false;
    let profile = Profile::load(&env.profile_dir).unwrap();

    let session = FarmSession::open(&env.project_root, Some(&profile), &config).unwrap();
    let farm = session.farm_dir().to_path_buf();

    assert_eq!(session.injected().injected.len(), 2);
    assert!(is_symlink(&farm.join("AGENTS.md")));
    assert_eq!(fs::read_to_string(farm.join("AGENTS.md")).unwrap(), "be nice");

    // The overlay needs a real directory to land in, the project's own skill stays visible
    assert!(!is_symlink(&farm.join(".opencode")));
    assert!(!is_symlink(&farm.join(".opencode/skill")));
    assert!(farm.join(".opencode/skill/review/SKILL.md").exists());
    assert!(farm.join(".opencode/skill/local/SKILL.md").exists());

    // The project never sees the overlay
    assert!(!env.project_root.join("AGENTS.md").exists());
    assert!(!env.project_root.join(".opencode/skill/review").exists());

    let report = session.close().unwrap();
    assert!(report.failures.is_empty());
    assert!(report.skipped_injections.is_empty());
    assert!(!farm.exists());
}

#[test]
fn test_farm_path_for_maps_project_dirs() {
    let env = project_with_profile();
    let mut config = env.config();
    config.sync.enabled = false;

    let session = FarmSession::open(&env.project_root, None, &config).unwrap();
    let farm = session.farm_dir().to_path_buf();

    assert_eq!(session.farm_path_for(&env.project_root), Some(farm.clone()));
    assert_eq!(
        session.farm_path_for(&env.project_root.join("src")),
        Some(farm.join("src"))
    );
    assert_eq!(session.farm_path_for(Path::new("/elsewhere")), None);
}

#[test]
fn test_session_syncs_new_files_back() {
    let env = project_with_profile();
    let profile = Profile::load(&env.profile_dir).unwrap();
    let session = FarmSession::open(&env.project_root, Some(&profile), &env.config()).unwrap();
    let farm = session.farm_dir().to_path_buf();

    fs::write(farm.join("notes.md"), "written in the farm").unwrap();
    let synced = env.project_root.join("notes.md");
    assert!(wait_until(|| fs::read_to_string(&synced).ok().as_deref()
        == Some("written in the farm")));

    // Edits through a source link already land in the project
    fs::write(farm.join("src/lib.rs"), "pub fn lib() {}").unwrap();
    assert!(env.project_root.join("src/lib.rs").exists());

    let report = session.close().unwrap();
    assert!(report.failures.is_empty());
    assert!(report.synced >= 1);
    assert!(!farm.exists());
    assert_eq!(
        fs::read_to_string(&synced).unwrap(),
        "written in the farm"
    );
    assert!(!env.project_root.join("AGENTS.md").exists());
}

#[test]
fn test_dropping_a_session_removes_the_farm() {
    let env = project_with_profile();
    let farm = {
        let session = FarmSession::open(&env.project_root, None, &env.config()).unwrap();
        session.farm_dir().to_path_buf()
    };
    assert!(!farm.exists());
    assert_eq!(fs::read_dir(&env.temp_base).unwrap().count(), 0);
    assert!(env.project_root.join("src/main.rs").exists());
}

#[test]
fn test_session_rejects_relative_project() {
    let env = TestEnvironment::new().unwrap();
    assert!(FarmSession::open(Path::new("project"), None, &env.config()).is_err());
}
