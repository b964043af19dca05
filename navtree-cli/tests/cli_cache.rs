use assert_cmd::Command;
use navtree_cache::{CacheConfig, HierarchyCache};
use navtree_types::{CombinedHierarchyLevelIdentifier, HierarchyLevelIdentifier};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("navtree.yml");
    fs::write(
        &path,
        format!(
            "location:\n  directory: {}\nfile_name: cache.db\n",
            dir.join("store").display()
        ),
    )
    .unwrap();
    path
}

fn seed_levels(config: &Path, connections: &[&str]) {
    let cache = HierarchyCache::open(CacheConfig::from_file(config).unwrap()).unwrap();
    for connection in connections {
        let combined = CombinedHierarchyLevelIdentifier::new(*connection, "r1", "en", None);
        cache
            .ensure_hierarchy_level(&HierarchyLevelIdentifier::new(combined, None))
            .unwrap();
    }
}

fn navtree(config: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("navtree").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let assert = cmd.assert().success();
    serde_json::from_slice(&assert.get_output().stdout).unwrap()
}

#[test]
fn stats_json_reports_empty_store() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    let stats = json_output(navtree(&config).args(["stats", "--json"]));
    assert_eq!(stats["nodes"], 0);
    assert_eq!(stats["hierarchy_levels"], 0);
}

#[test]
fn levels_are_listed_and_cleared_per_connection() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    seed_levels(&config, &["c1", "c2"]);

    let levels = json_output(navtree(&config).args(["levels", "--json"]));
    assert_eq!(levels.as_array().unwrap().len(), 2);

    let levels = json_output(navtree(&config).args(["levels", "--connection", "c1", "--json"]));
    let levels = levels.as_array().unwrap();
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0]["identifier"]["combined"]["connection_id"], "c1");

    navtree(&config)
        .args(["clear", "--connection", "c1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared connection c1"));

    let levels = json_output(navtree(&config).args(["levels", "--json"]));
    let levels = levels.as_array().unwrap();
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0]["identifier"]["combined"]["connection_id"], "c2");
}

#[test]
fn levels_text_output_mentions_empty_store() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    navtree(&config)
        .arg("levels")
        .assert()
        .success()
        .stdout(predicate::str::contains("No cached hierarchy levels"));
}

#[test]
fn compact_requires_a_limit() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    navtree(&config)
        .arg("compact")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--limit-bytes"));

    navtree(&config)
        .args(["compact", "--limit-bytes", "100000000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Compacted"));
}

#[test]
fn missing_config_fails() {
    let dir = tempdir().unwrap();

    navtree(&dir.path().join("absent.yml"))
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
