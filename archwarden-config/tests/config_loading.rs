use std::collections::HashMap;
use std::fs;

use archwarden_config::loader::{CONFIG_JSON_VAR, CONFIG_PATH_VAR};
use archwarden_config::{ConfigLoader, ConfigSource};
use tempfile::TempDir;

fn env_of(pairs: &[(&str, String)]) -> impl Fn(&str) -> Option<String> + use<> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect();
    move |key| map.get(key).cloned()
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn defaults_when_nothing_is_configured() {
    let dir = TempDir::new().expect("tempdir");
    let load = ConfigLoader::new()
        .with_search_root(dir.path())
        .load_with(no_env)
        .expect("defaults load");
    assert_eq!(load.source, ConfigSource::Default);
    assert_eq!(load.config.checkpoint_frequency, 64);
    assert!(load.warnings.is_empty());
}

#[test]
fn env_path_wins_over_inline_json_and_default_file() {
    let dir = TempDir::new().expect("tempdir");
    let env_file = dir.path().join("from-env.toml");
    fs::write(&env_file, "concurrency = 9\n").expect("write");
    fs::write(dir.path().join("archwarden.toml"), "concurrency = 2\n").expect("write");

    let env = env_of(&[
        (CONFIG_PATH_VAR, env_file.display().to_string()),
        (CONFIG_JSON_VAR, r#"{"concurrency": 5}"#.to_string()),
    ]);
    let load = ConfigLoader::new()
        .with_search_root(dir.path())
        .load_with(env)
        .expect("loads");
    assert_eq!(load.source, ConfigSource::EnvPath(env_file));
    assert_eq!(load.config.concurrency, 9);
}

#[test]
fn inline_json_wins_over_default_file() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("archwarden.toml"), "concurrency = 2\n").expect("write");

    let env = env_of(&[(
        CONFIG_JSON_VAR,
        r#"{"concurrency": 5, "slow_archive": {"threshold_ms": 1000}}"#.to_string(),
    )]);
    let load = ConfigLoader::new()
        .with_search_root(dir.path())
        .load_with(env)
        .expect("loads");
    assert_eq!(load.source, ConfigSource::EnvInline);
    assert_eq!(load.config.concurrency, 5);
    assert_eq!(load.config.slow_archive.threshold_ms, 1_000);
    assert_eq!(load.config.slow_archive.sample_checkpoints, 4);
}

#[test]
fn blank_env_values_are_ignored() {
    let dir = TempDir::new().expect("tempdir");
    let env = env_of(&[
        (CONFIG_PATH_VAR, "   ".to_string()),
        (CONFIG_JSON_VAR, String::new()),
    ]);
    let load = ConfigLoader::new()
        .with_search_root(dir.path())
        .load_with(env)
        .expect("loads");
    assert_eq!(load.source, ConfigSource::Default);
}

#[test]
fn default_files_are_searched_in_order() {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir(dir.path().join("config")).expect("mkdir");
    fs::write(
        dir.path().join("config/archwarden.toml"),
        "checkpoint_frequency = 8\n",
    )
    .expect("write");
    let load = ConfigLoader::new()
        .with_search_root(dir.path())
        .load_with(no_env)
        .expect("loads");
    assert_eq!(
        load.source,
        ConfigSource::File(dir.path().join("config/archwarden.toml"))
    );
    assert_eq!(load.config.checkpoint_frequency, 8);
    assert_eq!(load.warnings.items.len(), 1);

    fs::write(dir.path().join("archwarden.json"), r#"{"concurrency": 3}"#).expect("write");
    let load = ConfigLoader::new()
        .with_search_root(dir.path())
        .load_with(no_env)
        .expect("loads");
    assert_eq!(load.source, ConfigSource::File(dir.path().join("archwarden.json")));
    assert_eq!(load.config.concurrency, 3);
    assert_eq!(load.config.checkpoint_frequency, 64);
}

#[test]
fn explicit_path_beats_the_environment() {
    let dir = TempDir::new().expect("tempdir");
    let explicit = dir.path().join("scan.json");
    fs::write(&explicit, r#"{"retry": {"max_attempts": 5}}"#).expect("write");

    let env = env_of(&[(CONFIG_JSON_VAR, r#"{"concurrency": 5}"#.to_string())]);
    let load = ConfigLoader::new()
        .with_config_path(&explicit)
        .load_with(env)
        .expect("loads");
    assert_eq!(load.source, ConfigSource::Explicit(explicit));
    assert_eq!(load.config.retry.max_attempts, 5);
    assert_eq!(load.config.concurrency, 6);
}

#[test]
fn invalid_values_are_rejected_with_context() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("archwarden.toml"), "concurrency = 0\n").expect("write");
    let err = ConfigLoader::new()
        .with_search_root(dir.path())
        .load_with(no_env)
        .expect_err("zero concurrency rejected");
    let chain = format!("{err:#}");
    assert!(chain.contains("configuration rejected"), "{chain}");
    assert!(chain.contains("concurrency must be at least 1"), "{chain}");
}

#[test]
fn unreadable_config_path_names_the_file() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("nope.toml");
    let env = env_of(&[(CONFIG_PATH_VAR, missing.display().to_string())]);
    let err = ConfigLoader::new()
        .with_search_root(dir.path())
        .load_with(env)
        .expect_err("missing file");
    assert!(format!("{err:#}").contains("nope.toml"));
}
