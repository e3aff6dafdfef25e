use std::{collections::HashMap, fs, path::PathBuf};

use strata_config::{
    CACHE_ROOT_VAR, CONFIG_JSON_VAR, CONFIG_PATH_VAR, ConfigSource,
    MEMORY_CAPACITY_VAR, StrataConfig,
};
use strata_model::{
    ByteSize, Dimensions, PreloadPolicy, ScaleMode, StorageEncoding,
};
use tempfile::TempDir;

const SAMPLE_TOML: &str = r#"
root = "/var/cache/strata"
memory_capacity = 64

[store]
touch_interval_ms = 1000

[[formats]]
name = "thumb"
size = { width = 100, height = 100 }
scale_mode = "aspect_fill"
persistent_capacity = "10MiB"
preload_policy = "recent"

[[formats]]
name = "poster"
size = { width = 400, height = 600 }
scale_mode = "aspect_fit"
storage_encoding = "png"
"#;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn defaults_when_nothing_is_configured() {
    let dir = TempDir::new().unwrap();
    let (config, source) =
        StrataConfig::load_with(env(&[]), dir.path()).unwrap();

    assert_eq!(source, ConfigSource::Default);
    assert_eq!(config, StrataConfig::default());
    assert!(config.formats.is_empty());
}

#[test]
fn default_file_is_discovered_and_parsed() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("config")).unwrap();
    let path = dir.path().join("config/strata.toml");
    fs::write(&path, SAMPLE_TOML).unwrap();

    let (config, source) =
        StrataConfig::load_with(env(&[]), dir.path()).unwrap();

    assert_eq!(source, ConfigSource::File(path));
    assert_eq!(config.root, Some(PathBuf::from("/var/cache/strata")));
    assert_eq!(config.memory_capacity, 64);
    assert_eq!(config.store.touch_interval_ms, 1000);
    // Unset keys keep their defaults.
    assert_eq!(config.store.access_index_flush_interval_ms, 30_000);

    let thumb = config.format("thumb").unwrap();
    assert_eq!(thumb.size, Dimensions::square(100));
    assert_eq!(thumb.scale_mode, ScaleMode::AspectFill);
    assert_eq!(thumb.persistent_capacity, ByteSize::from_mib(10));
    assert_eq!(thumb.preload_policy, PreloadPolicy::Recent);

    let poster = config.format("poster").unwrap();
    assert_eq!(poster.storage_encoding, StorageEncoding::Png);
    assert_eq!(poster.preload_policy, PreloadPolicy::None);
}

#[test]
fn env_path_wins_over_inline_json_and_default_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("strata.toml"), "memory_capacity = 1").unwrap();
    let explicit = dir.path().join("custom.json");
    fs::write(&explicit, r#"{ "memory_capacity": 7 }"#).unwrap();

    let explicit_str = explicit.to_str().unwrap();
    let (config, source) = StrataConfig::load_with(
        env(&[
            (CONFIG_PATH_VAR, explicit_str),
            (CONFIG_JSON_VAR, r#"{ "memory_capacity": 99 }"#),
        ]),
        dir.path(),
    )
    .unwrap();

    assert_eq!(source, ConfigSource::EnvPath(explicit));
    assert_eq!(config.memory_capacity, 7);
}

#[test]
fn inline_json_and_overrides() {
    let dir = TempDir::new().unwrap();
    let inline = r#"{ "formats": [
        { "name": "icon", "size": { "width": 16, "height": 16 } }
    ] }"#;
    let (config, source) = StrataConfig::load_with(
        env(&[
            (CONFIG_JSON_VAR, inline),
            (CACHE_ROOT_VAR, "/tmp/strata-override"),
            (MEMORY_CAPACITY_VAR, " 12 "),
        ]),
        dir.path(),
    )
    .unwrap();

    assert_eq!(source, ConfigSource::EnvInline);
    assert_eq!(config.root, Some(PathBuf::from("/tmp/strata-override")));
    assert_eq!(config.memory_capacity, 12);
    assert_eq!(config.format_definitions().len(), 1);

    let options = config.to_options().unwrap();
    assert_eq!(options.root, PathBuf::from("/tmp/strata-override"));
    assert_eq!(options.memory_capacity, 12);
}

#[test]
fn blank_variables_are_ignored() {
    let dir = TempDir::new().unwrap();
    let (_, source) = StrataConfig::load_with(
        env(&[(CONFIG_PATH_VAR, "  "), (CONFIG_JSON_VAR, "")]),
        dir.path(),
    )
    .unwrap();
    assert_eq!(source, ConfigSource::Default);
}

#[test]
fn bad_inputs_are_reported_with_context() {
    let dir = TempDir::new().unwrap();

    let err = StrataConfig::load_with(
        env(&[(MEMORY_CAPACITY_VAR, "lots")]),
        dir.path(),
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains(MEMORY_CAPACITY_VAR));

    let err =
        StrataConfig::load_with(env(&[(CONFIG_JSON_VAR, "{ nope")]), dir.path())
            .unwrap_err();
    assert!(format!("{err:#}").contains(CONFIG_JSON_VAR));

    let missing = dir.path().join("missing.toml");
    let err = StrataConfig::load_with(
        env(&[(CONFIG_PATH_VAR, missing.to_str().unwrap())]),
        dir.path(),
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("failed to read strata config"));
}

#[test]
fn duplicate_formats_fail_loading() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("strata.json"),
        r#"{ "formats": [
            { "name": "a", "size": { "width": 1, "height": 1 } },
            { "name": "a", "size": { "width": 2, "height": 2 } }
        ] }"#,
    )
    .unwrap();

    let err = StrataConfig::load_with(env(&[]), dir.path()).unwrap_err();
    assert!(err.to_string().contains("more than once"));
}
