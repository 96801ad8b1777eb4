//! Layered configuration: defaults, global file, explicit file, environment

use crate::integration::test_utils::with_isolated_env;
use clap::Parser;
use solc_broker::cli::Cli;
use solc_broker::config::{global_config_path, ConfigLoader};
use solc_broker::error::ErrorKind;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_global(test_dir: &TempDir, contents: &str) {
    let dir = test_dir.path().join("solc-broker");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_global_file_is_read_from_xdg_config_home() {
    let test_dir = TempDir::new().unwrap();
    write_global(&test_dir, "listen = \"127.0.0.1:9100\"\n");

    let config = with_isolated_env(&test_dir, &[], || {
        assert_eq!(
            global_config_path().unwrap(),
            test_dir.path().join("solc-broker").join("config.toml")
        );
        ConfigLoader::load(None).unwrap()
    });
    assert_eq!(config.listen, "127.0.0.1:9100");
    assert_eq!(config.default_version, "0.8.20");
}

#[test]
fn test_layers_override_in_order() {
    let test_dir = TempDir::new().unwrap();
    write_global(
        &test_dir,
        "listen = \"127.0.0.1:9100\"\ndefault_version = \"0.8.17\"\n",
    );
    let explicit = test_dir.path().join("broker.toml");
    std::fs::write(
        &explicit,
        "default_version = \"0.8.19\"\n[artifacts]\nplatform = \"linux-amd64\"\n",
    )
    .unwrap();

    let config = with_isolated_env(
        &test_dir,
        &[
            ("SOLC_BROKER__ARTIFACTS__PLATFORM", "macosx-amd64"),
            ("SOLC_BROKER__ARTIFACTS__VERIFY_CHECKSUMS", "false"),
        ],
        || ConfigLoader::load(Some(&explicit)).unwrap(),
    );

    // global file
    assert_eq!(config.listen, "127.0.0.1:9100");
    // explicit file beats the global file
    assert_eq!(config.default_version, "0.8.19");
    // environment beats both
    assert_eq!(config.artifacts.platform, "macosx-amd64");
    assert!(!config.artifacts.verify_checksums);
}

#[test]
fn test_invalid_layered_config_is_rejected() {
    let test_dir = TempDir::new().unwrap();
    write_global(&test_dir, "listen = \"nowhere\"\n");

    let result = with_isolated_env(&test_dir, &[], || ConfigLoader::load(None));
    let err = result.unwrap().validated().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(err.detail().contains("nowhere"));
}

#[test]
fn test_command_line_overrides_loaded_config() {
    let test_dir = TempDir::new().unwrap();
    let mut config = with_isolated_env(&test_dir, &[], || ConfigLoader::load(None).unwrap());

    let cli = Cli::parse_from([
        "solc-broker",
        "--listen",
        "127.0.0.1:9200",
        "--no-cache",
        "--log-format",
        "json",
        "--log-file",
        "/tmp/broker.log",
    ]);
    cli.apply(&mut config);

    assert_eq!(config.listen, "127.0.0.1:9200");
    assert!(!config.cache.enabled);
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.logging.file, PathBuf::from("/tmp/broker.log"));
    assert!(config.validated().is_ok());
}
