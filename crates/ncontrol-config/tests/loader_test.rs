#![allow(clippy::unwrap_used)]
// File discovery and layering tests for the config loader.

use std::fs;

use figment::Jail;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use ncontrol_config::{config_files, load_from};

/// Run `test` under figment's jail so environment changes made by one
/// test are never visible to another.
fn jailed(test: impl FnOnce()) {
    Jail::expect_with(|_jail| {
        test();
        Ok(())
    });
}

fn write(dir: &TempDir, name: &str, body: &str) {
    fs::write(dir.path().join(name), body).unwrap();
}

#[test]
fn test_defaults_without_files() {
    jailed(|| {
        let dir = TempDir::new().unwrap();
        let config = load_from(&[dir.path().to_path_buf()], None).unwrap();
        assert_eq!(config.ws_url, "http://localhost:2880/");
        assert_eq!(config.endpoint_id, "overrideme");
        assert!(!config.use_stub_communicator);
        assert_eq!(config.communicator_packages, None);
    });
}

#[test]
fn test_named_config_overrides_base() {
    jailed(|| {
        let etc = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        write(&etc, "config.json", r#"{ "wsUrl": "http://devctrl.local:2880/", "endpointId": "E1" }"#);
        write(&local, "config.json", r#"{ "endpointId": "E2" }"#);
        write(&etc, "projector.json", r#"{ "endpointId": "E3", "useStubCommunicator": true }"#);

        let dirs = vec![etc.path().to_path_buf(), local.path().to_path_buf()];
        let found = config_files(&dirs, Some("projector"));
        assert_eq!(
            found,
            vec![
                etc.path().join("config.json"),
                local.path().join("config.json"),
                etc.path().join("projector.json"),
            ]
        );

        let config = load_from(&dirs, Some("projector")).unwrap();
        assert_eq!(config.ws_url, "http://devctrl.local:2880/");
        assert_eq!(config.endpoint_id, "E3");
        assert!(config.use_stub_communicator);
    });
}

#[test]
fn test_named_config_ignored_without_name() {
    jailed(|| {
        let dir = TempDir::new().unwrap();
        write(&dir, "projector.json", r#"{ "endpointId": "E3" }"#);
        let config = load_from(&[dir.path().to_path_buf()], None).unwrap();
        assert_eq!(config.endpoint_id, "overrideme");
    });
}

#[test]
fn test_package_list_and_tuning() {
    jailed(|| {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "config.json",
            r#"{ "communicatorPackages": ["vendor", "ncontrol-builtin"], "requestTimeoutSecs": 5 }"#,
        );
        let config = load_from(&[dir.path().to_path_buf()], None).unwrap();
        assert_eq!(
            config.communicator_packages,
            Some(vec!["vendor".to_owned(), "ncontrol-builtin".to_owned()])
        );

        let agent = config.into_agent_config().unwrap();
        assert_eq!(agent.request_timeout.as_secs(), 5);
    });
}

#[test]
fn test_malformed_file_is_an_error() {
    jailed(|| {
        let dir = TempDir::new().unwrap();
        write(&dir, "config.json", "{ not json");
        assert!(load_from(&[dir.path().to_path_buf()], None).is_err());
    });
}

#[test]
fn test_environment_wins_over_files() {
    Jail::expect_with(|jail| {
        jail.create_file("config.json", r#"{ "endpointId": "E1", "ioPath": "/io" }"#)?;
        jail.set_env("NCONTROL_ENDPOINT_ID", "E42");
        jail.set_env("NCONTROL_USE_STUB_COMMUNICATOR", "true");

        let config = load_from(&[jail.directory().to_path_buf()], None).unwrap();
        assert_eq!(config.endpoint_id, "E42");
        assert_eq!(config.io_path, "/io");
        assert!(config.use_stub_communicator);
        Ok(())
    });
}
