use std::{env, fs};

use octofhir_sync::config::loader::load_config;
use octofhir_sync::{HttpVerb, PatchMode, RequestConfig, SplitterConfig};

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("octofhir-sync.toml");

    let toml_content = r#"
[upload]
patch_mode = "per_change"
use_etag_for_upload = true

[upload.request]
shape = "url"
create_verb = "POST"

[upload.splitter]
kind = "size_and_type"
page_size = 2
priority = ["Patient", "Encounter", "Observation"]

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses, missing fields take their defaults
    let cfg = load_config(Some(&path)).expect("should parse config");
    assert_eq!(cfg.upload.patch_mode, PatchMode::PerChange);
    assert_eq!(
        cfg.upload.request,
        RequestConfig::Url {
            create_verb: HttpVerb::Post,
            update_verb: HttpVerb::Patch,
        }
    );
    assert_eq!(
        cfg.upload.splitter,
        SplitterConfig::SizeAndType {
            page_size: 2,
            priority: vec!["Patient".into(), "Encounter".into(), "Observation".into()],
        }
    );
    assert_eq!(cfg.logging.level, "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("OCTOFHIR_SYNC__UPLOAD__USE_ETAG_FOR_UPLOAD", "false");
    }
    let cfg_env = load_config(Some(&path)).expect("should parse config with env overrides");
    assert!(!cfg_env.upload.use_etag_for_upload);
    unsafe {
        env::remove_var("OCTOFHIR_SYNC__UPLOAD__USE_ETAG_FOR_UPLOAD");
    }

    // 3) Unsupported verb combination is rejected before anything runs
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[upload.request]
shape = "bundle"
create_verb = "POST"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(Some(&invalid_path)).expect_err("expected validation error");
    assert!(err.to_string().contains("Creation using POST is not supported."));

    // 4) An explicit path must exist
    let absent = dir.path().join("absent.toml");
    let err = load_config(Some(&absent)).expect_err("expected missing file error");
    assert!(err.to_string().contains("config file not found"));
    assert!(err.to_string().contains("absent.toml"));

    // 5) Without a path, a missing default file falls back to defaults
    let cfg_default = load_config(None).expect("defaults");
    assert_eq!(cfg_default.upload.patch_mode, PatchMode::PerResource);
}
