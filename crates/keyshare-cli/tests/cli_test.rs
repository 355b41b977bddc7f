//! Integration tests for the keyshare binary

use std::process::{Command, Output};

use keyshare_config::testing::TestEnvironment;

/// Run keyshare against the environment's store, from its scratch directory
/// so no project config is picked up.
fn keyshare(env: &TestEnvironment, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_keyshare"))
        .current_dir(&env.scratch_dir)
        .envs(env.store_env())
        .env_remove("KEYSHARE_DOWNLOAD_LIMIT")
        .args(args)
        .output()
        .expect("Failed to execute keyshare")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn upload(env: &TestEnvironment, name: &str, content: &[u8]) -> (String, String) {
    let file = env.create_file(name, content).unwrap();
    let output = keyshare(env, &["upload", file.to_str().unwrap()]);
    assert!(output.status.success(), "upload failed: {:?}", output);
    let tokens: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    (
        tokens["privateKey"].as_str().unwrap().to_string(),
        tokens["publicKey"].as_str().unwrap().to_string(),
    )
}

#[test]
fn test_upload_download_delete() {
    let env = TestEnvironment::new().unwrap();
    let (owner, share) = upload(&env, "hello.txt", b"hi there");

    let output = keyshare(&env, &["download", &share, "--origin", "cli"]);
    assert!(output.status.success());
    assert_eq!(output.stdout, b"hi there");

    let out_path = env.scratch_dir.join("copy.txt");
    let output = keyshare(
        &env,
        &["download", &share, "--origin", "cli", "-o", out_path.to_str().unwrap()],
    );
    assert!(output.status.success());
    assert_eq!(std::fs::read(&out_path).unwrap(), b"hi there");

    // Share tokens never delete.
    assert!(!keyshare(&env, &["delete", &share]).status.success());

    assert!(keyshare(&env, &["delete", &owner]).status.success());
    let output = keyshare(&env, &["download", &share, "--origin", "cli"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No stored file"));
}

#[test]
fn test_verify_reports_token_kind() {
    let env = TestEnvironment::new().unwrap();
    let (owner, share) = upload(&env, "a.txt", b"x");

    let output = keyshare(&env, &["verify", &share]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["share"], true);
    assert_eq!(report["owner"], false);

    let report: serde_json::Value =
        serde_json::from_str(&stdout(&keyshare(&env, &["verify", &owner]))).unwrap();
    assert_eq!(report["owner"], true);

    assert!(!keyshare(&env, &["verify", "nonsense"]).status.success());
}

#[test]
fn test_quota_exhaustion() {
    let env = TestEnvironment::new().unwrap();
    let (_, share) = upload(&env, "a.txt", b"x");

    let limited = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_keyshare"))
            .current_dir(&env.scratch_dir)
            .envs(env.store_env())
            .env("KEYSHARE_DOWNLOAD_LIMIT", "1")
            .args(args)
            .output()
            .unwrap()
    };

    assert!(limited(&["download", &share, "--origin", "o"]).status.success());
    assert!(limited(&["download", &share, "--origin", "o"]).status.success());
    let output = limited(&["download", &share, "--origin", "o"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Download limit reached"));

    assert!(stdout(&limited(&["quota", "o"])).contains("0 downloads left"));
    assert!(stdout(&limited(&["quota", "fresh"])).contains("no downloads yet (limit 1)"));
}

#[test]
fn test_list_and_stats() {
    let env = TestEnvironment::new().unwrap();
    assert!(stdout(&keyshare(&env, &["list"])).contains("No files stored"));

    let (_, share) = upload(&env, "a.txt", b"12345");
    let listing = stdout(&keyshare(&env, &["list"]));
    assert!(listing.contains(&share));
    assert!(listing.contains("a.txt"));

    let records: serde_json::Value =
        serde_json::from_str(&stdout(&keyshare(&env, &["list", "--json"]))).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 1);
    assert_eq!(records[0]["fileName"], "a.txt");

    let stats = stdout(&keyshare(&env, &["stats"]));
    assert!(stats.contains("Files:    1"));
    assert!(stats.contains("Bytes:    5"));
}

#[test]
fn test_root_flag_overrides_environment() {
    let env = TestEnvironment::new().unwrap();
    let other = env.scratch_dir.join("elsewhere");
    let file = env.create_file("a.txt", b"x").unwrap();

    let output = keyshare(
        &env,
        &["--root", other.to_str().unwrap(), "upload", file.to_str().unwrap()],
    );
    assert!(output.status.success());
    assert!(other.join("files").join("data.json").exists());
    assert!(!env.folder_dir().exists());
}

#[test]
fn test_config_show_and_path() {
    let env = TestEnvironment::new().unwrap();

    let output = keyshare(&env, &["config", "show"]);
    assert!(output.status.success());
    let shown = stdout(&output);
    assert!(shown.contains("[storage]"));
    assert!(shown.contains("[quota]"));
    assert!(shown.contains("[ledger]"));
    assert!(shown.contains(env.store_root.to_str().unwrap()));

    let paths = stdout(&keyshare(&env, &["config", "path"]));
    assert!(paths.contains("Project:"));
    assert!(paths.contains("Store:"));
}

#[test]
fn test_config_init_writes_project_file_once() {
    let env = TestEnvironment::new().unwrap();

    assert!(keyshare(&env, &["config", "init"]).status.success());
    let written = env.scratch_dir.join(".keyshare/config.toml");
    let contents = std::fs::read_to_string(&written).unwrap();
    assert!(contents.contains("download_limit"));

    assert!(!keyshare(&env, &["config", "init"]).status.success());
    assert!(keyshare(&env, &["config", "init", "--force"]).status.success());
}

#[test]
fn test_reserved_folder_is_refused_but_config_still_shows() {
    let env = TestEnvironment::new().unwrap();
    let file = env.create_file("a.txt", b"x").unwrap();
    let with_folder = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_keyshare"))
            .current_dir(&env.scratch_dir)
            .envs(env.store_env())
            .env("KEYSHARE_FOLDER", ".locks")
            .args(args)
            .output()
            .unwrap()
    };

    let output = with_folder(&["upload", file.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid storage folder"));
    assert!(!env.store_root.join(".locks").join("data.json").exists());

    assert!(with_folder(&["config", "show"]).status.success());
}
