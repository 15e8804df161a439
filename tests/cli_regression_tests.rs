// Regression test: one-shot CLI commands work against an on-disk ledger without starting the node
use std::fs;
use std::process::Command;

#[test]
fn oneshot_commands_manage_accounts_and_keys() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let db_dir = tmp.path().join("data");
    let key_file = tmp.path().join("network.key");

    let cfg_contents = r#"[node]
username = "cli-tester"

[net]
bind = "127.0.0.1"
listen_port = 0
seeds = []

[storage]
path = "__DB_PATH__"

[crypto]
key_file = "__KEY_PATH__"

[metrics]
enabled = false
bind = "127.0.0.1:9199"
"#;

    let cfg_path = tmp.path().join("config.toml");
    let cfg_text = cfg_contents
        .replace("__DB_PATH__", db_dir.to_str().unwrap())
        .replace("__KEY_PATH__", key_file.to_str().unwrap());
    fs::write(&cfg_path, cfg_text).unwrap();

    // Helper to run the binary with a subcommand
    let run = |args: &[&str]| {
        let out = Command::new(env!("CARGO_BIN_EXE_lanledger"))
            .arg("--config")
            .arg(cfg_path.to_str().unwrap())
            .args(args)
            .env_remove("LANLEDGER_PASSPHRASE")
            .env("RUST_LOG", "warn")
            .output()
            .expect("run binary");
        (out.status.success(), String::from_utf8_lossy(&out.stdout).into_owned())
    };

    let (ok, stdout) = run(&["add-user", "alice"]);
    assert!(ok, "add-user failed: {stdout}");
    let (ok, _) = run(&["add-user", "bob", "--balance", "25"]);
    assert!(ok);
    let (ok, _) = run(&["add-user", "alice"]);
    assert!(!ok, "duplicate account must be refused");

    let (ok, stdout) = run(&["balance", "alice"]);
    assert!(ok);
    assert!(stdout.contains("alice: 1000.00"), "unexpected balance output: {stdout}");
    let (_, stdout) = run(&["balance", "bob"]);
    assert!(stdout.contains("bob: 25.00"), "unexpected balance output: {stdout}");

    let (ok, stdout) = run(&["history", "alice"]);
    assert!(ok);
    assert!(stdout.contains("No transactions"), "fresh account has no history: {stdout}");

    let (ok, first) = run(&["key"]);
    assert!(ok);
    let (_, second) = run(&["key"]);
    let first = first.trim().lines().last().unwrap_or_default().to_string();
    assert_eq!(first.len(), 64, "key is printed as 32 bytes of hex");
    assert_eq!(first, second.trim().lines().last().unwrap_or_default(), "key is stable across runs");
    assert!(key_file.exists());
}
