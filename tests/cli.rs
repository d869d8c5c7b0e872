use std::process::Command;

fn restruct_binary() -> String {
    std::env::var("CARGO_BIN_EXE_restruct").unwrap_or_else(|_| {
        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("restruct");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    })
}

#[test]
fn restruct_exits_non_zero_on_missing_input() {
    let output = Command::new(restruct_binary())
        .arg("--input")
        .arg("missing.class")
        .output()
        .expect("run restruct");

    assert!(!output.status.success());
}

#[test]
fn restruct_writes_json_for_an_empty_directory() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = Command::new(restruct_binary())
        .arg("--input")
        .arg(dir.path())
        .arg("--quiet")
        .output()
        .expect("run restruct");

    assert!(output.status.success());
    let rendered: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON on stdout");
    assert!(rendered.get("paths").is_some());
}
