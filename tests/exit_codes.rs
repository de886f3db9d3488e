use std::process::Command;

#[test]
fn qualcheck_exits_non_zero_on_missing_input() {
    let qualcheck = std::env::var("CARGO_BIN_EXE_qualcheck").unwrap_or_else(|_| {
        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("qualcheck");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    });
    let output = Command::new(qualcheck)
        .arg("--input")
        .arg("missing.json")
        .output()
        .expect("run qualcheck");

    assert!(!output.status.success());
}
