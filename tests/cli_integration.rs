use std::process::Command;
use tempfile::tempdir;

fn bin() -> String {
    env!("CARGO_BIN_EXE_vcdelta").to_string()
}

#[test]
fn cli_encode_decode_roundtrip() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dictionary.bin");
    let target = dir.path().join("target.bin");
    let delta = dir.path().join("delta.vcdiff");
    let output = dir.path().join("output.bin");

    std::fs::write(&dictionary, b"abcde12345abcde12345abcde12345").unwrap();
    std::fs::write(&target, b"abcdeXXXXXabcde12345abcde12345!").unwrap();

    let st = Command::new(bin())
        .arg("--force")
        .args(["encode", "--dictionary"])
        .arg(&dictionary)
        .args(["--interleaved", "--checksum", "--target-matches"])
        .arg(&target)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());
    assert_eq!(&std::fs::read(&delta).unwrap()[..4], b"\xD6\xC3\xC4S");

    let st = Command::new(bin())
        .arg("--force")
        .args(["decode", "--chunk-size", "1", "--dictionary"])
        .arg(&dictionary)
        .arg(&delta)
        .arg(&output)
        .status()
        .unwrap();
    assert!(st.success());
    assert_eq!(
        std::fs::read(&output).unwrap(),
        std::fs::read(&target).unwrap()
    );
}

#[test]
fn cli_multi_window_vcd_target() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("target.bin");
    let delta = dir.path().join("delta.vcdiff");
    let output = dir.path().join("output.bin");

    let block: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(73)).collect();
    std::fs::write(&target, block.repeat(5)).unwrap();

    let st = Command::new(bin())
        .args(["encode", "--vcd-target", "--window-size", "100"])
        .arg(&target)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());

    let out = Command::new(bin())
        .args(["--stats", "decode"])
        .arg(&delta)
        .arg(&output)
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(std::fs::read(&output).unwrap(), block.repeat(5));
    let stats: serde_json::Value = serde_json::from_slice(&out.stderr).unwrap();
    assert_eq!(stats["command"], "decode");
    assert_eq!(stats["output_size"], 500);

    let st = Command::new(bin())
        .args(["--force", "decode", "--no-vcd-target"])
        .arg(&delta)
        .arg(&output)
        .status()
        .unwrap();
    assert!(!st.success());
}

#[test]
fn cli_refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.vcdiff");
    std::fs::write(&input, b"payload").unwrap();
    std::fs::write(&output, b"existing").unwrap();

    let out = Command::new(bin())
        .arg("encode")
        .arg(&input)
        .arg(&output)
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("-f"));
    assert_eq!(std::fs::read(&output).unwrap(), b"existing");
}

#[test]
fn cli_decode_rejects_window_over_limit() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let delta = dir.path().join("delta.vcdiff");
    let output = dir.path().join("out.bin");
    std::fs::write(&input, vec![b'x'; 4096]).unwrap();

    let st = Command::new(bin())
        .arg("encode")
        .arg(&input)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());

    let out = Command::new(bin())
        .args(["decode", "--max-window-size", "1K"])
        .arg(&delta)
        .arg(&output)
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("limit exceeded"));
}

#[test]
fn cli_json_output() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dictionary.txt");
    let input = dir.path().join("in.txt");
    std::fs::write(&dictionary, "The quick brown fox jumps over the lazy dog").unwrap();
    std::fs::write(&input, "The quick brown fox jumps over the lazy cat").unwrap();

    let out = Command::new(bin())
        .args(["encode", "--json", "--dictionary"])
        .arg(&dictionary)
        .arg(&input)
        .output()
        .unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value, serde_json::json!([0, 40, "cat"]));
}

#[test]
fn cli_inspect_prints_windows() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let delta = dir.path().join("delta.vcdiff");
    std::fs::write(&input, vec![7u8; 300]).unwrap();

    let st = Command::new(bin())
        .args(["encode", "--checksum", "--window-size", "100"])
        .arg(&input)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());

    let out = Command::new(bin())
        .arg("inspect")
        .arg(&delta)
        .output()
        .unwrap();
    assert!(out.status.success());
    let text = String::from_utf8(out.stdout).unwrap();
    assert!(text.contains("windows:              3"), "{text}");
    assert!(text.contains("run 1 (100 bytes)"), "{text}");
    assert!(text.contains("adler32"), "{text}");
}

#[test]
fn cli_inspect_rejects_garbage() {
    let dir = tempdir().unwrap();
    let delta = dir.path().join("garbage.bin");
    std::fs::write(&delta, b"not a delta").unwrap();

    let out = Command::new(bin())
        .arg("inspect")
        .arg(&delta)
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("vcdelta:"));
}
