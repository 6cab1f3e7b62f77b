use assert_cmd::Command;
use tempfile::tempdir;

fn sofs14() -> Command {
	Command::cargo_bin("sofs14").unwrap()
}

fn stdout_of(cmd: &mut Command) -> String {
	let output = cmd.output().unwrap();
	assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
	String::from_utf8(output.stdout).unwrap()
}

#[test]
fn mkfs_then_showblock() {
	let dir = tempdir().unwrap();
	let img = dir.path().join("vol.img");

	sofs14()
		.args(["mkfs", img.to_str().unwrap(), "400", "-n", "testvol"])
		.assert()
		.success();

	let out = stdout_of(sofs14().args(["showblock", img.to_str().unwrap()]));
	assert!(out.contains("root refcount:   2"), "{out}");
}

#[test]
fn mkfs_then_fsck_reports_no_defects() {
	let dir = tempdir().unwrap();
	let img = dir.path().join("vol.img");

	sofs14().args(["mkfs", img.to_str().unwrap(), "400"]).assert().success();

	let out = stdout_of(sofs14().args(["fsck", img.to_str().unwrap()]));
	assert!(out.contains("no defects found"), "{out}");
}

#[test]
fn showblock_on_missing_file_fails() {
	let dir = tempdir().unwrap();
	let img = dir.path().join("nope.img");

	sofs14().args(["showblock", img.to_str().unwrap()]).assert().failure();
}
