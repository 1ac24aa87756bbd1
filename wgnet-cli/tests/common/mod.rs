#![allow(dead_code)]

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Interface name that will not exist on the test machine
pub const IFACE: &str = "wgnettest0";

/// Isolated wgnet and wg-quick config directories, plus a directory that
/// shadows host tools on `PATH`
pub struct TestEnv {
    _tmp: TempDir,
    pub config_dir: PathBuf,
    pub wg_dir: PathBuf,
    pub bin_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let config_dir = tmp.path().join("wgnet");
        let wg_dir = tmp.path().join("wireguard");
        let bin_dir = tmp.path().join("bin");
        fs::create_dir_all(&wg_dir).expect("create wg config dir");
        fs::create_dir_all(&bin_dir).expect("create bin dir");

        Self {
            _tmp: tmp,
            config_dir,
            wg_dir,
            bin_dir,
        }
    }

    /// `wgnet` pointed at this environment
    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("wgnet");
        cmd.env_remove("RUST_LOG")
            .env("PATH", search_path(&self.bin_dir))
            .arg("--path")
            .arg(&self.config_dir)
            .arg("--wg-config-dir")
            .arg(&self.wg_dir);
        cmd
    }

    /// A policy config named `name` for [`IFACE`]
    pub fn write_policy(&self, name: &str, body: &str) {
        fs::create_dir_all(&self.config_dir).expect("create config dir");
        fs::write(
            self.config_dir.join(format!("{}.conf", name)),
            format!("interface = \"{}\"\n{}", IFACE, body),
        )
        .expect("write policy");
    }

    /// A wg-quick config for [`IFACE`] with the given address
    pub fn write_wg_config(&self, address: &str) {
        fs::write(
            self.wg_dir.join(format!("{}.conf", IFACE)),
            format!(
                "[Interface]\nPrivateKey = aGVsbG8=\nAddress = {}\nListenPort = 51820\n",
                address
            ),
        )
        .expect("write wg config");
    }

    /// Shadow a host tool with a script that prints `stderr` and exits with `code`
    #[cfg(unix)]
    pub fn fake_tool(&self, name: &str, code: i32, stderr: &str) {
        use std::os::unix::fs::PermissionsExt;

        let path = self.bin_dir.join(name);
        fs::write(
            &path,
            format!("#!/bin/sh\nprintf '%s\\n' '{}' >&2\nexit {}\n", stderr, code),
        )
        .expect("write fake tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
    }
}

fn search_path(first: &Path) -> OsString {
    let mut dirs = vec![first.to_path_buf()];
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    std::env::join_paths(dirs).expect("join PATH")
}
