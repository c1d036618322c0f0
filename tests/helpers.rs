//! Shared test utilities for imagesauce tests.
//!
//! [`ScriptedRunner`] stands in for the host: it records every command and
//! emulates the tools the customizer calls against the real (temporary)
//! filesystem, so the whole lifecycle runs without root or loop devices.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use imagesauce::config::Config;
use imagesauce::delegate::CustomizationDelegate;
use imagesauce::process::{Cmd, CommandResult, CommandRunner};
use std::cell::RefCell;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tempfile::TempDir;

/// Magic bytes marking a qcow2 file for [`ScriptedRunner`].
pub const QCOW2_MAGIC: &[u8] = b"QFI\xfb";

/// fdisk output for an image whose root partition starts at sector 2048.
pub const FDISK_2048: &str = "\
Disk disk.modifying: 2 GiB, 2147483648 bytes, 4194304 sectors
Units: sectors of 1 * 512 = 512 bytes
Sector size (logical/physical): 512 bytes / 512 bytes
I/O size (minimum/optimal): 512 bytes / 512 bytes
Disklabel type: gpt

Device             Start     End Sectors  Size Type
disk.modifying1     2048 4194270 4192223    2G Linux filesystem
";

pub const DPKG_QUERY_OUTPUT: &str = "bash\t5.1-6ubuntu1\ncloud-init\t23.1.2-0ubuntu0~22.04.1\n";

/// One command seen by the runner.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub privileged: bool,
}

impl Invocation {
    pub fn line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

type FailurePredicate = Box<dyn Fn(&str, &[String]) -> bool>;

/// Emulates host tools on the local filesystem.
pub struct ScriptedRunner {
    calls: RefCell<Vec<Invocation>>,
    failures: Vec<(FailurePredicate, i32, String)>,
    fdisk_output: String,
    mounted: RefCell<Option<PathBuf>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            failures: Vec::new(),
            fdisk_output: FDISK_2048.to_string(),
            mounted: RefCell::new(None),
        }
    }

    /// Make every invocation of `program` exit with `code`, printing `stderr`.
    pub fn failing(self, program: &str, code: i32, stderr: &str) -> Self {
        let program = program.to_string();
        self.failing_when(move |p, _| p == program, code, stderr)
    }

    /// Make invocations matching `predicate(program, args)` exit with `code`.
    pub fn failing_when<F>(mut self, predicate: F, code: i32, stderr: &str) -> Self
    where
        F: Fn(&str, &[String]) -> bool + 'static,
    {
        self.failures
            .push((Box::new(predicate), code, stderr.to_string()));
        self
    }

    pub fn with_fdisk_output(mut self, output: &str) -> Self {
        self.fdisk_output = output.to_string();
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, program: &str) -> bool {
        self.calls.borrow().iter().any(|c| c.program == program)
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.program == program)
            .cloned()
            .collect()
    }

    /// Position of the first call to `program`.
    pub fn position(&self, program: &str) -> Option<usize> {
        self.calls.borrow().iter().position(|c| c.program == program)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.borrow().is_some()
    }

    fn emulate(&self, program: &str, args: &[String]) -> Result<(String, String)> {
        match program {
            "file" => {
                let path = Path::new(&args[0]);
                let bytes = fs::read(path)?;
                if bytes.starts_with(QCOW2_MAGIC) {
                    Ok((format!("{}: QEMU QCOW2 Image (v3), 2147483648 bytes\n", args[0]), String::new()))
                } else {
                    Ok((format!("{}: DOS/MBR boot sector\n", args[0]), String::new()))
                }
            }
            "qemu-img" => {
                // convert -f <src fmt> -O <dst fmt> <src> <dst>
                let (src_fmt, dst_fmt, src, dst) = (&args[2], &args[4], &args[5], &args[6]);
                let bytes = fs::read(src)?;
                let payload = if src_fmt == "qcow2" {
                    bytes
                        .strip_prefix(QCOW2_MAGIC)
                        .ok_or_else(|| anyhow!("{} is not qcow2", src))?
                        .to_vec()
                } else {
                    bytes
                };
                let out = if dst_fmt == "qcow2" {
                    [QCOW2_MAGIC, payload.as_slice()].concat()
                } else {
                    payload
                };
                fs::write(dst, out)?;
                Ok((String::new(), String::new()))
            }
            "fdisk" => Ok((self.fdisk_output.clone(), String::new())),
            "mount" => {
                // mount -o loop,offset=N <image> <target>
                let target = PathBuf::from(&args[3]);
                if !target.is_dir() {
                    bail!("mount point {} does not exist", target.display());
                }
                *self.mounted.borrow_mut() = Some(target);
                Ok((String::new(), String::new()))
            }
            "mountpoint" => {
                // mountpoint -q <target>
                let target = Path::new(&args[1]);
                if self.mounted.borrow().as_deref() != Some(target) {
                    bail!("{} is not a mountpoint", target.display());
                }
                Ok((String::new(), String::new()))
            }
            "umount" => {
                if self.mounted.borrow_mut().take().is_none() {
                    bail!("{}: not mounted", args[0]);
                }
                Ok((String::new(), String::new()))
            }
            "cp" => {
                if args[0] == "-a" {
                    copy_preserving_links(Path::new(&args[1]), Path::new(&args[2]))?;
                } else {
                    fs::copy(&args[0], &args[1])?;
                }
                Ok((String::new(), String::new()))
            }
            "rm" => {
                let path = Path::new(&args[1]);
                if fs::symlink_metadata(path).is_ok() {
                    fs::remove_file(path)?;
                }
                Ok((String::new(), String::new()))
            }
            "mv" => {
                fs::rename(&args[0], &args[1])?;
                Ok((String::new(), String::new()))
            }
            "ls" => Ok((format!("-rw-r--r-- 1 root root 57 {}\n", args[1]), String::new())),
            "dpkg-query" => Ok((DPKG_QUERY_OUTPUT.to_string(), String::new())),
            "cpc-sbom" => Ok((
                "{\"spdxVersion\": \"SPDX-2.3\"}\n".to_string(),
                "scanned 2 packages\n".to_string(),
            )),
            "chimg" => {
                // chimg chrootfs <config> <root>
                fs::write(Path::new(&args[2]).join("chimg-applied"), &args[1])?;
                Ok((String::new(), String::new()))
            }
            "snap" => Ok((String::new(), String::new())),
            other => bail!("unexpected program {}", other),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        let invocation = Invocation {
            program: cmd.program().to_string(),
            args: cmd.get_args().to_vec(),
            privileged: cmd.is_privileged(),
        };
        self.calls.borrow_mut().push(invocation.clone());

        let failure = self
            .failures
            .iter()
            .find(|(predicate, _, _)| predicate(invocation.program.as_str(), invocation.args.as_slice()));
        let (code, stdout, stderr) = match failure {
            Some((_, code, stderr)) => (*code, String::new(), stderr.clone()),
            None => match self.emulate(&invocation.program, &invocation.args) {
                Ok((stdout, stderr)) => (0, stdout, stderr),
                Err(e) => (1, String::new(), format!("{:#}\n", e)),
            },
        };

        let stdout = match cmd.stdout_file() {
            Some(path) => {
                fs::write(path, &stdout)?;
                String::new()
            }
            None => stdout,
        };
        let stderr = match cmd.stderr_file() {
            Some(path) => {
                fs::write(path, &stderr)?;
                String::new()
            }
            None => stderr,
        };

        Ok(CommandResult {
            status: ExitStatus::from_raw(code << 8),
            stdout,
            stderr,
        })
    }
}

fn copy_preserving_links(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        std::os::unix::fs::symlink(fs::read_link(src)?, dst)?;
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}

/// Records what it was asked to apply and touches the root.
#[derive(Default)]
pub struct RecordingDelegate {
    pub applied: RefCell<Vec<(PathBuf, PathBuf)>>,
}

impl CustomizationDelegate for RecordingDelegate {
    fn apply(&self, config: &Path, root: &Path) -> Result<()> {
        // name resolution is what the shim is for
        let resolv = fs::read_to_string(root.join("etc/resolv.conf"))?;
        if !resolv.contains("nameserver") {
            bail!("no nameserver inside the root");
        }
        fs::write(root.join("etc/customized"), "yes\n")?;
        self.applied
            .borrow_mut()
            .push((config.to_path_buf(), root.to_path_buf()));
        Ok(())
    }
}

/// Always fails, like a chimg run with a broken config.
pub struct FailingDelegate;

impl CustomizationDelegate for FailingDelegate {
    fn apply(&self, _config: &Path, _root: &Path) -> Result<()> {
        bail!("chimg chrootfs exited with code 2: apt-get update failed")
    }
}

/// Unmounts the root itself before returning, like a chroot teardown that
/// releases more than it set up.
pub struct UnmountingDelegate<'a> {
    pub runner: &'a ScriptedRunner,
}

impl CustomizationDelegate for UnmountingDelegate<'_> {
    fn apply(&self, _config: &Path, root: &Path) -> Result<()> {
        fs::write(root.join("etc/customized"), "yes\n")?;
        self.runner
            .run(Cmd::new("umount").arg_path(root).privileged())?;
        Ok(())
    }
}

/// Temporary directory laid out like a customization run.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
    pub mount: PathBuf,
    pub chimg_config: PathBuf,
    pub host_resolv: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let mount = base.join("mnt");
        fs::create_dir_all(mount.join("etc")).expect("Failed to create mock root");
        fs::create_dir_all(mount.join("usr/bin")).expect("Failed to create mock root");
        fs::write(mount.join("usr/bin/bash"), "").expect("Failed to create mock binary");

        let chimg_config = base.join("add-ppa.yaml");
        fs::write(&chimg_config, "kernel: {}\n").expect("Failed to write chimg config");

        let host_resolv = base.join("host-resolv.conf");
        fs::write(&host_resolv, "nameserver 192.0.2.53\n").expect("Failed to write resolv.conf");

        Self {
            input: base.join("images/jammy.qcow2"),
            output: base.join("out/jammy-custom.qcow2"),
            mount,
            chimg_config,
            host_resolv,
            _temp_dir: temp_dir,
        }
    }

    pub fn dir(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Write the input image, with a qcow2 header if `qcow2`.
    pub fn write_input(&self, payload: &[u8], qcow2: bool) {
        fs::create_dir_all(self.input.parent().unwrap()).expect("Failed to create images dir");
        let bytes = if qcow2 {
            [QCOW2_MAGIC, payload].concat()
        } else {
            payload.to_vec()
        };
        fs::write(&self.input, bytes).expect("Failed to write input image");
    }

    /// Configuration for tests: no escalation, no settle delay.
    pub fn config(&self) -> Config {
        Config {
            unmount_settle: Duration::ZERO,
            host_resolv_conf: self.host_resolv.clone(),
            ..Config::default()
        }
    }

    pub fn root_resolv(&self) -> PathBuf {
        self.mount.join("etc/resolv.conf")
    }
}
