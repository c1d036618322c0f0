//! Host tool availability checks.

use crate::config::Config;
use crate::process::Escalation;

use super::types::CheckResult;

/// Tools every `customize-image` run invokes.
const REQUIRED_TOOLS: [(&str, &str, &str); 10] = [
    ("file", "file", "Required to detect the input image format"),
    ("qemu-img", "qemu-utils", "Required to convert qcow2 images"),
    ("fdisk", "fdisk", "Required to locate the root partition"),
    ("mount", "mount", "Required to loop mount the image"),
    ("umount", "mount", "Required to unmount the image"),
    ("mountpoint", "util-linux", "Required to verify unmounting"),
    ("dpkg-query", "dpkg", "Required to write the package manifest"),
    ("cp", "coreutils", "Required for the resolv.conf shim"),
    ("mv", "coreutils", "Required for the resolv.conf shim"),
    ("rm", "coreutils", "Required for the resolv.conf shim"),
];

/// Check host tools are installed.
pub fn check_host_tools(config: &Config) -> Vec<CheckResult> {
    let mut results: Vec<CheckResult> = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool_exists(tool, package, purpose, true))
        .collect();

    results.push(check_tool_exists(
        &config.chimg_program,
        "chimg",
        "Required unless a different customization delegate is used",
        false,
    ));
    results.push(check_tool_exists(
        &config.sbom_program,
        "cpc-sbom",
        "Required for --generate-sbom (installed from the snap store on demand)",
        false,
    ));
    results.push(check_tool_exists(
        "snap",
        "snapd",
        "Required to install the SBOM tool on demand",
        false,
    ));

    match &config.escalation {
        Escalation::None => {}
        Escalation::Sudo => {
            results.push(check_tool_exists(
                "sudo",
                "sudo",
                "Required for privileged commands (or set IMAGESAUCE_ESCALATION=none)",
                true,
            ));
        }
        Escalation::Program(program) => {
            results.push(check_tool_exists(
                program,
                program,
                "Configured in IMAGESAUCE_ESCALATION",
                true,
            ));
        }
    }

    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        Err(_) => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::CheckStatus;

    #[test]
    fn test_missing_required_tool_fails() {
        let result = check_tool_exists("definitely_not_a_real_tool_98765", "nope", "", true);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.details.unwrap().contains("'nope'"));
    }

    #[test]
    fn test_missing_optional_tool_warns() {
        let result = check_tool_exists("definitely_not_a_real_tool_98765", "nope", "", false);
        assert_eq!(result.status, CheckStatus::Warn);
    }

    #[test]
    fn test_present_tool_passes() {
        let result = check_tool_exists("sh", "dash", "", true);
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[test]
    fn test_escalation_checked_when_configured() {
        let config = Config {
            escalation: Escalation::Program("doas-not-installed-here".into()),
            ..Config::default()
        };
        let results = check_host_tools(&config);
        let last = results.last().unwrap();
        assert_eq!(last.name, "doas-not-installed-here");
        assert_eq!(last.status, CheckStatus::Fail);
    }
}
