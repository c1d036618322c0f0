//! SBOM generation with cpc-sbom.

use anyhow::{bail, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

use super::ManifestArtifacts;
use crate::process::{self, Cmd, CommandRunner};

/// Lines of the SBOM log quoted in the error when generation fails.
const LOG_TAIL_LINES: usize = 20;

/// Run the SBOM tool against `root`, installing it first if needed.
pub fn generate_sbom(
    runner: &dyn CommandRunner,
    program: &str,
    root: &Path,
    artifacts: &ManifestArtifacts,
) -> Result<()> {
    ensure_installed(runner, program)?;

    info!("Generating SBOM: {}", artifacts.sbom.display());
    let result = runner.run(
        Cmd::new(program)
            .arg("--rootdir")
            .arg_path(root)
            .arg("--ignore-copyright-parsing-errors")
            .arg("--ignore-copyright-file-not-found-errors")
            .arg("--document-name")
            .arg(&artifacts.sbom_document_name)
            .stdout_to(&artifacts.sbom)
            .stderr_to(&artifacts.sbom_log)
            .allow_fail(),
    )?;

    if !result.success() {
        error!("ERROR: SBOM generation failed.");
        let log = fs::read_to_string(&artifacts.sbom_log).unwrap_or_default();
        debug!("{}", log);
        bail!(
            "{} exited with code {} (log: {}):\n{}",
            program,
            result.code(),
            artifacts.sbom_log.display(),
            log_tail(&log, LOG_TAIL_LINES)
        );
    }

    Ok(())
}

/// Install the tool from the snap store if it is not on PATH.
fn ensure_installed(runner: &dyn CommandRunner, program: &str) -> Result<()> {
    if process::exists(program) {
        return Ok(());
    }

    info!("{} not found, installing it from the snap store", program);
    runner.run(
        Cmd::new("snap")
            .args(["install", "--classic", "--edge", program])
            .privileged()
            .error_msg(format!("Failed to install {}", program)),
    )?;
    Ok(())
}

fn log_tail(log: &str, lines: usize) -> String {
    let all: Vec<&str> = log.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_tail_short_log() {
        assert_eq!(log_tail("one\ntwo\n", 20), "one\ntwo");
    }

    #[test]
    fn test_log_tail_truncates() {
        let log: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        let tail = log_tail(&log, 3);
        assert_eq!(tail, "line 28\nline 29\nline 30");
    }

    #[test]
    fn test_log_tail_empty() {
        assert_eq!(log_tail("", 5), "");
    }
}
