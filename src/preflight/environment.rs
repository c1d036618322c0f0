//! Host environment checks.

use std::fs;

use crate::config::Config;

use super::types::CheckResult;

/// Check the files and directories a customization run reads on the host.
pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let resolv = &config.host_resolv_conf;
    match fs::read_to_string(resolv) {
        Ok(content) if content.lines().any(|l| l.trim_start().starts_with("nameserver")) => {
            results.push(CheckResult::pass_with(
                "host resolv.conf",
                &resolv.display().to_string(),
            ));
        }
        Ok(_) => {
            results.push(CheckResult::warn(
                "host resolv.conf",
                &format!(
                    "{} has no nameserver entries; name resolution inside the image may fail",
                    resolv.display()
                ),
            ));
        }
        Err(e) => {
            results.push(CheckResult::fail(
                "host resolv.conf",
                &format!(
                    "Cannot read {}: {} (set IMAGESAUCE_HOST_RESOLV_CONF)",
                    resolv.display(),
                    e
                ),
            ));
        }
    }

    match config.command_timeout {
        Some(timeout) => results.push(CheckResult::pass_with(
            "command timeout",
            &format!("{}s", timeout.as_secs()),
        )),
        None => results.push(CheckResult::pass_with("command timeout", "none")),
    }

    results
}
