//! Compile invocation and error-line parsing for the build/repair loop.

use async_trait::async_trait;
use codemend_common::{BuildError, BuildErrorKind, BuildResult, CoreError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Raw outcome of one compiler run
#[derive(Debug, Clone)]
pub struct CompilerOutput {
    pub success: bool,
    pub raw_log: String,
    pub duration_ms: u64,
}

/// External compiler contract; success iff exit code 0
#[async_trait]
pub trait CompilerDriver: Send + Sync {
    async fn compile(&self, workdir: &Path) -> Result<CompilerOutput>;
}

/// Drives the configured build command (`mvn -B test-compile` by default)
/// inside the working copy.
pub struct CommandCompiler {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandCompiler {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl CompilerDriver for CommandCompiler {
    async fn compile(&self, workdir: &Path) -> Result<CompilerOutput> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| CoreError::Config("empty build command".into()))?;
        info!(command = %self.command.join(" "), workdir = %workdir.display(), "compiling");

        let started = Instant::now();
        let child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CoreError::WorkingCopy(format!("spawn {program}: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CoreError::Timeout(self.timeout))?
            .map_err(|e| CoreError::WorkingCopy(format!("wait {program}: {e}")))?;

        let mut raw_log = String::from_utf8_lossy(&output.stdout).into_owned();
        raw_log.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CompilerOutput {
            success: output.status.success(),
            raw_log,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

// e.g. `[ERROR] /work/src/main/java/com/acme/A.java:[15,8] cannot find symbol`
static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[ERROR\]\s+(?P<file>[^\s\[\]]+\.java):\[(?P<line>\d+),(?P<col>\d+)\]\s*(?P<message>.+)")
        .expect("error-line grammar")
});

pub fn parse_build_errors(raw_log: &str) -> Vec<BuildError> {
    raw_log
        .lines()
        .filter_map(|line| ERROR_LINE.captures(line))
        .map(|captures| {
            let message = captures["message"].trim().to_string();
            BuildError {
                file: captures["file"].to_string(),
                line: captures["line"].parse().unwrap_or(0),
                column: captures["col"].parse().unwrap_or(0),
                kind: categorize(&message),
                message,
            }
        })
        .collect()
}

/// Substring-pattern categorization; anything unrecognized stays Unknown with
/// the message retained as-is.
fn categorize(message: &str) -> BuildErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("cannot find symbol") || lower.contains("cannot resolve symbol") {
        BuildErrorKind::SymbolNotFound
    } else if lower.contains("incompatible types") || lower.contains("cannot be converted") {
        BuildErrorKind::TypeMismatch
    } else if lower.contains("package") && lower.contains("does not exist") {
        BuildErrorKind::MissingPackage
    } else if lower.contains("expected")
        || lower.contains("illegal start")
        || lower.contains("reached end of file")
    {
        BuildErrorKind::SyntaxError
    } else if lower.contains("missing return") {
        BuildErrorKind::MissingReturn
    } else if lower.contains("private access") || lower.contains("is not public") {
        BuildErrorKind::AccessViolation
    } else {
        BuildErrorKind::Unknown
    }
}

pub fn to_build_result(output: CompilerOutput) -> BuildResult {
    let errors = if output.success {
        vec![]
    } else {
        let errors = parse_build_errors(&output.raw_log);
        if errors.is_empty() {
            warn!("build failed but no error lines matched the grammar");
        }
        errors
    };
    BuildResult {
        success: output.success,
        duration_ms: output.duration_ms,
        raw_log: output.raw_log,
        errors,
    }
}

/// Sorted signature set; two identical sets across consecutive attempts mean
/// the repair loop is not making progress.
pub fn error_signatures(result: &BuildResult) -> Vec<String> {
    let mut signatures: Vec<String> = result.errors.iter().map(BuildError::signature).collect();
    signatures.sort();
    signatures.dedup();
    signatures
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAVEN_LOG: &str = r#"
[INFO] Compiling 14 source files
[ERROR] /work/src/main/java/com/acme/PaymentService.java:[15,8] cannot find symbol
[ERROR] /work/src/main/java/com/acme/PaymentService.java:[22,13] incompatible types: String cannot be converted to long
[ERROR] /work/src/main/java/com/acme/Billing.java:[3,1] package com.acme.missing does not exist
[ERROR] COMPILATION ERROR
[INFO] BUILD FAILURE
"#;

    #[test]
    fn parses_error_lines_with_positions() {
        let errors = parse_build_errors(MAVEN_LOG);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].file, "/work/src/main/java/com/acme/PaymentService.java");
        assert_eq!(errors[0].line, 15);
        assert_eq!(errors[0].column, 8);
        assert_eq!(errors[0].kind, BuildErrorKind::SymbolNotFound);
        assert_eq!(errors[1].kind, BuildErrorKind::TypeMismatch);
        assert_eq!(errors[2].kind, BuildErrorKind::MissingPackage);
    }

    #[test]
    fn non_matching_error_lines_are_skipped() {
        let errors = parse_build_errors("[ERROR] COMPILATION ERROR\n[ERROR] see above");
        assert!(errors.is_empty());
    }

    #[test]
    fn unknown_kind_retains_message() {
        let errors =
            parse_build_errors("[ERROR] /a/B.java:[1,1] something entirely novel happened");
        assert_eq!(errors[0].kind, BuildErrorKind::Unknown);
        assert_eq!(errors[0].message, "something entirely novel happened");
    }

    #[test]
    fn successful_output_has_no_errors() {
        let result = to_build_result(CompilerOutput {
            success: true,
            raw_log: MAVEN_LOG.to_string(),
            duration_ms: 10,
        });
        assert!(result.success);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn signatures_are_sorted_and_stable() {
        let result = to_build_result(CompilerOutput {
            success: false,
            raw_log: MAVEN_LOG.to_string(),
            duration_ms: 10,
        });
        let a = error_signatures(&result);
        let b = error_signatures(&result);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }
}
