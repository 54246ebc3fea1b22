//! Turning an unzip request into an extraction on the remote volume.
//!
//! The request is structured data; the server builds the argv itself and
//! never runs a shell. The quoted rendering exists so the command can be
//! logged and measured against the platform's command-length limit.

use std::path::Path;

use crate::archive::Archiver;
use crate::config::ExtractBackend;
use crate::error::{Error, Result};
use crate::protocol::{CommandOutput, UnzipRequest};

/// Exit status `unzip` uses when a named entry is not in the archive.
pub const FILENAME_NOT_MATCHED: i32 = 11;

/// Program and arguments for one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnzipCommand {
    /// Program to run
    pub program: String,
    /// Arguments, unquoted
    pub args: Vec<String>,
}

impl UnzipCommand {
    /// Build `unzip -q -o|-n <archive> <entries...> -d <dest>`.
    ///
    /// `unzip` matches entry arguments as wildcard patterns, so every entry
    /// is escaped to match only itself.
    #[must_use]
    pub fn from_request(request: &UnzipRequest) -> Self {
        let mut args = Vec::with_capacity(request.entries.len() + 5);
        args.push("-q".to_string());
        args.push(if request.overwrite { "-o" } else { "-n" }.to_string());
        args.push(request.archive_path.clone());
        args.extend(request.entries.iter().map(String::as_str).map(escape_pattern));
        args.push("-d".to_string());
        args.push(request.dest_dir.clone());

        Self {
            program: "unzip".to_string(),
            args,
        }
    }

    /// Shell-quoted command line.
    #[must_use]
    pub fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Escape the characters `unzip` treats as wildcards in entry names.
#[must_use]
pub fn escape_pattern(entry: &str) -> String {
    let mut escaped = String::with_capacity(entry.len());
    for c in entry.chars() {
        if matches!(c, '[' | ']' | '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Quote one argument for a POSIX shell.
#[must_use]
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,+@%".contains(&b));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Run an unzip request with the configured backend.
///
/// Requests whose rendered command exceeds `max_command_bytes` are refused
/// without running anything, the same way the kernel would refuse them.
///
/// # Errors
///
/// Returns an error only when the backend could not be started; failed
/// extractions are reported in the returned [`CommandOutput`].
pub async fn extract(
    backend: ExtractBackend,
    request: &UnzipRequest,
    max_command_bytes: usize,
) -> Result<CommandOutput> {
    let command = UnzipCommand::from_request(request);
    let rendered = command.render();

    if rendered.len() > max_command_bytes {
        tracing::debug!(
            bytes = rendered.len(),
            limit = max_command_bytes,
            entries = request.entries.len(),
            "Refusing oversized extraction command"
        );
        return Ok(CommandOutput::failed(
            None,
            format!(
                "argument list too long ({} bytes, limit {max_command_bytes})",
                rendered.len()
            ),
        ));
    }

    tracing::debug!(command = %rendered, "Extracting");

    match backend {
        ExtractBackend::Unzip => run_command(&command.program, &command.args).await,
        ExtractBackend::Builtin => Ok(extract_builtin(request).await),
    }
}

/// Run a program without a shell and capture its output.
///
/// # Errors
///
/// Returns an I/O error if the program cannot be spawned.
pub async fn run_command(program: &str, args: &[String]) -> Result<CommandOutput> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to run {program}: {e}"),
            ))
        })?;

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

async fn extract_builtin(request: &UnzipRequest) -> CommandOutput {
    let result = Archiver::extract(
        Path::new(&request.archive_path),
        Path::new(&request.dest_dir),
        Some(request.entries.clone()),
        request.overwrite,
    )
    .await;

    match result {
        Ok(extracted) => CommandOutput {
            success: true,
            exit_code: Some(0),
            stdout: format!("extracted {} entries", extracted.len()),
            stderr: String::new(),
        },
        Err(Error::Extraction { entry, reason }) => {
            CommandOutput::failed(Some(FILENAME_NOT_MATCHED), format!("{reason}: {entry}"))
        }
        Err(e) => CommandOutput::failed(Some(1), e.to_string()),
    }
}
