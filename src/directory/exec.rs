//! Opt-in EXEC runner.
//!
//! Executing file contents on the Directory host is disabled unless the
//! binary was started with `--enable-exec`. Even then the runner is
//! restricted: the content must be a single command line free of shell
//! metacharacters, and it is spawned directly (first token as the program,
//! the rest as arguments) with no shell in between.

use crate::protocol::status::StoreError;

const FORBIDDEN: &[char] = &[
    '|', '&', ';', '<', '>', '(', ')', '$', '`', '\\', '"', '\'', '*', '?', '[', ']', '#', '~',
    '{', '}',
];

/// Validates the file content and splits it into an argv vector.
pub fn parse_command(content: &str) -> Result<Vec<String>, StoreError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(StoreError::BadRequest(
            "File is empty; nothing to execute".to_string(),
        ));
    }
    if trimmed.lines().count() > 1 {
        return Err(StoreError::BadRequest(
            "Multi-line scripts are not allowed".to_string(),
        ));
    }
    if trimmed.chars().any(|c| FORBIDDEN.contains(&c)) {
        return Err(StoreError::BadRequest(
            "Shell metacharacters are not allowed".to_string(),
        ));
    }
    Ok(trimmed.split_whitespace().map(String::from).collect())
}

/// Runs the validated command and returns combined stdout + stderr.
pub async fn run(content: &str) -> Result<Vec<u8>, StoreError> {
    let argv = parse_command(content)?;
    tracing::info!("EXEC running: {:?}", argv);
    let output = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .await
        .map_err(|e| StoreError::Internal(format!("Failed to execute command: {e}")))?;

    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    Ok(combined)
}
