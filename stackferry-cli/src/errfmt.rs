//! Trimming of noisy CLI output that Pulumi invocations attach to errors.

/// Remove the `code:`/`stdout:`/`stderr:` dumps Pulumi appends to failed
/// invocations, keeping only the leading message.
pub fn format_cli_error(err: &anyhow::Error) -> String {
    let message = format!("{err:#}");
    let message = message.trim_end_matches('\n');
    for marker in ["\ncode: ", "\nstdout: ", "\nstderr: "] {
        if let Some(index) = message.find(marker) {
            return message[..index].to_string();
        }
    }
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_plain_errors_pass_through() {
        let err = anyhow!("stack is required");
        assert_eq!(format_cli_error(&err), "stack is required");
    }

    #[test]
    fn test_strips_trailing_newlines() {
        let err = anyhow!("boom\n\n");
        assert_eq!(format_cli_error(&err), "boom");
    }

    #[test]
    fn test_strips_code_section() {
        let err = anyhow!("update failed\ncode: 255\nstdout: ...\nstderr: ...");
        assert_eq!(format_cli_error(&err), "update failed");
    }

    #[test]
    fn test_strips_stderr_section_alone() {
        let err = anyhow!("pulumi preview failed\nstderr: error: no stack selected");
        assert_eq!(format_cli_error(&err), "pulumi preview failed");
    }
}
