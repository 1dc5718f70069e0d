use regex::Regex;
use std::sync::LazyLock;

pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Outcome of one command. `exit_code` is the container process's code, or
/// the `-1` sentinel for framework-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub type OutputCallback = Box<dyn FnMut(&str) + Send>;

/// Per-run options. Supplying either callback selects the streaming
/// execution path.
#[derive(Default)]
pub struct RunOptions {
    pub timeout_ms: Option<u64>,
    pub background: bool,
    pub on_stdout: Option<OutputCallback>,
    pub on_stderr: Option<OutputCallback>,
}

impl RunOptions {
    pub fn streaming(&self) -> bool {
        self.on_stdout.is_some() || self.on_stderr.is_some()
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }
}

// The blacklist is intentionally narrow: the container boundary is the
// security domain, and ordinary shell metacharacters are legitimate agent
// workload. Only host-destructive classics are refused. The root-wipe
// patterns anchor on a bare `/` so `rm -rf /tmp/scratch` stays legal.
static DANGEROUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"rm\s+-rf\s+/(\s|$|;|&|\|)").expect("pattern must compile"),
            "rm -rf /",
        ),
        (
            Regex::new(r"rm\s+-rf\s+/\*").expect("pattern must compile"),
            "rm -rf /*",
        ),
        (
            Regex::new(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").expect("pattern must compile"),
            "fork bomb",
        ),
        (
            Regex::new(r"dd\s+if=/dev/zero").expect("pattern must compile"),
            "dd if=/dev/zero",
        ),
    ]
});

/// Reject commands matching the dangerous-pattern blacklist. Returns the
/// human-readable name of the matched pattern.
pub fn validate_command(command: &str) -> Result<(), &'static str> {
    for (pattern, name) in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(command) {
            return Err(name);
        }
    }
    Ok(())
}

/// First 40 characters of a command, for error messages and logs.
pub fn snippet(command: &str) -> String {
    if command.chars().count() <= 40 {
        command.to_string()
    } else {
        let cut: String = command.chars().take(40).collect();
        format!("{cut}…")
    }
}
