//! Executable naming per operating system family.

/// Base name of the CLI under test.
pub const CLI_NAME: &str = "docker";

/// Base name of the legacy ("classic") CLI variant.
pub const CLASSIC_CLI_NAME: &str = "docker-classic";

pub fn is_windows() -> bool {
    cfg!(windows)
}

/// `base` with the platform executable suffix (`.exe` on Windows).
pub fn executable_name(base: &str) -> String {
    let suffix = std::env::consts::EXE_SUFFIX;
    if suffix.is_empty() || base.ends_with(suffix) {
        base.to_string()
    } else {
        format!("{base}{suffix}")
    }
}

/// Host utility that lists running processes.
pub fn list_processes_program() -> &'static str {
    if is_windows() { "tasklist" } else { "ps" }
}
