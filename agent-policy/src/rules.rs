//! Call and import classification tables used by the security gate.

use std::collections::BTreeSet;

/// Callees that spawn processes or run shell commands.
pub const PROCESS_CALLS: &[&str] = &[
    "os.system",
    "os.popen",
    "subprocess.Popen",
    "subprocess.run",
    "subprocess.call",
    "subprocess.check_output",
];

/// Callees that evaluate or import code dynamically.
pub const DYNAMIC_CODE_CALLS: &[&str] = &["eval", "exec", "__import__"];

/// Callees that delete files or directory trees.
pub const DESTRUCTIVE_CALLS: &[&str] = &["shutil.rmtree", "os.remove", "os.unlink", "os.rmdir"];

/// Callee prefixes of HTTP clients and raw sockets.
pub const NETWORK_PREFIXES: &[&str] = &[
    "requests.get",
    "requests.post",
    "requests.put",
    "requests.delete",
    "socket.socket",
    "http.client",
    "urllib.request",
    "urllib3.PoolManager",
];

/// Modules whose import is reported as an advisory.
pub const SYSTEM_MODULES: &[&str] = &["os", "subprocess", "shutil"];

/// Command fragments that make a process call unsafe on their own, covering
/// POSIX and Windows conventions.
pub const BLACKLISTED_COMMANDS: &[&str] = &[
    "rm", "rm -rf", "reboot", "shutdown", "mount", "umount", "service", "route", "sysctl",
    "systemctl", "useradd", "userdel", "usermod", "groupadd", "groupdel", "groupmod", "passwd",
    "killall", "pkill", "lvremove", "pvremove", "vgremove", "del", "erase", "format", "rmdir",
    "rd", "sc", "net user", "reg add", "reg delete", "reg import",
];

/// `open` mode characters that indicate a write.
pub const WRITE_MODE_FLAGS: &[char] = &['w', 'a', 'x'];

/// Classification of a resolved callee name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    /// Process spawning or shell execution.
    Process,
    /// Dynamic code evaluation or import.
    DynamicCode,
    /// Destructive file operation.
    Destructive,
    /// Network access.
    Network,
    /// Built-in `open`.
    FileOpen,
}

/// Tables consulted while walking call expressions.
#[derive(Debug, Clone)]
pub struct RuleSet {
    process_calls: BTreeSet<String>,
    dynamic_calls: BTreeSet<String>,
    destructive_calls: BTreeSet<String>,
    network_prefixes: Vec<String>,
    system_modules: BTreeSet<String>,
    blacklisted_commands: Vec<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        fn owned<'a>(items: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
            items.iter().map(|item| (*item).to_owned())
        }

        Self {
            process_calls: owned(PROCESS_CALLS).collect(),
            dynamic_calls: owned(DYNAMIC_CODE_CALLS).collect(),
            destructive_calls: owned(DESTRUCTIVE_CALLS).collect(),
            network_prefixes: owned(NETWORK_PREFIXES).collect(),
            system_modules: owned(SYSTEM_MODULES).collect(),
            blacklisted_commands: owned(BLACKLISTED_COMMANDS).collect(),
        }
    }
}

impl RuleSet {
    /// Adds a command fragment to the blacklist; blank fragments are ignored.
    #[must_use]
    pub fn with_blacklisted_command(mut self, command: impl Into<String>) -> Self {
        let command = command.into().trim().to_lowercase();
        if !command.is_empty() && !self.blacklisted_commands.contains(&command) {
            self.blacklisted_commands.push(command);
        }
        self
    }

    /// Adds a module to the advisory import list.
    #[must_use]
    pub fn with_system_module(mut self, module: impl Into<String>) -> Self {
        let module = module.into();
        if !module.trim().is_empty() {
            self.system_modules.insert(module);
        }
        self
    }

    /// Classifies a dotted callee name.
    #[must_use]
    pub fn classify(&self, callee: &str) -> Option<CallClass> {
        if self.process_calls.contains(callee) {
            Some(CallClass::Process)
        } else if self.dynamic_calls.contains(callee) {
            Some(CallClass::DynamicCode)
        } else if self.destructive_calls.contains(callee) {
            Some(CallClass::Destructive)
        } else if self
            .network_prefixes
            .iter()
            .any(|prefix| callee.starts_with(prefix.as_str()))
        {
            Some(CallClass::Network)
        } else if callee == "open" {
            Some(CallClass::FileOpen)
        } else {
            None
        }
    }

    /// Returns the first blacklisted fragment contained in `command`,
    /// compared case-insensitively.
    #[must_use]
    pub fn blacklisted_fragment(&self, command: &str) -> Option<&str> {
        let folded = command.to_lowercase();
        self.blacklisted_commands
            .iter()
            .find(|fragment| folded.contains(fragment.as_str()))
            .map(String::as_str)
    }

    /// Whether importing `module` deserves an advisory; submodules count.
    #[must_use]
    pub fn is_system_module(&self, module: &str) -> bool {
        let top_level = module.split('.').next().unwrap_or_default();
        self.system_modules.contains(top_level)
    }
}

/// Whether an `open` mode string requests write, append, or exclusive create.
#[must_use]
pub fn is_write_mode(mode: &str) -> bool {
    mode.chars().any(|c| WRITE_MODE_FLAGS.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_callees() {
        let rules = RuleSet::default();
        assert_eq!(rules.classify("os.system"), Some(CallClass::Process));
        assert_eq!(rules.classify("eval"), Some(CallClass::DynamicCode));
        assert_eq!(rules.classify("shutil.rmtree"), Some(CallClass::Destructive));
        assert_eq!(
            rules.classify("http.client.HTTPSConnection"),
            Some(CallClass::Network)
        );
        assert_eq!(rules.classify("open"), Some(CallClass::FileOpen));
        assert_eq!(rules.classify("math.sqrt"), None);
    }

    #[test]
    fn blacklist_matches_case_insensitively() {
        let rules = RuleSet::default();
        assert_eq!(rules.blacklisted_fragment("SHUTDOWN -h now"), Some("shutdown"));
        assert_eq!(rules.blacklisted_fragment("echo hi"), None);

        let rules = rules.with_blacklisted_command("Curl");
        assert_eq!(rules.blacklisted_fragment("curl evil.sh"), Some("curl"));
    }

    #[test]
    fn system_modules_include_submodules() {
        let rules = RuleSet::default();
        assert!(rules.is_system_module("os.path"));
        assert!(rules.is_system_module("subprocess"));
        assert!(!rules.is_system_module("osmosis"));
    }

    #[test]
    fn write_modes() {
        assert!(is_write_mode("wb"));
        assert!(is_write_mode("a+"));
        assert!(!is_write_mode("r"));
    }
}
