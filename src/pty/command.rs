//! What runs on the slave side of the pty

use std::ffi::CString;

use nix::unistd::{geteuid, User};

use crate::error::Result;

/// Fallback when neither $SHELL nor the account database name a shell
const FALLBACK_SHELL: &str = "/bin/sh";

/// The program executed in the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildCommand {
    /// An explicit command line, looked up through $PATH
    Argv(Vec<String>),
    /// The user's shell, started interactively
    Shell(String),
}

impl ChildCommand {
    /// Pick the explicit command if there is one, otherwise the shell
    pub fn resolve(argv: &[String], shell: Option<&str>) -> Self {
        if argv.is_empty() {
            let shell = shell.map(String::from).unwrap_or_else(default_shell);
            Self::Shell(shell)
        } else {
            Self::Argv(argv.to_vec())
        }
    }

    /// The explicit command line, if one was given
    pub fn command_line(&self) -> Option<&[String]> {
        match self {
            Self::Argv(argv) => Some(argv),
            Self::Shell(_) => None,
        }
    }

    /// Program name as shown in diagnostics
    pub fn program(&self) -> &str {
        match self {
            Self::Argv(argv) => &argv[0],
            Self::Shell(shell) => shell,
        }
    }

    /// Whether exec should search $PATH
    pub fn searches_path(&self) -> bool {
        matches!(self, Self::Argv(_))
    }

    /// The full argument vector handed to exec
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Argv(argv) => argv.clone(),
            Self::Shell(shell) => vec![shell.clone(), "-i".to_string()],
        }
    }

    /// Convert to the C strings exec needs
    ///
    /// Done before fork so the child never allocates or fails on a NUL byte.
    pub fn to_exec_args(&self) -> Result<(CString, Vec<CString>)> {
        let program = CString::new(self.program())?;
        let argv = self
            .argv()
            .into_iter()
            .map(CString::new)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((program, argv))
    }
}

/// The user's shell: $SHELL, then the account database, then /bin/sh
pub fn default_shell() -> String {
    if let Some(shell) = std::env::var_os("SHELL").filter(|s| !s.is_empty()) {
        return shell.to_string_lossy().into_owned();
    }
    match User::from_uid(geteuid()) {
        Ok(Some(user)) if !user.shell.as_os_str().is_empty() => {
            user.shell.to_string_lossy().into_owned()
        },
        _ => FALLBACK_SHELL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_explicit_command() {
        let argv = vec!["echo".to_string(), "hello".to_string()];
        let cmd = ChildCommand::resolve(&argv, Some("/bin/zsh"));
        assert_eq!(cmd, ChildCommand::Argv(argv.clone()));
        assert_eq!(cmd.program(), "echo");
        assert_eq!(cmd.command_line(), Some(argv.as_slice()));
        assert!(cmd.searches_path());
    }

    #[test]
    fn test_resolve_shell_override() {
        let cmd = ChildCommand::resolve(&[], Some("/bin/zsh"));
        assert_eq!(cmd, ChildCommand::Shell("/bin/zsh".to_string()));
        assert_eq!(cmd.argv(), vec!["/bin/zsh", "-i"]);
        assert!(cmd.command_line().is_none());
        assert!(!cmd.searches_path());
    }

    #[test]
    fn test_default_shell_not_empty() {
        assert!(!default_shell().is_empty());
    }

    #[test]
    fn test_exec_args_reject_nul() {
        let cmd = ChildCommand::Argv(vec!["ec\0ho".to_string()]);
        assert!(cmd.to_exec_args().is_err());

        let cmd = ChildCommand::Argv(vec!["printf".to_string(), "%s".to_string()]);
        let (program, argv) = cmd.to_exec_args().unwrap();
        assert_eq!(program.as_bytes(), b"printf");
        assert_eq!(argv.len(), 2);
    }
}
