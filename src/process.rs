use std::{
    env,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result, bail};

/// Materialised command specification ready to be executed or logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command
    }

    pub fn describe(&self) -> String {
        if self.args.is_empty() {
            return self.program.display().to_string();
        }
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stderr, or a placeholder when the process printed nothing.
    pub fn error_message(&self) -> String {
        let trimmed = self.stderr.trim();
        if trimmed.is_empty() {
            match self.code {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".into(),
            }
        } else {
            trimmed.to_string()
        }
    }
}

/// Executes external programs. Every device, git and build step goes through here.
pub trait ProcessRunner {
    /// Run to completion, capturing stdout and stderr.
    ///
    /// `Err` means the process could not be started at all; a non-zero exit is
    /// reported through [`CommandOutput::success`].
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = spec
            .to_command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute {}", spec.describe()))?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Locate an external tool: explicit configuration, then `env_var`, then `PATH`.
pub fn resolve_tool(configured: Option<&Path>, env_var: &str, name: &str) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = env::var(env_var) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    match which::which(name) {
        Ok(path) => Ok(path),
        Err(err) => bail!("{name} not found on PATH ({err}); set {env_var} or configure tools.{name}"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    /// Records every command and answers from a script of canned outputs.
    ///
    /// Commands with no matching rule succeed with empty output.
    #[derive(Default)]
    pub struct FakeRunner {
        pub calls: RefCell<Vec<CommandSpec>>,
        rules: RefCell<Vec<Rule>>,
    }

    struct Rule {
        needle: String,
        responses: VecDeque<Result<CommandOutput, String>>,
        sticky: Option<Result<CommandOutput, String>>,
        effect: Option<Box<dyn Fn(&CommandSpec)>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer every command whose description contains `needle` with `output`.
        pub fn respond(&self, needle: &str, output: CommandOutput) -> &Self {
            self.rules.borrow_mut().push(Rule {
                needle: needle.into(),
                responses: VecDeque::new(),
                sticky: Some(Ok(output)),
                effect: None,
            });
            self
        }

        /// Answer the next matching command once, then fall through to later rules.
        pub fn respond_once(&self, needle: &str, output: CommandOutput) -> &Self {
            self.rules.borrow_mut().push(Rule {
                needle: needle.into(),
                responses: VecDeque::from([Ok(output)]),
                sticky: None,
                effect: None,
            });
            self
        }

        pub fn fail_to_spawn(&self, needle: &str, message: &str) -> &Self {
            self.rules.borrow_mut().push(Rule {
                needle: needle.into(),
                responses: VecDeque::new(),
                sticky: Some(Err(message.into())),
                effect: None,
            });
            self
        }

        /// Run `effect` for matching commands, e.g. to create the files a tool would write.
        pub fn on_run(&self, needle: &str, effect: impl Fn(&CommandSpec) + 'static) -> &Self {
            self.rules.borrow_mut().push(Rule {
                needle: needle.into(),
                responses: VecDeque::new(),
                sticky: None,
                effect: Some(Box::new(effect)),
            });
            self
        }

        pub fn described_calls(&self) -> Vec<String> {
            self.calls.borrow().iter().map(CommandSpec::describe).collect()
        }

        pub fn count_matching(&self, needle: &str) -> usize {
            self.described_calls()
                .iter()
                .filter(|call| call.contains(needle))
                .count()
        }
    }

    pub fn ok() -> CommandOutput {
        CommandOutput {
            success: true,
            code: Some(0),
            ..CommandOutput::default()
        }
    }

    pub fn ok_stdout(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.into(),
            ..ok()
        }
    }

    pub fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.borrow_mut().push(spec.clone());
            let described = spec.describe();
            let mut rules = self.rules.borrow_mut();
            for rule in rules.iter() {
                if described.contains(&rule.needle) {
                    if let Some(effect) = &rule.effect {
                        effect(spec);
                    }
                }
            }
            for rule in rules.iter_mut() {
                if rule.effect.is_some() || !described.contains(&rule.needle) {
                    continue;
                }
                if let Some(response) = rule.responses.pop_front() {
                    return response.map_err(|message| anyhow::anyhow!(message));
                }
                if let Some(sticky) = &rule.sticky {
                    return sticky.clone().map_err(|message| anyhow::anyhow!(message));
                }
            }
            Ok(ok())
        }
    }
}
