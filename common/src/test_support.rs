//! Test doubles for [`CommandExecutor`].
//!
//! Enabled by the `test-support` feature so that dependent crates can run
//! their pipelines against canned tool output.

use crate::exec::{CommandExecutor, ToolCommand};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};

/// Creates an `ExitStatus` from an exit code.
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

/// Creates a successful `Output` with empty stdout and stderr.
#[must_use]
pub fn success_output() -> Output {
    stdout_output(Vec::new())
}

/// Creates a successful `Output` carrying `stdout`.
#[must_use]
pub fn stdout_output(stdout: impl Into<Vec<u8>>) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.into(),
        stderr: Vec::new(),
    }
}

/// Creates a failed `Output` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// An expected command invocation and its canned result.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The program to expect (e.g. `"openssl"`).
    pub program: &'static str,
    /// The exact arguments to expect.
    pub args: Vec<String>,
    /// The result returned when the call is made.
    pub result: io::Result<Output>,
}

impl ExpectedCall {
    /// Expects `program` with `args`, answering with `result`.
    #[must_use]
    pub fn new<I, S>(program: &'static str, args: I, result: io::Result<Output>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            result,
        }
    }
}

/// A strict, ordered stub.
///
/// Each invocation must match the next [`ExpectedCall`] exactly.
#[derive(Debug)]
pub struct StubExecutor {
    expected: RefCell<VecDeque<ExpectedCall>>,
    seen: RefCell<Vec<ToolCommand>>,
}

impl StubExecutor {
    /// Creates a stub expecting `expected` in order.
    #[must_use]
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
            seen: RefCell::new(Vec::new()),
        }
    }

    /// Returns every command received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ToolCommand> {
        self.seen.borrow().clone()
    }

    /// Asserts that all expected invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if expected calls remain.
    pub fn assert_finished(&self) {
        let remaining = self.expected.borrow();
        assert!(
            remaining.is_empty(),
            "expected further command invocations: {remaining:?}"
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, command: &ToolCommand) -> io::Result<Output> {
        self.seen.borrow_mut().push(command.clone());
        let call = self
            .expected
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected command invocation: {command}"));

        assert_eq!(call.program, command.program(), "program mismatch");
        assert_eq!(call.args.as_slice(), command.arguments(), "argument mismatch");

        call.result
    }
}

type Handler = Box<dyn Fn(&ToolCommand) -> io::Result<Output>>;

/// A permissive executor answering through a closure and recording calls.
///
/// Useful when a pass issues many invocations whose answers depend on their
/// arguments, such as one ELF probe per staged file.
pub struct ScriptedExecutor {
    handler: Handler,
    seen: RefCell<Vec<ToolCommand>>,
}

impl ScriptedExecutor {
    /// Creates an executor that answers each call with `handler`.
    pub fn new(handler: impl Fn(&ToolCommand) -> io::Result<Output> + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            seen: RefCell::new(Vec::new()),
        }
    }

    /// Creates an executor that succeeds with empty output for every call.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(success_output()))
    }

    /// Returns every command received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ToolCommand> {
        self.seen.borrow().clone()
    }

    /// Returns the received commands rendered as `program arg…` lines.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.seen.borrow().iter().map(ToString::to_string).collect()
    }
}

impl std::fmt::Debug for ScriptedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedExecutor")
            .field("seen", &self.seen)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn run(&self, command: &ToolCommand) -> io::Result<Output> {
        self.seen.borrow_mut().push(command.clone());
        (self.handler)(command)
    }
}
