use std::convert::Infallible;
use std::ffi::{self, CString};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::{IntoRawFd, RawFd};

use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};

use crate::builtin::{self, Status};
use crate::parser::{Command, Pipeline};
use crate::session::{Session, SYSNAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Runs one parsed pipeline to completion (or launches it detached).
///
/// Dispatch order: the empty no-op line, the in-process privileged names
/// (`cd`, `exit`), the builtin table for single-stage lines, and finally a
/// spawned process pipeline. Errors never escape past here; they are
/// reported per stage and the caller goes back to the prompt.
pub fn execute(session: &mut Session, pipeline: &Pipeline) -> Flow {
    let first = match pipeline.commands.first() {
        Some(cmd) => cmd,
        None => return Flow::Continue,
    };
    if first.name.is_empty() {
        return Flow::Continue;
    }

    builtin::log_history(session, pipeline);

    match first.name.as_str() {
        "exit" => return Flow::Exit,
        "cd" => {
            change_directory(first);
            return Flow::Continue;
        }
        _ => {}
    }

    // builtins never join multi-stage pipelines
    if pipeline.commands.len() == 1 {
        match builtin::dispatch(session, first) {
            Status::Success | Status::Failure => return Flow::Continue,
            Status::NotHandled => {}
        }
    }

    if let Err(err) = run_pipeline(pipeline) {
        let _ = writeln!(io::stderr(), "-{}: {}: {}", SYSNAME, first.name, err.desc());
    }
    Flow::Continue
}

fn change_directory(cmd: &Command) {
    let target = match cmd.args.first() {
        Some(target) => target,
        None => return,
    };
    if let Err(err) = unistd::chdir(target.as_str()) {
        let _ = writeln!(io::stderr(), "-{}: cd: {}", SYSNAME, err.desc());
    }
}

/// Materializes the chain as OS processes: N-1 pipes, one fork per stage,
/// stdio rewired in each child, then execvp. The parent drops every pipe end
/// it holds before waiting so no reader hangs on a write end nobody owns.
fn run_pipeline(pipeline: &Pipeline) -> nix::Result<()> {
    let stages = &pipeline.commands;

    // pipes[i] connects stage i's stdout to stage i+1's stdin
    let mut pipes: Vec<(RawFd, RawFd)> = Vec::with_capacity(stages.len().saturating_sub(1));
    for _ in 1..stages.len() {
        let (read_end, write_end) = unistd::pipe()?;
        pipes.push((read_end.into_raw_fd(), write_end.into_raw_fd()));
    }

    let mut children: Vec<Pid> = Vec::with_capacity(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Parent { child }) => children.push(child),
            Ok(ForkResult::Child) => {
                if i > 0 {
                    let _ = unistd::dup2(pipes[i - 1].0, libc::STDIN_FILENO);
                }
                if i + 1 < stages.len() {
                    let _ = unistd::dup2(pipes[i].1, libc::STDOUT_FILENO);
                }
                for &(read_end, write_end) in &pipes {
                    let _ = unistd::close(read_end);
                    let _ = unistd::close(write_end);
                }
                exec_stage(stage);
            }
            // a stage that fails to fork must not abort its siblings
            Err(err) => {
                let _ = writeln!(io::stderr(), "-{}: {}: {}", SYSNAME, stage.name, err.desc());
            }
        }
    }

    for &(read_end, write_end) in &pipes {
        let _ = unistd::close(read_end);
        let _ = unistd::close(write_end);
    }

    if !pipeline.is_background() {
        for pid in children {
            let _ = waitpid(pid, None);
        }
    }
    Ok(())
}

/// Child-side tail of a spawned stage. Never returns to the interpreter
/// loop: either the process image is replaced or the child reports and
/// exits.
fn exec_stage(stage: &Command) -> ! {
    let code = match stage_image(stage) {
        Err(ExecError::NotFound) => {
            let _ = writeln!(io::stderr(), "-{}: {}: command not found", SYSNAME, stage.name);
            127
        }
        Err(err) => {
            let _ = writeln!(io::stderr(), "-{}: {}: {}", SYSNAME, stage.name, err);
            126
        }
        Ok(never) => match never {},
    };
    unsafe { libc::_exit(code) }
}

/// Applies the stage's file redirections over whatever stdio the pipeline
/// already installed (an explicit redirect wins over a pipe endpoint), then
/// replaces the process image. PATH resolution is execvp's.
fn stage_image(stage: &Command) -> Result<Infallible, ExecError> {
    if let Some(path) = &stage.redirect_in {
        let file = File::open(path)?;
        dup_onto(file.into_raw_fd(), libc::STDIN_FILENO)?;
    }
    if let Some(path) = &stage.redirect_out {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        dup_onto(file.into_raw_fd(), libc::STDOUT_FILENO)?;
    }
    if let Some(path) = &stage.redirect_append {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        dup_onto(file.into_raw_fd(), libc::STDOUT_FILENO)?;
    }

    let name = CString::new(stage.name.as_str())?;
    let mut argv: Vec<CString> = Vec::with_capacity(stage.args.len() + 1);
    argv.push(name.clone());
    for arg in &stage.args {
        argv.push(CString::new(arg.as_str())?);
    }
    match unistd::execvp(&name, &argv) {
        Err(Errno::ENOENT) => Err(ExecError::NotFound),
        Err(err) => Err(ExecError::Sys(err)),
        Ok(never) => match never {},
    }
}

fn dup_onto(fd: RawFd, target: RawFd) -> nix::Result<()> {
    unistd::dup2(fd, target)?;
    unistd::close(fd)
}

#[derive(Debug)]
enum ExecError {
    NotFound,
    Sys(Errno),
    Io(io::Error),
    Nul(ffi::NulError),
}

impl From<io::Error> for ExecError {
    fn from(err: io::Error) -> ExecError {
        ExecError::Io(err)
    }
}

impl From<Errno> for ExecError {
    fn from(err: Errno) -> ExecError {
        ExecError::Sys(err)
    }
}

impl From<ffi::NulError> for ExecError {
    fn from(err: ffi::NulError) -> ExecError {
        ExecError::Nul(err)
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::NotFound => write!(f, "command not found"),
            ExecError::Sys(err) => write!(f, "{}", err.desc()),
            ExecError::Io(err) => write!(f, "{}", err),
            ExecError::Nul(err) => write!(f, "{}", err),
        }
    }
}
