/*
    MIT License

    Copyright (c) 2020 Philipp Schuster

    Permission is hereby granted, free of charge, to any person obtaining a copy
    of this software and associated documentation files (the "Software"), to deal
    in the Software without restriction, including without limitation the rights
    to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
    copies of the Software, and to permit persons to whom the Software is
    furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in all
    copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
    OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
    SOFTWARE.
*/

//! Forks and execs a child with three carefully prepared pipes.

use std::ffi::CString;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use errno::Errno;

use crate::error::LaunchError;
use crate::handle::ExecContext;
use crate::libc_util;
use crate::readiness::{NullRegistrar, ReadinessRegistrar};
use crate::FORK_EXEC_FAILURE;

/// Whether the child's stderr is inherited from the parent or discarded.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StderrMode {
    /// The child's stderr fd is left untouched (fd 2 inherited as-is).
    InheritToConsole,
    /// The child's stderr is redirected to `/dev/null`.
    DiscardToNull,
}

/// Bundles [`execute`]'s arguments. Supplemental convenience over the
/// four-argument call; construct one with [`LaunchOptions::new`] and
/// chain the `with_*` setters, or call [`execute`] directly if you don't
/// need a registrar.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub dir: String,
    pub stderr_mode: StderrMode,
}

impl LaunchOptions {
    /// `args[0]` must be the absolute (or relative) path to the executable;
    /// no `$PATH` search is performed, matching `execve`'s own contract.
    pub fn new<S: Into<String>>(args: Vec<S>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            dir: String::new(),
            stderr_mode: StderrMode::InheritToConsole,
        }
    }

    pub fn env<S: Into<String>>(mut self, env: Vec<S>) -> Self {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    pub fn dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn stderr_mode(mut self, mode: StderrMode) -> Self {
        self.stderr_mode = mode;
        self
    }
}

/// Creates two pipes, forks, and execs `args[0]` with `env` as the child's
/// complete environment. Uses [`NullRegistrar`]: callers without a host
/// scheduler retry `read`/`write` themselves.
///
/// See [`execute_with_registrar`] for the version that wires the resulting
/// handle up to a host readiness subsystem.
pub fn execute(
    args: &[String],
    env: &[String],
    dir: &str,
    stderr_mode: StderrMode,
) -> Result<ExecContext, LaunchError> {
    execute_with_registrar(args, env, dir, stderr_mode, Arc::new(NullRegistrar))
}

/// Same as [`execute`], but the returned handle's `read`/`write`/`close`
/// will arm and disarm readiness subscriptions through `registrar` instead
/// of requiring the caller to poll.
pub fn execute_with_registrar(
    args: &[String],
    env: &[String],
    dir: &str,
    stderr_mode: StderrMode,
    registrar: Arc<dyn ReadinessRegistrar>,
) -> Result<ExecContext, LaunchError> {
    assert!(!args.is_empty(), "args must at least contain the executable path");

    // Step 1: create the two pipes.
    let (stdin_read, stdin_write) = make_pipe()?;
    let (stdout_read, stdout_write) = make_pipe()?;

    // Step 2: O_CLOEXEC on every end (so a failure before exec can't leak
    // them), plus O_NONBLOCK on the parent-facing ends.
    if let Err(err) = prepare_fds(&stdin_read, &stdin_write, &stdout_read, &stdout_write) {
        return Err(LaunchError(Errno(err.raw_os_error().unwrap_or(libc::EINVAL))));
    }

    // Build argv/envp before forking: CString construction allocates, and
    // the child path after fork must not allocate.
    let argv_cstrings = match libc_util::to_cstrings(args) {
        Ok(v) => v,
        Err(_) => return Err(LaunchError(Errno(libc::EINVAL))),
    };
    let envp_cstrings = match libc_util::to_cstrings(env) {
        Ok(v) => v,
        Err(_) => return Err(LaunchError(Errno(libc::EINVAL))),
    };
    let argv = libc_util::build_c_argv(&argv_cstrings);
    let envp = libc_util::build_c_argv(&envp_cstrings);
    let dir_cstring = if dir.is_empty() {
        None
    } else {
        match CString::new(dir) {
            Ok(c) => Some(c),
            Err(_) => return Err(LaunchError(Errno(libc::EINVAL))),
        }
    };

    let discard_stderr = stderr_mode == StderrMode::DiscardToNull;

    // Step 3: fork.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = errno::errno();
        tracing::error!(%err, "fork failed");
        return Err(LaunchError(err));
    }

    if pid == 0 {
        // Child path. Async-signal-safe only: no allocation, no panics, no
        // non-reentrant calls past this point.
        unsafe {
            child_pre_exec(
                &stdin_read,
                &stdin_write,
                &stdout_read,
                &stdout_write,
                dir_cstring.as_deref(),
                discard_stderr,
                argv_cstrings[0].as_ptr(),
                argv.as_ptr(),
                envp.as_ptr(),
            );
        }
        unreachable!("child_pre_exec always calls _exit");
    }

    // Parent path: close both child-side ends, keep the parent-side ends.
    drop(stdin_read);
    drop(stdout_write);

    tracing::debug!(child_pid = pid, "launched child process");

    Ok(ExecContext::new(pid, stdin_write, stdout_read, registrar))
}

fn make_pipe() -> Result<(OwnedFd, OwnedFd), LaunchError> {
    let mut fds: [RawFd; 2] = [0; 2];
    let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if res < 0 {
        return Err(LaunchError(errno::errno()));
    }
    // SAFETY: pipe(2) just returned these two fresh, valid, open fds.
    unsafe { Ok((OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))) }
}

fn prepare_fds(
    stdin_read: &OwnedFd,
    stdin_write: &OwnedFd,
    stdout_read: &OwnedFd,
    stdout_write: &OwnedFd,
) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // Child-side ends get O_CLOEXEC too, so that a failure between here and
    // exec (in the parent, before fork even) cannot leak them either.
    libc_util::set_cloexec(stdin_read.as_raw_fd())?;
    libc_util::set_cloexec(stdout_write.as_raw_fd())?;

    // Parent-side ends: non-blocking (for back-pressure via EAGAIN) and
    // close-on-exec (irrelevant to the child, relevant if the parent ever
    // execs something else while holding the handle).
    libc_util::set_cloexec(stdin_write.as_raw_fd())?;
    libc_util::set_nonblocking(stdin_write.as_raw_fd())?;
    libc_util::set_cloexec(stdout_read.as_raw_fd())?;
    libc_util::set_nonblocking(stdout_read.as_raw_fd())?;

    Ok(())
}

/// Runs entirely in the child, between `fork` and `execve`. Never returns:
/// every path ends in `_exit`.
///
/// # Safety
/// Must only be called in the child immediately after `fork`, before any
/// other library call that might allocate or take a lock.
#[allow(clippy::too_many_arguments)]
unsafe fn child_pre_exec(
    stdin_read: &OwnedFd,
    stdin_write: &OwnedFd,
    stdout_read: &OwnedFd,
    stdout_write: &OwnedFd,
    dir: Option<&std::ffi::CStr>,
    discard_stderr: bool,
    program: *const libc::c_char,
    argv: *const *const libc::c_char,
    envp: *const *const libc::c_char,
) -> ! {
    use std::os::unix::io::AsRawFd;

    if let Some(dir) = dir {
        if libc::chdir(dir.as_ptr()) != 0 {
            libc::_exit(FORK_EXEC_FAILURE);
        }
    }

    if libc::dup2(stdin_read.as_raw_fd(), libc::STDIN_FILENO) < 0 {
        libc::_exit(FORK_EXEC_FAILURE);
    }
    if libc::dup2(stdout_write.as_raw_fd(), libc::STDOUT_FILENO) < 0 {
        libc::_exit(FORK_EXEC_FAILURE);
    }

    if discard_stderr {
        let devnull = libc_util::open_devnull_write();
        if devnull < 0 {
            libc::_exit(FORK_EXEC_FAILURE);
        }
        if libc::dup2(devnull, libc::STDERR_FILENO) < 0 {
            libc::_exit(FORK_EXEC_FAILURE);
        }
        libc::close(devnull);
    }

    // The dup2 targets above may equal stdin_write/stdout_read's raw fds in
    // degenerate cases; closing the originals is still correct since dup2
    // already gave us an independent copy on 0/1.
    libc::close(stdin_write.as_raw_fd());
    libc::close(stdout_read.as_raw_fd());

    libc_util::close_fds_above(libc::STDERR_FILENO + 1);

    libc::execve(program, argv, envp);

    // Only reached if execve failed.
    libc::_exit(FORK_EXEC_FAILURE);
}
