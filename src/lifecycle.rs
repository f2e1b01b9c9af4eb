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

//! Non-blocking `waitpid`, signal delivery, and liveness checks. Layered on
//! top of [`crate::io`] because `wait`/`kill` observe state that closing
//! the pipes helped bring about (an EOF on stdout is usually the first
//! sign a child is about to be reapable).

use std::time::{Duration, Instant};

use crate::error::WaitError;
use crate::handle::{ExecContext, ExitStatus};

/// Non-blocking reap attempt. If the child already terminated and was
/// previously reaped, returns the memoized status instead of touching the
/// kernel again — repeated calls after the first successful reap always
/// return the identical tuple.
///
/// If the child is still running, returns [`WaitError::NotExited`]. It is
/// the caller's responsibility to poll this, typically after observing
/// both pipes closed or a timeout elapsing.
pub fn wait(handle: &ExecContext) -> Result<ExitStatus, WaitError> {
    if let Some(status) = handle.cached_exit_status() {
        return Ok(status);
    }

    // cached_exit_status() above already returned for any handle that was
    // previously reaped, so pid must still be set here.
    let pid = handle.pid().expect("pid is None only once exit_status is cached");

    let mut wstatus: libc::c_int = 0;
    let res = unsafe { libc::waitpid(pid, &mut wstatus, libc::WNOHANG) };

    if res == 0 {
        return Err(WaitError::NotExited);
    }
    if res < 0 {
        let err = errno::errno();
        tracing::error!(pid, %err, "waitpid failed");
        return Err(WaitError::Os(err));
    }

    let status = classify(wstatus);
    handle.record_exit(status);
    tracing::debug!(child_pid = pid, ?status, "reaped child process");
    Ok(status)
}

/// Polls [`wait`] in bounded steps until the child exits or `timeout`
/// elapses. Supplemental convenience for callers with no host scheduler to
/// wake them on readiness; does not change `wait`'s own non-blocking
/// contract.
pub fn wait_timeout(handle: &ExecContext, timeout: Duration) -> Result<ExitStatus, WaitError> {
    let deadline = Instant::now() + timeout;
    loop {
        match wait(handle) {
            Ok(status) => return Ok(status),
            Err(WaitError::NotExited) => {
                if Instant::now() >= deadline {
                    return Err(WaitError::NotExited);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return Err(err),
        }
    }
}

fn classify(wstatus: libc::c_int) -> ExitStatus {
    if libc::WIFEXITED(wstatus) {
        ExitStatus::Exited(libc::WEXITSTATUS(wstatus))
    } else if libc::WIFSIGNALED(wstatus) {
        ExitStatus::Signaled(libc::WTERMSIG(wstatus))
    } else {
        ExitStatus::Stopped
    }
}

/// Sends `SIGTERM`. A no-op if the child has already been reaped.
pub fn terminate(handle: &ExecContext) {
    send_signal(handle, libc::SIGTERM);
}

/// Sends `SIGKILL`. A no-op if the child has already been reaped.
pub fn kill(handle: &ExecContext) {
    send_signal(handle, libc::SIGKILL);
}

fn send_signal(handle: &ExecContext, signal: libc::c_int) {
    if let Some(pid) = handle.pid() {
        unsafe {
            libc::kill(pid, signal);
        }
    }
}

/// `true` if the child is memoized as reaped, or `kill(pid, 0)` succeeds.
/// Note a reaped-but-not-yet-`wait`ed child may briefly report `true`
/// until [`wait`] is called and actually performs the reap.
pub fn alive(handle: &ExecContext) -> bool {
    match handle.pid() {
        None => true,
        Some(pid) => unsafe { libc::kill(pid, 0) == 0 },
    }
}

/// The child's pid, or `0` once reaped.
pub fn os_pid(handle: &ExecContext) -> libc::pid_t {
    handle.pid().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{execute, StderrMode};

    #[test]
    fn wait_memoizes_the_exit_tuple() {
        let handle = execute(&["/bin/true".into()], &[], "", StderrMode::DiscardToNull).unwrap();
        let first = wait_timeout(&handle, Duration::from_secs(2)).unwrap();
        let second = wait(&handle).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, ExitStatus::Exited(0));
    }

    #[test]
    fn os_pid_is_zero_after_reap() {
        let handle = execute(&["/bin/true".into()], &[], "", StderrMode::DiscardToNull).unwrap();
        wait_timeout(&handle, Duration::from_secs(2)).unwrap();
        assert_eq!(os_pid(&handle), 0);
    }

    #[test]
    fn terminate_and_kill_are_noops_after_reap() {
        let handle = execute(&["/bin/true".into()], &[], "", StderrMode::DiscardToNull).unwrap();
        wait_timeout(&handle, Duration::from_secs(2)).unwrap();
        terminate(&handle);
        kill(&handle);
    }
}
