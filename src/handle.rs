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

//! The opaque, reference-counted resource handle returned by [`crate::execute`].

use std::os::unix::io::{OwnedFd, RawFd, AsRawFd};
use std::sync::{Arc, Mutex};

use crate::readiness::{ReadinessRegistrar, ReadinessSlot};

/// Terminal exit information for a reaped child, matching the three
/// `wait(2)` classifications a process can terminate with.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExitStatus {
    /// The child called `exit`/returned from `main`; the value is the exit
    /// code (`WEXITSTATUS`).
    Exited(i32),
    /// The child was killed by a signal; the value is the signal number
    /// (`WTERMSIG`).
    Signaled(i32),
    /// The child is stopped, not terminated (`WIFSTOPPED`). Callers
    /// typically treat this as transient.
    Stopped,
}

/// One pipe endpoint the parent retains after `fork`. `None` is the
/// `PIPE_CLOSED` sentinel: the slot has been closed from the parent side
/// (or was never valid to begin with).
#[derive(Debug, Default)]
struct FdSlot(Option<OwnedFd>);

impl FdSlot {
    fn raw(&self) -> Option<RawFd> {
        self.0.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Closes the fd if present and marks the slot `PIPE_CLOSED`. Idempotent:
    /// calling this twice is a no-op the second time.
    fn close(&mut self) {
        self.0.take();
    }
}

/// Mutable state guarded by one mutex. Kept small and POD-ish so that
/// lock hold times stay in the single-digit microseconds, well under the
/// tens of microseconds a syscall on these fds typically costs.
#[derive(Debug)]
struct Inner {
    pid: Option<libc::pid_t>,
    input_fd: FdSlot,
    output_fd: FdSlot,
    exit_status: Option<ExitStatus>,
}

/// The handle the rest of this crate (and its callers) operate on. Cheap to
/// clone (it's an `Arc`); every clone refers to the same child process and
/// the same pair of pipes.
///
/// Dropping the last clone closes any fd still open, best-effort, but does
/// **not** reap the child — see [`crate::lifecycle`] and the module docs on
/// why that responsibility is left to an external supervisor.
#[derive(Clone)]
pub struct ExecContext {
    inner: Arc<Mutex<Inner>>,
    pub(crate) read_token: Arc<ReadinessSlot>,
    pub(crate) write_token: Arc<ReadinessSlot>,
    pub(crate) registrar: Arc<dyn ReadinessRegistrar>,
}

impl ExecContext {
    pub(crate) fn new(
        pid: libc::pid_t,
        input_fd: OwnedFd,
        output_fd: OwnedFd,
        registrar: Arc<dyn ReadinessRegistrar>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                pid: Some(pid),
                input_fd: FdSlot(Some(input_fd)),
                output_fd: FdSlot(Some(output_fd)),
                exit_status: None,
            })),
            read_token: Arc::new(ReadinessSlot::new()),
            write_token: Arc::new(ReadinessSlot::new()),
            registrar,
        }
    }

    /// The child's pid, or `None` once reaped (the `CMD_EXIT` sentinel).
    pub fn pid(&self) -> Option<libc::pid_t> {
        self.inner.lock().unwrap().pid
    }

    /// Raw value of the parent-side stdin fd, or `None` if closed
    /// (`PIPE_CLOSED`). Exposed so a host scheduler can register its own
    /// epoll/kqueue interest without this crate knowing which backend is in
    /// use; `procio`'s own `io`/`readiness` operations use this internally
    /// too.
    pub fn input_raw_fd(&self) -> Option<RawFd> {
        self.inner.lock().unwrap().input_fd.raw()
    }

    /// Raw value of the parent-side stdout fd, or `None` if closed
    /// (`PIPE_CLOSED`).
    pub fn output_raw_fd(&self) -> Option<RawFd> {
        self.inner.lock().unwrap().output_fd.raw()
    }

    pub(crate) fn close_input(&self) {
        self.write_token.disarm(self.registrar.as_ref());
        self.inner.lock().unwrap().input_fd.close();
    }

    pub(crate) fn close_output(&self) {
        self.read_token.disarm(self.registrar.as_ref());
        self.inner.lock().unwrap().output_fd.close();
    }

    /// Already-cached exit status, if the child has been reaped.
    pub(crate) fn cached_exit_status(&self) -> Option<ExitStatus> {
        self.inner.lock().unwrap().exit_status
    }

    /// Records the terminal exit status and clears the pid, per the
    /// invariant that `exit_type`/`exit_status` become immutable once set.
    pub(crate) fn record_exit(&self, status: ExitStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.exit_status = Some(status);
        inner.pid = None;
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("ExecContext")
            .field("pid", &inner.pid)
            .field("input_fd", &inner.input_fd.raw())
            .field("output_fd", &inner.output_fd.raw())
            .field("exit_status", &inner.exit_status)
            .finish()
    }
}
