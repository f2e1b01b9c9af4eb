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

//! Error taxonomy. The core never retries or swallows an error; every
//! fallible operation returns one of these and lets the caller decide.

use errno::Errno;

/// Failure launching a child: something in the pre-fork pipe/fcntl path
/// failed. Pre-exec failure inside the child is not observable here; it
/// shows up later as `wait` returning `ExitStatus::Exited(FORK_EXEC_FAILURE)`.
#[derive(Debug, thiserror::Error)]
#[error("failed to launch process: {0}")]
pub struct LaunchError(#[from] pub Errno);

/// Failure performing `read`/`write`/`close` on a handle.
#[derive(Debug, thiserror::Error)]
pub enum IoOpError {
    /// The syscall would have blocked. A readiness registration for the
    /// corresponding direction has already been armed; the caller must wait
    /// for the wake-up before retrying.
    #[error("operation would block")]
    WouldBlock,

    /// The fd slot was already closed from the parent side.
    #[error("pipe already closed")]
    PipeClosed,

    /// Any other non-recoverable `errno` from the underlying syscall.
    #[error("os error: {0}")]
    Os(#[from] Errno),
}

/// Failure performing a non-blocking `waitpid`.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// `waitpid(WNOHANG)` returned 0: the child is still running.
    #[error("child has not exited yet")]
    NotExited,

    /// `waitpid` itself failed.
    #[error("os error: {0}")]
    Os(#[from] Errno),
}
