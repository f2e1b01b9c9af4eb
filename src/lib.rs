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

//! `procio` runs a single external process under strict demand-driven,
//! back-pressured I/O.
//!
//! Fork+exec a child with three prepared pipes, then drive it with
//! non-blocking `write`/`read`/`close` and a non-blocking `wait`. Neither
//! side is ever allowed to block the calling thread: a full write or read
//! either completes immediately or arms a one-shot readiness subscription
//! the caller (or its host scheduler, via [`readiness::ReadinessRegistrar`])
//! waits on before retrying.
//!
//! This crate deliberately does not implement a lazy-stream wrapper, input
//! adapters, or a shutdown supervisor — those are expected to be built on
//! top of the operations here by whatever runtime embeds this crate.
//!
//! ```no_run
//! use procio::{execute, io, lifecycle, readiness::Direction, launcher::StderrMode};
//!
//! let handle = execute(&["/bin/echo".into(), "hi".into()], &[], "", StderrMode::InheritToConsole)?;
//! loop {
//!     match io::read(&handle, io::UNBUFFERED_READ) {
//!         Ok(bytes) if bytes.is_empty() => break, // EOF
//!         Ok(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
//!         Err(procio::error::IoOpError::WouldBlock) => continue,
//!         Err(err) => return Err(err.into()),
//!     }
//! }
//! io::close(&handle, Direction::Read);
//! let status = lifecycle::wait_timeout(&handle, std::time::Duration::from_secs(1))?;
//! println!("{:?}", status);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod handle;
pub mod io;
pub mod launcher;
pub mod lifecycle;
pub mod readiness;

mod libc_util;

pub use crate::error::{IoOpError, LaunchError, WaitError};
pub use crate::handle::{ExecContext, ExitStatus};
pub use crate::launcher::{execute, execute_with_registrar, LaunchOptions, StderrMode};
pub use crate::readiness::{Direction, NullRegistrar, ReadinessRegistrar, Token};

/// Fd slot sentinel. Expressed internally as `Option::None` on an owned fd
/// (see [`handle::ExecContext`]); kept here as a documented constant so
/// callers migrating from a raw-fd API have something to compare against.
pub const PIPE_CLOSED: i32 = -1;

/// `_exit` code the child uses for any failure between `fork` and a
/// successful `execve`. Chosen because it isn't reserved by conventional
/// UNIX exit-code lore; a child that legitimately exits 125 on its own is
/// indistinguishable from a pre-exec failure without a dedicated
/// close-on-exec signaling pipe, which this crate deliberately does not add.
pub const FORK_EXEC_FAILURE: i32 = 125;

pub use crate::io::{PIPE_BUF_SIZE, UNBUFFERED_READ};

/// Spawns `args[0]` with an explicit [`LaunchOptions`] bundle instead of the
/// four positional arguments [`execute`] takes. Supplemental convenience;
/// semantically identical to calling `execute` with the bundle's fields.
pub fn execute_with_options(options: &LaunchOptions) -> Result<ExecContext, LaunchError> {
    execute(&options.args, &options.env, &options.dir, options.stderr_mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn echo_roundtrips_through_unbuffered_read() {
        let handle = execute(
            &["/bin/echo".into(), "hi".into()],
            &[],
            "",
            StderrMode::DiscardToNull,
        )
        .unwrap();

        let mut collected = Vec::new();
        loop {
            match io::read(&handle, UNBUFFERED_READ) {
                Ok(bytes) if bytes.is_empty() => break,
                Ok(bytes) => collected.extend_from_slice(&bytes),
                Err(IoOpError::WouldBlock) => std::thread::sleep(Duration::from_millis(5)),
                Err(err) => panic!("unexpected read error: {err}"),
            }
        }
        assert_eq!(collected, b"hi\n");

        let status = lifecycle::wait_timeout(&handle, Duration::from_secs(2)).unwrap();
        assert_eq!(status, ExitStatus::Exited(0));
    }

    #[test]
    fn nonexistent_executable_exits_with_fork_exec_failure() {
        let handle = execute(
            &["/does/not/exist".into()],
            &[],
            "",
            StderrMode::DiscardToNull,
        )
        .unwrap();
        let status = lifecycle::wait_timeout(&handle, Duration::from_secs(2)).unwrap();
        assert_eq!(status, ExitStatus::Exited(FORK_EXEC_FAILURE));
    }
}
