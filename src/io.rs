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

//! Single-syscall, non-blocking `write`/`read`/`close` against a handle's
//! pipes. Every operation here either completes, reports a short
//! count with readiness armed, or reports "would block" with readiness
//! armed. None of them ever block the calling thread.

use crate::error::IoOpError;
use crate::handle::ExecContext;
use crate::readiness::Direction;

/// Maximum number of bytes a single [`read`] call can return.
pub const PIPE_BUF_SIZE: usize = 65_535;

/// Sentinel `request` value for [`read`]: return whatever is immediately
/// available, up to [`PIPE_BUF_SIZE`], without rearming readiness.
pub const UNBUFFERED_READ: isize = -1;

/// Writes `bytes` to the handle's stdin pipe.
///
/// `bytes` must be non-empty; passing an empty buffer is a misuse and
/// panics, rather than a recoverable condition.
///
/// Returns `Ok(n)` with `0 <= n <= bytes.len()`. If `n < bytes.len()` (a
/// short write or [`IoOpError::WouldBlock`]), a write-readiness
/// subscription is armed on the handle's write direction; the caller must
/// wait for that wake-up before calling `write` again.
pub fn write(handle: &ExecContext, bytes: &[u8]) -> Result<usize, IoOpError> {
    assert!(!bytes.is_empty(), "write() requires a non-empty buffer");

    let fd = match handle.input_raw_fd() {
        Some(fd) => fd,
        None => return Err(IoOpError::PipeClosed),
    };

    let n = unsafe { libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len()) };

    if n < 0 {
        let err = errno::errno();
        if err.0 == libc::EAGAIN || err.0 == libc::EWOULDBLOCK {
            handle.write_token.arm(fd, Direction::Write, handle.registrar.as_ref());
            return Err(IoOpError::WouldBlock);
        }
        tracing::error!(fd, %err, "write failed");
        return Err(IoOpError::Os(err));
    }

    let n = n as usize;
    if n < bytes.len() {
        handle.write_token.arm(fd, Direction::Write, handle.registrar.as_ref());
    }
    Ok(n)
}

/// Reads up to `min(request, PIPE_BUF_SIZE)` bytes from the handle's
/// stdout pipe, or pass [`UNBUFFERED_READ`] to take whatever is
/// immediately available without rearming readiness.
///
/// `request` must be positive or exactly [`UNBUFFERED_READ`]; anything
/// else is a misuse and panics.
///
/// An empty `Ok(vec)` (`n == 0`) means EOF: the child closed its stdout, or
/// exited. A short, positive-length result arms a read-readiness
/// subscription unless `request` was [`UNBUFFERED_READ`].
pub fn read(handle: &ExecContext, request: isize) -> Result<Vec<u8>, IoOpError> {
    assert!(
        request == UNBUFFERED_READ || request > 0,
        "read() request must be positive or UNBUFFERED_READ"
    );

    let fd = match handle.output_raw_fd() {
        Some(fd) => fd,
        None => return Err(IoOpError::PipeClosed),
    };

    let unbuffered = request == UNBUFFERED_READ;
    let size = if unbuffered {
        PIPE_BUF_SIZE
    } else {
        std::cmp::min(request as usize, PIPE_BUF_SIZE)
    };

    let mut buf = vec![0u8; size];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, size) };

    if n < 0 {
        let err = errno::errno();
        if err.0 == libc::EAGAIN || err.0 == libc::EWOULDBLOCK {
            handle.read_token.arm(fd, Direction::Read, handle.registrar.as_ref());
            return Err(IoOpError::WouldBlock);
        }
        tracing::error!(fd, %err, "read failed");
        return Err(IoOpError::Os(err));
    }

    let n = n as usize;
    buf.truncate(n);

    if n > 0 && n < size && !unbuffered {
        handle.read_token.arm(fd, Direction::Read, handle.registrar.as_ref());
    }

    Ok(buf)
}

/// Closes one side of the handle's pipes. Idempotent: closing an
/// already-`PIPE_CLOSED` side returns `Ok(())`.
///
/// Closing [`Direction::Write`] (the input fd) is the designated way to
/// signal end-of-input to the child. Either close cancels any outstanding
/// readiness subscription on the corresponding direction first
/// (stop-registration) before closing the fd.
pub fn close(handle: &ExecContext, which: Direction) {
    match which {
        Direction::Write => handle.close_input(),
        Direction::Read => handle.close_output(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{execute, StderrMode};

    #[test]
    fn write_rejects_empty_buffer() {
        let handle = execute(&["/bin/cat".into()], &[], "", StderrMode::DiscardToNull).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| write(&handle, &[])));
        assert!(result.is_err());
        close(&handle, Direction::Write);
        close(&handle, Direction::Read);
    }

    #[test]
    fn close_is_idempotent() {
        let handle = execute(&["/bin/cat".into()], &[], "", StderrMode::DiscardToNull).unwrap();
        close(&handle, Direction::Write);
        close(&handle, Direction::Write);
        assert!(matches!(write(&handle, b"x"), Err(IoOpError::PipeClosed)));
        close(&handle, Direction::Read);
        close(&handle, Direction::Read);
        assert!(matches!(read(&handle, UNBUFFERED_READ), Err(IoOpError::PipeClosed)));
    }

    #[test]
    fn write_ok_n_is_within_bounds() {
        let handle = execute(&["/bin/cat".into()], &[], "", StderrMode::DiscardToNull).unwrap();
        let payload = b"hello";
        let n = write(&handle, payload).unwrap();
        assert!(n <= payload.len());
        close(&handle, Direction::Write);
        close(&handle, Direction::Read);
    }

    #[test]
    fn read_request_is_bounded_by_pipe_buf_size() {
        let handle = execute(&["/bin/echo".into(), "hi".into()], &[], "", StderrMode::DiscardToNull).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let got = read(&handle, 1).unwrap();
        assert!(got.len() <= 1);
        close(&handle, Direction::Write);
        close(&handle, Direction::Read);
    }
}
