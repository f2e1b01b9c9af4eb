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

//! Low-level helpers used only by the launcher's pre-fork setup and the
//! child's async-signal-safe path between `fork` and `execve`.

use std::ffi::CString;
use std::os::unix::io::RawFd;

/// Builds a null-terminated `argv`/`envp`-style array of C string pointers
/// on the heap from already-constructed [`CString`]s. The returned pointers
/// stay valid as long as `strings` is not dropped; this is why callers keep
/// both alive together until after `execve`.
pub fn build_c_argv(strings: &[CString]) -> Vec<*const libc::c_char> {
    let mut argv: Vec<*const libc::c_char> = strings.iter().map(|s| s.as_ptr()).collect();
    argv.push(std::ptr::null());
    argv
}

/// Converts a slice of Rust strings into owned, NUL-free [`CString`]s,
/// suitable for passing to [`build_c_argv`]. Fails if any string contains
/// an embedded NUL byte.
pub fn to_cstrings<S: AsRef<str>>(strings: &[S]) -> Result<Vec<CString>, std::ffi::NulError> {
    strings.iter().map(|s| CString::new(s.as_ref())).collect()
}

/// Sets `O_CLOEXEC` on an fd. Safe to call before `fork`; not
/// async-signal-safety-sensitive since it only runs in the parent.
pub fn set_cloexec(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let res = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Sets `O_NONBLOCK` on an fd, preserving any other status flags.
pub fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let res = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Async-signal-safe: closes every fd strictly above `keep_below`, up to
/// `sysconf(_SC_OPEN_MAX)`. Used by the child right before `execve` so that
/// no fd leaks across the exec besides 0/1/2.
///
/// A bounded loop over the whole fd space is used instead of walking
/// `/proc/self/fd`, because `opendir`/`readdir` are not guaranteed
/// async-signal-safe and `/proc` may not even be mounted in the child's
/// eventual mount namespace.
pub fn close_fds_above(keep_below: libc::c_int) {
    let max_fd = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let max_fd = if max_fd < 0 { 1024 } else { max_fd as libc::c_int };
    for fd in keep_below..max_fd {
        unsafe {
            libc::close(fd);
        }
    }
}

/// Async-signal-safe: opens `/dev/null` write-only. Returns the raw fd, or
/// `-1` with `errno` set on failure.
pub fn open_devnull_write() -> RawFd {
    const DEVNULL: &[u8] = b"/dev/null\0";
    unsafe { libc::open(DEVNULL.as_ptr() as *const libc::c_char, libc::O_WRONLY) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_cstrings_round_trips_plain_strings() {
        let input = ["echo", "hello world"];
        let cstrings = to_cstrings(&input).unwrap();
        assert_eq!(cstrings[0].to_str().unwrap(), "echo");
        assert_eq!(cstrings[1].to_str().unwrap(), "hello world");
    }

    #[test]
    fn to_cstrings_rejects_embedded_nul() {
        let input = ["bad\0arg"];
        assert!(to_cstrings(&input).is_err());
    }

    #[test]
    fn build_c_argv_is_null_terminated() {
        let cstrings = to_cstrings(&["a", "b"]).unwrap();
        let argv = build_c_argv(&cstrings);
        assert_eq!(argv.len(), 3);
        assert!(argv[2].is_null());
    }

    #[test]
    fn set_nonblocking_and_cloexec_on_a_pipe() {
        let mut fds = [0 as libc::c_int; 2];
        let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(res, 0);
        set_cloexec(fds[0]).unwrap();
        set_nonblocking(fds[0]).unwrap();
        let flags = unsafe { libc::fcntl(fds[0], libc::F_GETFL) };
        assert_eq!(flags & libc::O_NONBLOCK, libc::O_NONBLOCK);
        let fdflags = unsafe { libc::fcntl(fds[0], libc::F_GETFD) };
        assert_eq!(fdflags & libc::FD_CLOEXEC, libc::FD_CLOEXEC);
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
