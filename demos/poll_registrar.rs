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

//! A minimal [`procio::ReadinessRegistrar`] backed by a dedicated polling
//! thread and `poll(2)`. A real host brings its own epoll/kqueue/io_uring
//! backend; this one exists purely so `pipecat` has something to wait on.

use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use procio::{Direction, ReadinessRegistrar, Token};

#[derive(Default)]
struct Shared {
    pending: HashMap<Token, (RawFd, Direction)>,
    ready: HashSet<(RawFd, Direction)>,
}

/// Registrar that polls all outstanding fds from one background thread and
/// wakes any waiter blocked in [`PollRegistrar::wait_for_fd`].
///
/// Callers never see a [`Token`] directly — it is the registrar's own
/// bookkeeping key. Waiters key off the `(fd, direction)` pair they already
/// know from the handle instead.
pub struct PollRegistrar {
    shared: Mutex<Shared>,
    woken: Condvar,
}

impl PollRegistrar {
    pub fn new() -> Arc<Self> {
        let this = Arc::new(Self {
            shared: Mutex::new(Shared::default()),
            woken: Condvar::new(),
        });
        let worker = Arc::clone(&this);
        thread::spawn(move || worker.run());
        this
    }

    /// Blocks the calling thread until `fd`/`direction` becomes ready or
    /// `timeout` elapses. Returns whether it became ready.
    pub fn wait_for_fd(&self, fd: RawFd, direction: Direction, timeout: Duration) -> bool {
        let key = (fd, direction);
        let guard = self.shared.lock().unwrap();
        let (mut guard, result) = self
            .woken
            .wait_timeout_while(guard, timeout, |s| !s.ready.contains(&key))
            .unwrap();
        let became_ready = guard.ready.remove(&key);
        became_ready || !result.timed_out()
    }

    fn run(&self) {
        loop {
            thread::sleep(Duration::from_millis(5));
            let mut guard = self.shared.lock().unwrap();
            if guard.pending.is_empty() {
                continue;
            }
            let mut pollfds: Vec<libc::pollfd> = guard
                .pending
                .values()
                .map(|(fd, dir)| libc::pollfd {
                    fd: *fd,
                    events: match dir {
                        Direction::Read => libc::POLLIN,
                        Direction::Write => libc::POLLOUT,
                    },
                    revents: 0,
                })
                .collect();
            let tokens: Vec<Token> = guard.pending.keys().copied().collect();
            drop(guard);

            let n = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, 0) };
            if n <= 0 {
                continue;
            }

            let mut guard = self.shared.lock().unwrap();
            for (pfd, token) in pollfds.iter().zip(tokens.iter()) {
                if pfd.revents != 0 {
                    if let Some(key) = guard.pending.remove(token) {
                        guard.ready.insert(key);
                    }
                }
            }
            drop(guard);
            self.woken.notify_all();
        }
    }
}

impl ReadinessRegistrar for PollRegistrar {
    fn arm(&self, fd: RawFd, direction: Direction, token: Token) {
        self.shared.lock().unwrap().pending.insert(token, (fd, direction));
    }

    fn disarm(&self, token: Token) {
        let mut guard = self.shared.lock().unwrap();
        guard.pending.remove(&token);
    }
}
