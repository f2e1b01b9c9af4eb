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

//! The only coupling between this crate and a host scheduler: a trait the
//! host implements so that `io::read`/`io::write` can park a task on fd
//! readiness instead of spinning or blocking.

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, AtomicBool, Ordering};

/// Which end of a handle's pipes a readiness subscription concerns.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Direction {
    /// The parent-side writable end of the child's stdin.
    Write,
    /// The parent-side readable end of the child's stdout.
    Read,
}

/// Opaque, globally unique identifier for one readiness subscription.
///
/// The host scheduler is expected to use this purely as a key: arm it with
/// an fd and direction, and when the fd becomes ready, look up whatever the
/// host associated with the token and wake it. This crate never inspects
/// the identifier's value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Token(u64);

impl Token {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Token(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// Registration primitive called by `io::read`/`io::write`/`io::close` when
/// an operation cannot complete immediately.
///
/// Implementations back this with whatever event mechanism the host uses:
/// epoll, kqueue, io_uring, or a dedicated polling thread. `arm` is called
/// at most once per outstanding subscription per direction (see
/// [`crate::handle::ExecContext`]'s invariant); `disarm` cancels an
/// outstanding subscription before it fires, e.g. because `close` was
/// called or the caller is abandoning the operation.
pub trait ReadinessRegistrar: Send + Sync {
    /// Arm a one-shot, edge-triggered subscription for `fd`/`direction`,
    /// to be delivered to whatever the host has associated with `token`.
    fn arm(&self, fd: RawFd, direction: Direction, token: Token);

    /// Cancel a previously armed subscription. A no-op if it already fired
    /// or was never armed.
    fn disarm(&self, token: Token);
}

/// Default registrar for callers with no host scheduler to integrate with.
/// `arm`/`disarm` are no-ops; such callers retry `read`/`write` themselves,
/// e.g. in a spin-with-backoff loop, which is always correct but burns a
/// thread while waiting.
#[derive(Debug, Default)]
pub struct NullRegistrar;

impl ReadinessRegistrar for NullRegistrar {
    fn arm(&self, _fd: RawFd, _direction: Direction, _token: Token) {}
    fn disarm(&self, _token: Token) {}
}

/// Per-direction bookkeeping owned by a handle. Tracks whether a
/// subscription is currently outstanding and remembers its token so `close`
/// can issue a matching `disarm`.
///
/// The one-shot contract (spec §4.2/§4.3/§5) means a caller only ever calls
/// [`ReadinessSlot::arm`] again after its prior subscription has already
/// fired and been acted on — the fd event itself is what retires the old
/// subscription on the host side. This slot has no way to observe that
/// firing directly (the host only hands back a `Token`, never a callback
/// into this slot), so `arm` always re-arms: it replaces whatever token was
/// previously stored rather than treating a second call as a double-arm
/// error. The "at most one outstanding subscription per direction"
/// invariant is therefore a contract on the caller (driven by `io::read`/
/// `io::write`, which only arm after observing a short result or
/// `WouldBlock`), not something this slot can enforce after the fact.
#[derive(Debug, Default)]
pub struct ReadinessSlot {
    armed: AtomicBool,
    token: AtomicU64,
}

impl ReadinessSlot {
    pub fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            token: AtomicU64::new(0),
        }
    }

    /// Arm a new subscription, replacing any previously outstanding one.
    pub fn arm(&self, fd: RawFd, direction: Direction, registrar: &dyn ReadinessRegistrar) {
        let token = Token::next();
        self.token.store(token.0, Ordering::Release);
        self.armed.store(true, Ordering::Release);
        registrar.arm(fd, direction, token);
    }

    /// Cancel any outstanding subscription (stop-registration). Idempotent.
    pub fn disarm(&self, registrar: &dyn ReadinessRegistrar) {
        if self.armed.swap(false, Ordering::AcqRel) {
            let raw = self.token.load(Ordering::Acquire);
            registrar.disarm(Token(raw));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_registrar_is_a_no_op() {
        let r = NullRegistrar;
        r.arm(3, Direction::Read, Token::next());
        r.disarm(Token::next());
    }

    #[test]
    fn slot_starts_disarmed_and_disarm_is_idempotent() {
        let slot = ReadinessSlot::new();
        let r = NullRegistrar;
        slot.disarm(&r);
        slot.disarm(&r);
    }

    #[test]
    fn slot_allows_rearm_after_disarm() {
        let slot = ReadinessSlot::new();
        let r = NullRegistrar;
        slot.arm(3, Direction::Write, &r);
        slot.disarm(&r);
        slot.arm(3, Direction::Write, &r);
    }

    #[test]
    fn slot_allows_rearm_without_disarm_once_the_prior_event_has_fired() {
        // Simulates the normal back-pressure retry loop: arm, the event
        // fires (nothing clears `armed` on this side), caller retries and
        // arms again. This must not panic.
        let slot = ReadinessSlot::new();
        let r = NullRegistrar;
        slot.arm(3, Direction::Write, &r);
        slot.arm(3, Direction::Write, &r);
        slot.disarm(&r);
    }
}
