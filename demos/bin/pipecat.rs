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

//! Runnable demonstration of the low-level API: launches `/bin/cat`, feeds
//! it a payload, and drains its stdout, integrating with a toy
//! poll(2)-based [`procio::ReadinessRegistrar`] instead of spinning.

#[path = "../poll_registrar.rs"]
mod poll_registrar;

use std::time::Duration;

use procio::readiness::Direction;
use procio::{error::IoOpError, execute_with_registrar, io, launcher::StderrMode, lifecycle};

use poll_registrar::PollRegistrar;

fn main() {
    tracing_subscriber::fmt::init();

    let registrar = PollRegistrar::new();
    let handle = execute_with_registrar(
        &["/bin/cat".to_string()],
        &[],
        "",
        StderrMode::InheritToConsole,
        registrar.clone(),
    )
    .expect("failed to launch /bin/cat");

    let payload = b"hello from pipecat\n".to_vec();
    let mut written = 0usize;
    while written < payload.len() {
        match io::write(&handle, &payload[written..]) {
            Ok(n) => written += n,
            Err(IoOpError::WouldBlock) => {
                let fd = handle.input_raw_fd().expect("input fd still open while writing");
                registrar.wait_for_fd(fd, Direction::Write, Duration::from_secs(5));
            }
            Err(err) => panic!("write failed: {err}"),
        }
    }
    io::close(&handle, Direction::Write);

    let mut output = Vec::new();
    loop {
        match io::read(&handle, io::UNBUFFERED_READ) {
            Ok(bytes) if bytes.is_empty() => break,
            Ok(bytes) => output.extend_from_slice(&bytes),
            Err(IoOpError::WouldBlock) => {
                if let Some(fd) = handle.output_raw_fd() {
                    registrar.wait_for_fd(fd, Direction::Read, Duration::from_secs(5));
                } else {
                    break;
                }
            }
            Err(err) => panic!("read failed: {err}"),
        }
    }
    io::close(&handle, Direction::Read);

    print!("{}", String::from_utf8_lossy(&output));

    let status = lifecycle::wait_timeout(&handle, Duration::from_secs(2)).expect("child never reaped");
    println!("exit status: {status:?}");
}
