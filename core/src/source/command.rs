use std::io::{Read, Write};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{Result, SourceError};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Run `command` to completion, feeding it `input` on stdin, and kill it
/// if it is still running after `timeout`.
///
/// The exit status is returned as-is; callers decide what a non-zero
/// status means for them.
pub fn run_with_timeout(
    mut command: Command,
    input: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<Output> {
    let what = format!("{:?}", command.get_program());

    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;

    if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
        // A child that exits without reading all of its input is not an error here.
        thread::spawn(move || {
            let _ = stdin.write_all(&bytes);
        });
    }

    let stdout = child.stdout.take().map(|r| thread::spawn(move || read_all(r)));
    let stderr = child.stderr.take().map(|r| thread::spawn(move || read_all(r)));

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SourceError::Timeout {
                what,
                after: timeout,
            });
        }

        thread::sleep(POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: join_reader(stdout, &what)?,
        stderr: join_reader(stderr, &what)?,
    })
}

fn read_all<R: Read>(mut r: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    Ok(buf)
}

fn join_reader(
    handle: Option<thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    what: &str,
) -> Result<Vec<u8>> {
    match handle {
        Some(handle) => match handle.join() {
            Ok(bytes) => Ok(bytes?),
            Err(_) => Err(SourceError::Command(format!(
                "output reader for {} panicked",
                what
            ))),
        },
        None => Ok(Vec::new()),
    }
}
