/*!
Whole-operation deadlines on top of per-call socket timeouts.

A socket read timeout only bounds one `read`; a peer that sends a byte just before
each timeout keeps a loop alive forever. `Deadline` tracks the absolute end and
`read_before` re-arms the socket timeout with the time that is left before every read.
*/

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Time left, or `None` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn expired_error(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!("deadline of {} exceeded", humantime::format_duration(self.budget)),
        )
    }

    fn remaining_or_err(&self) -> io::Result<Duration> {
        self.remaining().ok_or_else(|| self.expired_error())
    }
}

/// Streams whose underlying socket timeouts can be re-armed.
pub trait SocketTimeouts {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()>;
}

impl SocketTimeouts for TcpStream {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, dur)
    }
}

impl SocketTimeouts for rustls::StreamOwned<rustls::ClientConnection, TcpStream> {
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(dur)
    }

    fn set_write_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.sock.set_write_timeout(dur)
    }
}

/// In-memory input never blocks.
impl<T: AsRef<[u8]>> SocketTimeouts for io::Cursor<T> {
    fn set_read_timeout(&self, _dur: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn set_write_timeout(&self, _dur: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// One `read` bounded by what is left of `deadline`. A timed-out read, or a call made
/// after the deadline, fails with `ErrorKind::TimedOut`.
pub fn read_before<S: Read + SocketTimeouts>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: &Deadline,
) -> io::Result<usize> {
    loop {
        stream.set_read_timeout(Some(deadline.remaining_or_err()?))?;
        match stream.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(deadline.expired_error());
            }
            other => return other,
        }
    }
}

pub fn write_all_before<S: Write + SocketTimeouts>(
    stream: &mut S,
    data: &[u8],
    deadline: &Deadline,
) -> io::Result<()> {
    stream.set_write_timeout(Some(deadline.remaining_or_err()?))?;
    stream.write_all(data).and_then(|_| stream.flush()).map_err(|e| {
        if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
            deadline.expired_error()
        } else {
            e
        }
    })
}
