//! Scripted in-memory SCPI instrument.
//!
//! Stands in for the socket in [`super::ScpiClient`] tests. Written lines are
//! recorded with their arrival time; each query part of a line is answered
//! from a script. Replies to the query parts of one compound line are joined
//! with `;` into one reply line. A query without a scripted reply gets no
//! answer and the next read fails with `TimedOut`, like a socket read timeout.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::Instant;

/// Scripted instrument implementing `Read + Write`.
#[derive(Debug, Default)]
pub struct MockInstrument {
    replies: HashMap<String, VecDeque<String>>,
    raw_input: Vec<u8>,
    pending: Vec<u8>,
    received: Vec<(Instant, String)>,
    output: VecDeque<u8>,
    disconnected: bool,
}

impl MockInstrument {
    /// Instrument with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `query` with `reply`.
    pub fn respond(self, query: &str, reply: &str) -> Self {
        self.respond_sequence(query, [reply])
    }

    /// Answer `query` with `replies` in order; the last one repeats.
    pub fn respond_sequence<I, R>(mut self, query: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.replies.insert(
            query.to_string(),
            replies.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Event status register reads 0 for `zero_polls` queries, then 1.
    pub fn esr_after(self, zero_polls: usize) -> Self {
        let replies = std::iter::repeat("0")
            .take(zero_polls)
            .chain(std::iter::once("1"));
        self.respond_sequence("*ESR?", replies)
    }

    /// Make every later read report end of stream.
    pub fn disconnect(mut self) -> Self {
        self.disconnected = true;
        self
    }

    /// Lines received so far, without terminators.
    pub fn received(&self) -> Vec<String> {
        self.received.iter().map(|(_, line)| line.clone()).collect()
    }

    /// Arrival times of every line equal to `line`.
    pub fn arrivals(&self, line: &str) -> Vec<Instant> {
        self.received
            .iter()
            .filter(|(_, l)| l == line)
            .map(|(at, _)| *at)
            .collect()
    }

    /// Every byte written, terminators included.
    pub fn raw_input(&self) -> &[u8] {
        &self.raw_input
    }

    fn next_reply(&mut self, query: &str) -> Option<String> {
        let queue = self.replies.get_mut(query)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn handle_line(&mut self, line: String) {
        let replies: Option<Vec<String>> = line
            .split(';')
            .map(str::trim)
            .filter(|part| part.ends_with('?'))
            .map(|part| self.next_reply(part))
            .collect();
        self.received.push((Instant::now(), line));
        if let Some(replies) = replies.filter(|r| !r.is_empty()) {
            self.output.extend(replies.join(";").as_bytes());
            self.output.push_back(b'\n');
        }
    }
}

impl Write for MockInstrument {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.raw_input.extend_from_slice(buf);
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]).into_owned();
            self.handle_line(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockInstrument {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.disconnected {
            return Ok(0);
        }
        if self.output.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no reply from mock instrument",
            ));
        }
        let n = buf.len().min(self.output.len());
        for (dst, src) in buf.iter_mut().zip(self.output.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}
