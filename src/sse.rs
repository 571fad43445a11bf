//! Minimal Server-Sent Events decoder over a blocking reader.
//!
//! Only `data` fields are surfaced: multiple `data` lines of one event are joined with `\n`, an
//! empty line dispatches the event. Comments and other fields (`event`, `id`, `retry`) are
//! skipped.
//!
//! Decoding is blocking: the stream thread reads a `reqwest::blocking::Response` through this
//! reader.
use std::io::{self, BufRead};

/// Iterator over the `data` payloads of an event stream.
pub struct EventReader<R> {
    reader: R,
    finished: bool,
}

impl<R: BufRead> EventReader<R> {
    pub fn new(reader: R) -> Self {
        EventReader {
            reader,
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for EventReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut data: Option<String> = None;
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    // End of stream. Dispatch whatever was accumulated.
                    self.finished = true;
                    return data.map(Ok);
                }
                Ok(_) => {}
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }

            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                match data.take() {
                    Some(data) => return Some(Ok(data)),
                    None => continue,
                }
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }
        }
    }
}
