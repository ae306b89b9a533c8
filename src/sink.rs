use crossbeam_channel::Sender;
use std::fmt::Display;
use std::io::Write;
use termcolor::ColorChoice::Auto;
use termcolor::{Color, ColorSpec, StandardStream, WriteColor};

/// Destination for results delivered in position order.
///
/// Implemented for closures taking `(position, value)`, for vectors
/// (which collect `(position, value)` pairs), and for channel senders.
pub trait Sink<T> {
    /// Receives the result for `position`. Called once per position, in
    /// strictly increasing order.
    fn emit(&mut self, position: usize, value: T);
}

impl<T, F> Sink<T> for F
where
    F: FnMut(usize, T),
{
    fn emit(&mut self, position: usize, value: T) {
        self(position, value);
    }
}

impl<T> Sink<T> for Vec<(usize, T)> {
    fn emit(&mut self, position: usize, value: T) {
        self.push((position, value));
    }
}

impl<T> Sink<T> for &mut Vec<(usize, T)> {
    fn emit(&mut self, position: usize, value: T) {
        self.push((position, value));
    }
}

/// Forwards to a downstream channel. Results are dropped once the receiving
/// side has hung up.
impl<T> Sink<T> for Sender<(usize, T)> {
    fn emit(&mut self, position: usize, value: T) {
        if self.send((position, value)).is_err() {
            log::debug!("receiver gone, dropping position {}", position);
        }
    }
}

/// Sink that prints one line per result to a terminal stream.
///
/// Successful results print as `position = value`. Failed results print as
/// `position failed: error` in bold red when the stream supports color.
///
/// ```
/// use seqpool::{Console, Sink};
/// use termcolor::Buffer;
///
/// let mut console = Console::new(Buffer::no_color());
/// console.emit(1, Ok::<u32, String>(1));
/// console.emit(2, Err::<u32, _>("too big"));
///
/// let output = console.into_inner();
/// assert_eq!(output.as_slice(), b"1 = 1\n2 failed: too big\n");
/// ```
pub struct Console<W = StandardStream> {
    stream: W,
}

impl Console {
    /// Makes a console sink whose output goes to stdout.
    pub fn stdout() -> Self {
        Console::new(StandardStream::stdout(Auto))
    }

    /// Makes a console sink whose output goes to stderr.
    pub fn stderr() -> Self {
        Console::new(StandardStream::stderr(Auto))
    }
}

impl<W: WriteColor> Console<W> {
    /// Makes a console sink writing to any color-capable stream.
    pub fn new(stream: W) -> Self {
        Console { stream }
    }

    /// Unwraps the underlying stream.
    pub fn into_inner(self) -> W {
        self.stream
    }

    fn failure(&mut self, position: usize, error: &dyn Display) {
        let mut spec = ColorSpec::new();
        spec.set_bold(true);
        spec.set_fg(Some(Color::Red));
        let _ = self.stream.set_color(&spec);
        let _ = write!(self.stream, "{} failed", position);
        let _ = self.stream.reset();
        let _ = writeln!(self.stream, ": {}", error);
    }
}

impl<W, T, E> Sink<Result<T, E>> for Console<W>
where
    W: WriteColor,
    T: Display,
    E: Display,
{
    fn emit(&mut self, position: usize, value: Result<T, E>) {
        match value {
            Ok(value) => {
                let _ = writeln!(self.stream, "{} = {}", position, value);
            }
            Err(error) => self.failure(position, &error),
        }
    }
}

impl<W, T, E> Sink<Result<T, E>> for &mut Console<W>
where
    W: WriteColor,
    T: Display,
    E: Display,
{
    fn emit(&mut self, position: usize, value: Result<T, E>) {
        (**self).emit(position, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termcolor::Buffer;

    #[test]
    fn closure_receives_pairs() {
        let mut seen = Vec::new();
        let mut sink = |position: usize, value: &str| seen.push(format!("{}:{}", position, value));
        sink.emit(1, "a");
        sink.emit(2, "b");
        assert_eq!(seen, ["1:a", "2:b"]);
    }

    #[test]
    fn console_prints_results_in_plain_text() {
        let mut console = Console::new(Buffer::no_color());
        console.emit(1, Ok::<u64, String>(1));
        console.emit(2, Ok::<u64, String>(4));
        console.emit(3, Err::<u64, String>("overflow".to_owned()));
        assert_eq!(
            String::from_utf8(console.into_inner().into_inner()).unwrap(),
            "1 = 1\n2 = 4\n3 failed: overflow\n",
        );
    }

    #[test]
    fn console_highlights_failures() {
        let mut console = Console::new(Buffer::ansi());
        console.emit(9, Ok::<u64, &str>(81));
        console.emit(10, Err::<u64, &str>("boom"));

        let output = String::from_utf8(console.into_inner().into_inner()).unwrap();
        let (ok, failed) = output.split_at(output.find("\x1b").unwrap());
        assert_eq!(ok, "9 = 81\n");
        assert!(failed.contains("\x1b[1m"));
        assert!(failed.contains("\x1b[31m"));
        assert!(failed.contains("10 failed\x1b[0m: boom\n"));
    }

    #[test]
    fn sender_forwards_until_disconnected() {
        let (mut sender, receiver) = crossbeam_channel::unbounded::<(usize, char)>();
        sender.emit(1, 'a');
        assert_eq!(receiver.recv().unwrap(), (1, 'a'));
        drop(receiver);
        sender.emit(2, 'b');
    }
}
