//! Chrome trace output.
//!
//! Enabled with `-d trace`; the result loads in chrome://tracing or Perfetto.
//! Worker phases are recorded on track 0 and every child process gets a span
//! on its own track, so overlapping builds show up side by side.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

thread_local! {
    static TRACE: RefCell<Option<Trace>> = RefCell::new(None);
}

struct Event<'a> {
    name: &'a str,
    tid: usize,
    start: Instant,
    end: Instant,
}

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_event(&mut self, event: &Event) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            event.tid,
            event.name,
            event.start.saturating_duration_since(self.start).as_micros(),
            event.end.saturating_duration_since(event.start).as_micros(),
        )
    }

    fn write(&mut self, event: &Event) -> std::io::Result<()> {
        self.write_event(event)?;
        writeln!(self.w, ",")
    }

    fn close(&mut self) -> std::io::Result<()> {
        let event = Event {
            name: "main",
            tid: 0,
            start: self.start,
            end: Instant::now(),
        };
        self.write_event(&event)?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

fn enabled() -> bool {
    TRACE.with(|t| t.borrow().is_some())
}

fn record(event: &Event) {
    TRACE.with(|t| {
        if let Some(trace) = t.borrow_mut().as_mut() {
            // A trace is a debugging aid; losing an event is not worth failing over.
            if let Err(err) = trace.write(event) {
                tracing::warn!("writing trace: {}", err);
            }
        }
    })
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    TRACE.with(|t| *t.borrow_mut() = Some(trace));
    Ok(())
}

/// Runs `f`, recording how long it took.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    record(&Event {
        name,
        tid: 0,
        start,
        end: Instant::now(),
    });
    result
}

/// Records a span that already happened, on track `tid`.
pub fn span(name: &str, start: Instant, end: Instant, tid: usize) {
    if !enabled() {
        return;
    }
    record(&Event {
        name,
        // Track 0 belongs to the worker itself.
        tid: tid + 1,
        start,
        end,
    });
}

pub fn close() -> std::io::Result<()> {
    TRACE.with(|t| match t.borrow_mut().take() {
        Some(mut trace) => trace.close(),
        None => Ok(()),
    })
}
