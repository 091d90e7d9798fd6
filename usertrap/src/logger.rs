use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

const BUFFER_SIZE: usize = 8192;

/// Messages logged before the embedder's console is ready
struct LogBuffer {
    buffer: [u8; BUFFER_SIZE],
    position: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            position: 0,
        }
    }

    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = BUFFER_SIZE - self.position;

        // Full: newer messages are dropped
        if bytes.len() > remaining {
            return Ok(());
        }

        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();

        Ok(())
    }

    fn contents(&self) -> &str {
        core::str::from_utf8(&self.buffer[..self.position]).unwrap_or("<invalid UTF-8>")
    }

    fn clear(&mut self) {
        self.position = 0;
    }
}

impl Write for LogBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_str(s)
    }
}

enum LoggerState {
    /// Buffering until the embedder says stderr is usable
    Buffering,
    /// Writing straight to stderr
    ConsoleReady,
}

/// Runtime logger: buffers early messages, then writes to stderr
pub struct TrapLogger {
    buffer: Mutex<LogBuffer>,
    state: Mutex<LoggerState>,
    level: Mutex<LevelFilter>,
}

impl TrapLogger {
    const fn new() -> Self {
        TrapLogger {
            buffer: Mutex::new(LogBuffer::new()),
            state: Mutex::new(LoggerState::Buffering),
            level: Mutex::new(LevelFilter::Info),
        }
    }

    /// Flush buffered messages and switch to direct output
    pub fn console_ready(&self) {
        let mut state = self.state.lock();
        let mut buffer = self.buffer.lock();

        if buffer.position > 0 {
            eprintln!("=== Buffered trap runtime messages ===");
            eprint!("{}", buffer.contents());
            eprintln!("=== End buffered messages ===");
            buffer.clear();
        }

        *state = LoggerState::ConsoleReady;
    }

    pub fn set_level(&self, level: LevelFilter) {
        *self.level.lock() = level;
        log::set_max_level(level);
    }

    /// Messages still held in the early buffer
    pub fn buffered(&self) -> String {
        self.buffer.lock().contents().to_string()
    }
}

impl Log for TrapLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= *self.level.lock()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let target = record.target();
        let args = record.args();

        // A thread logging from inside another log call must not deadlock
        let state = match self.state.try_lock() {
            Some(state) => state,
            None => {
                eprintln!("[{:>5}] {}: {}", level, target, args);
                return;
            }
        };

        match *state {
            LoggerState::Buffering => {
                drop(state);
                match self.buffer.try_lock() {
                    Some(mut buffer) => {
                        let _ = writeln!(&mut *buffer, "[{:>5}] {}: {}", level, target, args);
                    }
                    None => eprintln!("[BUFF] {}: {}", target, args),
                }
            }
            LoggerState::ConsoleReady => {
                drop(state);
                eprintln!("[{:>5}] {}: {}", level, target, args);
            }
        }
    }

    fn flush(&self) {}
}

pub static TRAP_LOGGER: TrapLogger = TrapLogger::new();

/// Install the runtime logger; may run before the console is usable
pub fn init_early(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&TRAP_LOGGER)?;
    TRAP_LOGGER.set_level(level);
    Ok(())
}

/// Call once stderr may be written
pub fn console_ready() {
    TRAP_LOGGER.console_ready();
}
