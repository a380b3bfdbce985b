//! Host-side stand-ins for the stage hardware.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, InputPin, OutputPin};
use embedded_hal_nb::serial::{self, ErrorKind};

use crate::common::output_port::StagePins;
use crate::common::uart_comm::{RxPoll, SerialTransport};
use crate::stage::endstop::{EndstopLines, EndstopSet};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Line {
    Step,
    Dir,
    XEnable,
    YEnable,
    ZEnable,
    Toggle,
}

const LINE_COUNT: usize = 6;

#[derive(Default)]
struct Trace {
    levels: [Option<bool>; LINE_COUNT],
    writes: [usize; LINE_COUNT],
    falling_edges: [usize; LINE_COUNT],
}

/// Records every level written to the output lines.
#[derive(Clone, Default)]
pub struct PinTrace(Rc<RefCell<Trace>>);

impl PinTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_pins(&self) -> StagePins<MockPin> {
        StagePins::new(
            self.pin(Line::Step),
            self.pin(Line::Dir),
            self.pin(Line::XEnable),
            self.pin(Line::YEnable),
            self.pin(Line::ZEnable),
            self.pin(Line::Toggle),
        )
    }

    fn pin(&self, line: Line) -> MockPin {
        MockPin { line, trace: self.clone() }
    }

    /// Last level written, `None` if the line was never driven.
    pub fn level(&self, line: Line) -> Option<bool> {
        self.0.borrow().levels[line as usize]
    }

    pub fn writes(&self, line: Line) -> usize {
        self.0.borrow().writes[line as usize]
    }

    pub fn falling_edges(&self, line: Line) -> usize {
        self.0.borrow().falling_edges[line as usize]
    }

    fn record(&self, line: Line, high: bool) {
        let mut trace = self.0.borrow_mut();
        let idx = line as usize;
        if trace.levels[idx] == Some(true) && !high {
            trace.falling_edges[idx] += 1;
        }
        trace.levels[idx] = Some(high);
        trace.writes[idx] += 1;
    }
}

pub struct MockPin {
    line: Line,
    trace: PinTrace,
}

impl digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.trace.record(self.line, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.trace.record(self.line, true);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockPinError;

impl digital::Error for MockPinError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

/// Input line fixed at one level, or failing every read.
pub struct MockInput(Option<bool>);

impl MockInput {
    pub fn level(high: bool) -> Self {
        MockInput(Some(high))
    }

    pub fn broken() -> Self {
        MockInput(None)
    }
}

impl digital::ErrorType for MockInput {
    type Error = MockPinError;
}

impl InputPin for MockInput {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.0.ok_or(MockPinError)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Records requested delays instead of sleeping. An optional hook sees the
/// zero-based index of every call, which is where tests inject interrupts.
#[derive(Default)]
pub struct RecordingDelay<'a> {
    micros: Vec<u32>,
    hook: Option<Box<dyn FnMut(usize) + 'a>>,
}

impl<'a> RecordingDelay<'a> {
    pub fn new() -> Self {
        RecordingDelay { micros: Vec::new(), hook: None }
    }

    pub fn with_hook<F: FnMut(usize) + 'a>(hook: F) -> Self {
        RecordingDelay { micros: Vec::new(), hook: Some(Box::new(hook)) }
    }

    pub fn micros(&self) -> &[u32] {
        &self.micros
    }
}

impl DelayNs for RecordingDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.delay_us(ns.div_ceil(1_000));
    }

    fn delay_us(&mut self, us: u32) {
        let call = self.micros.len();
        self.micros.push(us);
        if let Some(hook) = self.hook.as_mut() {
            hook(call);
        }
    }
}

/// Reports `set` for the first `reads` reads, then all clear.
pub struct ScriptedEndstops {
    set: EndstopSet,
    reads: usize,
}

impl ScriptedEndstops {
    pub fn asserted_for(set: EndstopSet, reads: usize) -> Self {
        ScriptedEndstops { set, reads }
    }
}

impl EndstopLines for ScriptedEndstops {
    fn read(&mut self) -> EndstopSet {
        if self.reads == 0 {
            return EndstopSet::empty();
        }
        self.reads -= 1;
        self.set
    }
}

/// Transport fed from a fixed list of polls; records what is sent back.
#[derive(Default)]
pub struct ScriptedSerial {
    input: VecDeque<RxPoll>,
    sent: Vec<u8>,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(polls: &[RxPoll]) -> Self {
        ScriptedSerial { input: polls.iter().copied().collect(), sent: Vec::new() }
    }

    pub fn with_bytes(bytes: &[u8]) -> Self {
        ScriptedSerial { input: bytes.iter().map(|b| RxPoll::data(*b)).collect(), sent: Vec::new() }
    }

    pub fn sent(&self) -> Vec<u8> {
        self.sent.clone()
    }

    pub fn is_exhausted(&self) -> bool {
        self.input.is_empty()
    }
}

impl SerialTransport for ScriptedSerial {
    fn receive_byte(&mut self) -> RxPoll {
        self.input.pop_front().unwrap_or(RxPoll::no_data())
    }

    fn send_byte(&mut self, byte: u8) {
        self.sent.push(byte);
    }
}

#[derive(Debug)]
pub struct MockUartError(ErrorKind);

impl serial::Error for MockUartError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// UART with a receive FIFO the test fills by hand.
#[derive(Default)]
pub struct MockUart {
    rx: VecDeque<Result<u8, ErrorKind>>,
    tx: Vec<u8>,
}

impl MockUart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().map(|b| Ok(*b)));
    }

    pub fn feed_error(&mut self, kind: ErrorKind) {
        self.rx.push_back(Err(kind));
    }

    pub fn written(&self) -> &[u8] {
        &self.tx
    }
}

impl serial::ErrorType for MockUart {
    type Error = MockUartError;
}

impl serial::Read<u8> for MockUart {
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        match self.rx.pop_front() {
            Some(Ok(byte)) => Ok(byte),
            Some(Err(kind)) => Err(nb::Error::Other(MockUartError(kind))),
            None => Err(nb::Error::WouldBlock),
        }
    }
}

impl serial::Write<u8> for MockUart {
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}
