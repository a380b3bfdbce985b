use core::cell::RefCell;

use critical_section::Mutex;

use generic::rx_flags::RxFlags;
use generic::stage_proto::StatusByte;

/// Result of one non-blocking receive poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxPoll {
    pub byte: u8,
    pub flags: RxFlags,
}

impl RxPoll {
    pub const fn data(byte: u8) -> Self {
        RxPoll { byte, flags: RxFlags::empty() }
    }

    pub const fn no_data() -> Self {
        RxPoll { byte: 0, flags: RxFlags::NO_DATA }
    }

    pub const fn error(flags: RxFlags) -> Self {
        RxPoll { byte: 0, flags }
    }

    /// The received byte, if the poll carried data and no condition flag.
    pub fn clean_byte(&self) -> Option<u8> {
        if self.flags.is_clean() {
            Some(self.byte)
        } else {
            None
        }
    }
}

/// Byte channel to the host.
pub trait SerialTransport {
    /// Non-blocking. Sets `RxFlags::NO_DATA` when nothing is pending.
    fn receive_byte(&mut self) -> RxPoll;

    /// Fire-and-forget. Failures are logged by the implementation.
    fn send_byte(&mut self, byte: u8);

    fn send_status(&mut self, status: StatusByte) {
        self.send_byte(status.code());
    }
}

/// A transport reachable from both the foreground loop and interrupt
/// handlers. Each access runs inside a critical section.
pub struct SharedSerial<S> {
    inner: Mutex<RefCell<Option<S>>>,
}

impl<S> Default for SharedSerial<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SharedSerial<S> {
    pub const fn new() -> Self {
        SharedSerial { inner: Mutex::new(RefCell::new(None)) }
    }

    pub fn attach(&self, serial: S) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).replace(serial);
        });
    }

    /// Runs `f` on the transport, `None` if nothing is attached yet.
    pub fn with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut S) -> R,
    {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).as_mut().map(f))
    }
}

impl<S: SerialTransport> SerialTransport for &SharedSerial<S> {
    fn receive_byte(&mut self) -> RxPoll {
        self.with(|serial| serial.receive_byte()).unwrap_or(RxPoll::no_data())
    }

    fn send_byte(&mut self, byte: u8) {
        if self.with(|serial| serial.send_byte(byte)).is_none() {
            warn!("[STAGE] serial not attached, dropped {=u8:#x}", byte);
        }
    }
}
