use embedded_hal_nb::serial::{Error, ErrorKind, Read, Write};
use heapless::Deque;

use generic::rx_flags::RxFlags;
use generic::stage_error::StageError;

use crate::common::uart_comm::{RxPoll, SerialTransport};

fn flags_for(kind: ErrorKind) -> RxFlags {
    match kind {
        ErrorKind::Overrun => RxFlags::OVERRUN_ERROR,
        // framing, parity, noise: the byte is unusable either way
        _ => RxFlags::FRAME_ERROR,
    }
}

/// UART with a software receive ring.
///
/// Received bytes and hardware errors are queued in arrival order. When the
/// ring is full the incoming entry is dropped and `BUFFER_OVERFLOW` is
/// reported on the next poll.
pub struct BufferedSerial<U, const N: usize> {
    uart: U,
    rx: Deque<RxPoll, N>,
    overflowed: bool,
}

impl<U, const N: usize> BufferedSerial<U, N>
where
    U: Read<u8> + Write<u8>,
{
    pub fn new(uart: U) -> Self {
        BufferedSerial { uart, rx: Deque::new(), overflowed: false }
    }

    /// Drains the hardware receive FIFO into the ring. Called from the UART
    /// receive interrupt and before every poll.
    pub fn service_rx(&mut self) {
        loop {
            let entry = match self.uart.read() {
                Ok(byte) => RxPoll::data(byte),
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => RxPoll::error(flags_for(e.kind())),
            };
            if self.rx.push_back(entry).is_err() {
                self.overflowed = true;
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn write_blocking(&mut self, byte: u8) -> Result<(), StageError> {
        nb::block!(self.uart.write(byte)).map_err(|_| StageError::UartWriteError)
    }
}

impl<U, const N: usize> SerialTransport for BufferedSerial<U, N>
where
    U: Read<u8> + Write<u8>,
{
    fn receive_byte(&mut self) -> RxPoll {
        self.service_rx();
        if self.overflowed {
            self.overflowed = false;
            return RxPoll::error(RxFlags::BUFFER_OVERFLOW);
        }
        self.rx.pop_front().unwrap_or(RxPoll::no_data())
    }

    fn send_byte(&mut self, byte: u8) {
        if let Err(err) = self.write_blocking(byte) {
            error!("[STAGE] failed to send {=u8:#x}: {}", byte, err);
        }
    }
}
