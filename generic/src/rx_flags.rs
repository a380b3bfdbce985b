use bitflags::bitflags;

use crate::stage_proto::StatusByte;

bitflags! {
    /// Condition flags attached to one poll of the serial receiver.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct RxFlags: u8 {
        const NO_DATA = 0b0000_0001;
        const BUFFER_OVERFLOW = 0b0000_0010;
        const OVERRUN_ERROR = 0b0000_0100;
        const FRAME_ERROR = 0b0000_1000;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for RxFlags {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "RxFlags({=u8:#x})", self.bits());
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    NoData,
    FrameError,
    OverrunError,
    BufferOverflow,
}

impl TransportError {
    /// The byte reported to the host, `None` for the "nothing pending" case.
    pub fn status_byte(self) -> Option<StatusByte> {
        match self {
            TransportError::NoData => None,
            TransportError::FrameError => Some(StatusByte::FrameError),
            TransportError::OverrunError => Some(StatusByte::OverrunError),
            TransportError::BufferOverflow => Some(StatusByte::BufferOverflow),
        }
    }
}

impl RxFlags {
    /// True when the poll delivered a byte with no condition attached.
    pub fn is_clean(self) -> bool {
        self.is_empty()
    }

    /// Reportable errors in reporting order: frame, overrun, overflow.
    pub fn transport_errors(self) -> impl Iterator<Item = TransportError> {
        [
            (RxFlags::FRAME_ERROR, TransportError::FrameError),
            (RxFlags::OVERRUN_ERROR, TransportError::OverrunError),
            (RxFlags::BUFFER_OVERFLOW, TransportError::BufferOverflow),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, error)| error)
    }
}
