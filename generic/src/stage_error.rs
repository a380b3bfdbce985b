#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StageError {
    GpioPinError,
    PortNotAttached,

    UartWriteError,

    // Used by the host side of the protocol
    StepCountOutOfRange(u16),
    UnknownStatusByte(u8),
}
