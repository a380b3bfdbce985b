use fugit::{HertzU32, MicrosDurationU32};

macro_rules! config {
    (
        $(
            $key:ident : $value:expr
        ),+ $(,)?
    ) => {
        $(
            pub const $key: bool = $value;
        )+
    };
}

macro_rules! parameters {
    (
        $(
            $key:ident : $type:ty = $value:expr
        ),+ $(,)?
    ) => {
        $(
            pub const $key: $type = $value;
        )+
    };
}

config! {
    // Endstop switches pull their line high when pressed.
    ENDSTOP_ACTIVE_HIGH: true,
}

parameters! {
    SYSTEM_CLOCK: HertzU32 = HertzU32::MHz(125),
    UART_BAUD_RATE: HertzU32 = HertzU32::Hz(115_200),
    // Step line held low per pulse. The driver needs > 0.5 µs.
    STEP_PULSE_WIDTH: MicrosDurationU32 = MicrosDurationU32::micros(5),
    // Step line held high between pulses.
    STEP_HOLD_TIME: MicrosDurationU32 = MicrosDurationU32::micros(1_900),
    // Receive ring between the UART interrupt and the sequencer.
    RX_BUFFER_LEN: usize = 32,
}

const _: () = assert!(STEP_HOLD_TIME.to_micros() >= 10 * STEP_PULSE_WIDTH.to_micros());
