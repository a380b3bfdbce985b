/// BSP for the 3-axis stage controller on a Pico-class RP2040 board.
use rp2040_hal::gpio::bank0::{Gpio0, Gpio1};
use rp2040_hal::gpio::{DynPinId, FunctionSioInput, FunctionSioOutput, FunctionUart, Pin, PullDown};
use rp2040_hal::pac::{Interrupt, UART0};
use rp2040_hal::uart::{Enabled, UartPeripheral};

use crate::bsp::config::RX_BUFFER_LEN;
use crate::common::output_port::StagePins;
use crate::common::uart::BufferedSerial;
use crate::define_pins;
use crate::stage::endstop::Endstops;

pub type StageUartPins = (Pin<Gpio0, FunctionUart, PullDown>, Pin<Gpio1, FunctionUart, PullDown>);
pub type StageUartType = UartPeripheral<Enabled, UART0, StageUartPins>;
pub type StageSerialType = BufferedSerial<StageUartType, RX_BUFFER_LEN>;

pub type StageOutputPinType = Pin<DynPinId, FunctionSioOutput, PullDown>;
pub type StagePinsType = StagePins<StageOutputPinType>;

pub type StageEndstopPinType = Pin<DynPinId, FunctionSioInput, PullDown>;
pub type StageEndstopsType = Endstops<StageEndstopPinType, StageEndstopPinType, StageEndstopPinType>;

define_pins! {
    stage_uart, UART0,
}

pub fn stage_uart_irq() -> Interrupt {
    Interrupt::UART0_IRQ
}

/// All three endstop lines share the bank 0 GPIO interrupt.
pub fn stage_endstop_irq() -> Interrupt {
    Interrupt::IO_IRQ_BANK0
}

define_pins! {
    // host link
    stage_sys_tx, gpio0,
    stage_sys_rx, gpio1,
    // output register
    stage_step, gpio2,
    stage_dir, gpio3,
    stage_x_en, gpio4,
    stage_y_en, gpio5,
    stage_z_en, gpio6,
    stage_toggle, gpio7,
    // limit switches
    stage_x_end, gpio18,
    stage_y_end, gpio19,
    stage_z_end, gpio20,
}
